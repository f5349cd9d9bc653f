//! The storage contract: what a backend must do, and what it may do.
//!
//! [`StorageEngine`] is the required capability set. Optional
//! capabilities (metadata-only get, batching, maintenance sweeps, purge)
//! are defaulted trait methods that report `NotImplemented`, so callers
//! can probe them at runtime and fall back.

pub mod iterator;

use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::{Meta, Query, Record};
use tokio::sync::mpsc;

use crate::error::Error;

pub use iterator::{channel, IteratorFeeder, RecordIterator, ITERATOR_BUFFER};

/// Caller half of a batched write.
///
/// Records are streamed through [`send`](Batch::send); dropping the
/// sender (or calling [`finish`](Batch::finish)) ends the batch. Engine
/// errors are observable at any time via [`try_error`](Batch::try_error)
/// and as the final result of `finish`.
pub struct Batch {
    sender: Option<mpsc::Sender<Arc<dyn Record>>>,
    errors: mpsc::Receiver<Error>,
}

/// Engine half of a batched write: the record stream to consume and the
/// error channel to report on.
pub struct BatchBackend {
    /// Records fed by the caller; closes when the batch ends.
    pub records: mpsc::Receiver<Arc<dyn Record>>,
    /// Error reports back to the caller.
    pub errors: mpsc::Sender<Error>,
}

impl Batch {
    /// Creates a connected caller/engine pair.
    #[must_use]
    pub fn channel(buffer: usize) -> (Batch, BatchBackend) {
        let (record_tx, record_rx) = mpsc::channel(buffer.max(1));
        let (err_tx, err_rx) = mpsc::channel(1);
        (
            Batch {
                sender: Some(record_tx),
                errors: err_rx,
            },
            BatchBackend {
                records: record_rx,
                errors: err_tx,
            },
        )
    }

    /// A batch that immediately reports the given error.
    #[must_use]
    pub fn failed(err: Error) -> Batch {
        let (mut batch, backend) = Batch::channel(1);
        // Capacity 1: this send cannot fail.
        let _ = backend.errors.try_send(err);
        drop(backend.records);
        batch.sender = None;
        batch
    }

    /// Streams one record into the batch.
    ///
    /// # Errors
    ///
    /// The engine's reported error if it stopped consuming, or the
    /// batch's failure error.
    pub async fn send(&mut self, record: Arc<dyn Record>) -> Result<(), Error> {
        let Some(sender) = &self.sender else {
            return self.take_error();
        };
        if sender.send(record).await.is_err() {
            self.sender = None;
            return self.take_error();
        }
        Ok(())
    }

    /// A mid-batch engine error, if one has been reported.
    pub fn try_error(&mut self) -> Option<Error> {
        self.errors.try_recv().ok()
    }

    /// Ends the batch and waits for the engine's verdict.
    ///
    /// # Errors
    ///
    /// The engine's terminal error, if any.
    pub async fn finish(mut self) -> Result<(), Error> {
        self.sender = None;
        match self.errors.recv().await {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn take_error(&mut self) -> Result<(), Error> {
        match self.errors.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Err(Error::Storage(anyhow::anyhow!(
                "batch aborted before all records were consumed"
            ))),
        }
    }
}

/// The capability contract a storage backend satisfies.
///
/// `get`/`put`/`delete` operate on intra-database keys; the controller
/// owns the database-name half of the key space. Engines are shared as
/// `Arc<dyn StorageEngine>`.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Fetches a record.
    ///
    /// # Errors
    ///
    /// `NotFound` for absent keys. Tombstoned or expired records are
    /// returned as stored; validity is the controller's concern.
    async fn get(&self, db_key: &str) -> Result<Arc<dyn Record>, Error>;

    /// Fetches only a record's meta, when the engine can do so cheaply.
    ///
    /// # Errors
    ///
    /// `NotImplemented` unless the engine overrides this; the controller
    /// then falls back to a full `get`.
    async fn get_meta(&self, db_key: &str) -> Result<Meta, Error> {
        let _ = db_key;
        Err(Error::NotImplemented)
    }

    /// Stores a record, returning the canonical stored form.
    async fn put(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error>;

    /// Removes a record. Absent keys are not an error.
    async fn delete(&self, db_key: &str) -> Result<(), Error>;

    /// Streams records matching `q`, filtered by validity and by the
    /// caller's permission flags.
    async fn query(
        &self,
        q: Query,
        local: bool,
        internal: bool,
    ) -> Result<RecordIterator, Error>;

    /// Opens a batched write, when the engine supports batching.
    ///
    /// The default reports `NotImplemented` through the batch's error
    /// channel.
    fn put_many(&self, shadow_delete: bool) -> Batch {
        let _ = shadow_delete;
        Batch::failed(Error::NotImplemented)
    }

    /// Deletes everything matching `q`, subject to the permission flags.
    ///
    /// # Errors
    ///
    /// `NotImplemented` unless the engine overrides this.
    async fn purge(
        &self,
        q: &Query,
        local: bool,
        internal: bool,
        shadow_delete: bool,
    ) -> Result<usize, Error> {
        let _ = (q, local, internal, shadow_delete);
        Err(Error::NotImplemented)
    }

    /// Whether writes are refused.
    fn read_only(&self) -> bool;

    /// Whether this engine was bound by a collaborator instead of being
    /// started from a registered storage type.
    fn injected(&self) -> bool;

    /// Engine-defined light maintenance. Defaults to a no-op.
    async fn maintain(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Engine-defined thorough maintenance. Defaults to a no-op.
    async fn maintain_thorough(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Drops expired records and purges tombstones older than
    /// `purge_deleted_before` (Unix seconds).
    ///
    /// With `shadow_delete`, expired records become tombstones instead of
    /// being removed outright.
    async fn maintain_record_states(
        &self,
        purge_deleted_before: i64,
        shadow_delete: bool,
    ) -> Result<(), Error>;

    /// Releases the engine's resources.
    async fn shutdown(&self) -> Result<(), Error>;
}
