//! Per-database orchestration.
//!
//! One controller per logical database. It runs hook chains around the
//! engine, translates tombstone writes into hard deletes when
//! shadow-delete is off, fans stored records out to subscriptions, and
//! delegates maintenance to the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rampart_core::{Meta, Query, Record};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::hooks::{Hook, RegisteredHook};
use crate::shutdown::ShutdownController;
use crate::storage::{Batch, RecordIterator, StorageEngine};
use crate::subscription::{Subscription, SubscriptionHandle};

/// Orchestrates one logical database on top of its storage engine.
pub struct Controller {
    storage: Arc<dyn StorageEngine>,
    shadow_delete: bool,
    hooks: RwLock<Vec<RegisteredHook>>,
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    shutdown: Arc<ShutdownController>,
}

impl Controller {
    pub(crate) fn new(
        storage: Arc<dyn StorageEngine>,
        shadow_delete: bool,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            storage,
            shadow_delete,
            hooks: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// The engine backing this database.
    pub(crate) fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Whether deletions are retained as tombstones until maintenance.
    #[must_use]
    pub fn uses_shadow_delete(&self) -> bool {
        self.shadow_delete
    }

    fn check_shutdown(&self) -> Result<(), Error> {
        if self.shutdown.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Hooks for a phase, collected under the read lock so the chain
    /// runs without holding it across awaits.
    fn hooks_for<F>(&self, wants: F) -> Vec<(Query, Arc<dyn Hook>)>
    where
        F: Fn(&dyn Hook) -> bool,
    {
        self.hooks
            .read()
            .iter()
            .filter(|registered| wants(registered.hook.as_ref()))
            .map(|registered| (registered.q.clone(), Arc::clone(&registered.hook)))
            .collect()
    }

    /// Fetches a record, running the get hook chain and the validity
    /// check.
    ///
    /// # Errors
    ///
    /// `NotFound` for absent or invalid records; the first hook error;
    /// engine errors unchanged.
    pub(crate) async fn get(&self, db_key: &str) -> Result<Arc<dyn Record>, Error> {
        self.check_shutdown()?;

        for (q, hook) in self.hooks_for(|hook| hook.uses_pre_get()) {
            if q.matches_db_key(db_key) {
                hook.pre_get(db_key).await?;
            }
        }

        let mut record = self.storage.get(db_key).await?;

        for (q, hook) in self.hooks_for(|hook| hook.uses_post_get()) {
            if q.matches(record.as_ref()) {
                record = hook.post_get(record).await?;
            }
        }

        if !record.meta().check_validity() {
            return Err(Error::NotFound);
        }
        Ok(record)
    }

    /// Fetches only a record's meta, using the engine's metadata-only
    /// path when it has one.
    pub(crate) async fn get_meta(&self, db_key: &str) -> Result<Meta, Error> {
        self.check_shutdown()?;
        match self.storage.get_meta(db_key).await {
            Err(Error::NotImplemented) => Ok(self.storage.get(db_key).await?.meta()),
            other => other,
        }
    }

    /// Stores a record, running the pre-put hook chain and notifying
    /// subscribers with the stored record.
    ///
    /// A tombstone write on a database without shadow-delete becomes a
    /// hard engine delete.
    pub(crate) async fn put(
        &self,
        mut record: Arc<dyn Record>,
    ) -> Result<Arc<dyn Record>, Error> {
        self.check_shutdown()?;
        if self.storage.read_only() {
            return Err(Error::ReadOnly);
        }

        for (q, hook) in self.hooks_for(|hook| hook.uses_pre_put()) {
            if q.matches(record.as_ref()) {
                record = hook.pre_put(record).await?;
            }
        }

        let stored = if !self.shadow_delete && record.meta().is_deleted() {
            let db_key = record.database_key().ok_or(rampart_core::Error::KeyNotSet)?;
            self.storage.delete(&db_key).await?;
            record
        } else {
            self.storage.put(record).await?
        };

        self.notify_subscribers(&stored);
        Ok(stored)
    }

    /// Opens a batched write on the engine.
    ///
    /// Hooks and subscriptions are NOT invoked for batched writes; the
    /// records go straight to the engine. Engines without batching yield
    /// a batch that reports `NotImplemented`.
    pub(crate) fn put_many(&self) -> Batch {
        if self.shutdown.is_shutting_down() {
            return Batch::failed(Error::ShuttingDown);
        }
        if self.storage.read_only() {
            return Batch::failed(Error::ReadOnly);
        }
        self.storage.put_many(self.shadow_delete)
    }

    /// Streams records matching `q`.
    pub(crate) async fn query(
        &self,
        q: Query,
        local: bool,
        internal: bool,
    ) -> Result<RecordIterator, Error> {
        self.check_shutdown()?;
        self.storage.query(q, local, internal).await
    }

    /// Bulk-deletes records matching `q`.
    pub(crate) async fn purge(
        &self,
        q: &Query,
        local: bool,
        internal: bool,
    ) -> Result<usize, Error> {
        self.check_shutdown()?;
        self.storage.purge(q, local, internal, self.shadow_delete).await
    }

    /// Engine-defined light maintenance.
    pub(crate) async fn maintain(&self) -> Result<(), Error> {
        self.check_shutdown()?;
        self.storage.maintain().await
    }

    /// Engine-defined thorough maintenance.
    pub(crate) async fn maintain_thorough(&self) -> Result<(), Error> {
        self.check_shutdown()?;
        self.storage.maintain_thorough().await
    }

    /// Drops expired records and old tombstones.
    pub(crate) async fn maintain_record_states(
        &self,
        purge_deleted_before: i64,
    ) -> Result<(), Error> {
        self.check_shutdown()?;
        self.storage
            .maintain_record_states(purge_deleted_before, self.shadow_delete)
            .await
    }

    /// Notifies subscribers without touching the engine. Used by runtime
    /// providers whose records change out-of-band.
    pub(crate) fn push_update(&self, record: &Arc<dyn Record>) -> Result<(), Error> {
        self.check_shutdown()?;
        self.notify_subscribers(record);
        Ok(())
    }

    /// Fans a stored record out to matching subscriptions.
    ///
    /// Runs under the subscription read lock; delivery is `try_send`, so
    /// a slow subscriber can miss updates but never blocks the writer.
    /// The record's meta is snapshotted under its own lock by each
    /// permission check.
    fn notify_subscribers(&self, record: &Arc<dyn Record>) {
        let mut closed = Vec::new();
        {
            let subscriptions = self.subscriptions.read();
            let meta = record.meta();
            for sub in subscriptions.iter() {
                if !sub.q.matches(record.as_ref()) {
                    continue;
                }
                if !meta.check_permission(sub.local, sub.internal) {
                    continue;
                }
                if !sub.deliver(record) {
                    closed.push(sub.id);
                }
            }
        }
        if !closed.is_empty() {
            self.subscriptions
                .write()
                .retain(|sub| !closed.contains(&sub.id));
        }
    }

    /// Registers a subscription scoped by `q`.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        q: Query,
        local: bool,
        internal: bool,
        buffer: usize,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscriptions.write().push(Subscription {
            id,
            q,
            local,
            internal,
            sender: tx,
        });
        SubscriptionHandle::new(id, Arc::clone(self), rx)
    }

    pub(crate) fn remove_subscription(&self, id: u64) {
        self.subscriptions.write().retain(|sub| sub.id != id);
    }

    /// Registers a hook scoped by `q`, returning its id.
    pub(crate) fn register_hook(&self, q: Query, hook: Arc<dyn Hook>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.hooks.write().push(RegisteredHook { id, q, hook });
        id
    }

    pub(crate) fn remove_hook(&self, id: u64) {
        self.hooks.write().retain(|registered| registered.id != id);
    }
}
