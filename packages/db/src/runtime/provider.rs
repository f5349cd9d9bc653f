//! The contract a runtime value provider satisfies.

use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::Record;

use crate::error::Error;

/// Synthesises records on demand for a slice of the key space.
///
/// A provider is registered under an exact record key or a prefix
/// (ending in `/`). Read-only providers return `Error::ReadOnly` from
/// [`set`](RuntimeProvider::set); write-only providers return
/// `Error::WriteOnly` from [`get`](RuntimeProvider::get), which the
/// registry translates to `NotFound` for readers.
#[async_trait]
pub trait RuntimeProvider: Send + Sync + 'static {
    /// Records under `key_or_prefix`: the provider's whole portion of
    /// the key space for a prefix, or a single record for an exact key.
    async fn get(&self, key_or_prefix: &str) -> Result<Vec<Arc<dyn Record>>, Error>;

    /// Applies a write, returning the canonical resulting record.
    async fn set(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error>;
}
