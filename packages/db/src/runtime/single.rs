//! Convenience provider exposing one read-only record.

use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::Record;

use crate::error::Error;

use super::provider::RuntimeProvider;

/// Serves exactly one record at its database key; writes are refused.
pub struct SingleRecordProvider {
    record: Arc<dyn Record>,
}

impl SingleRecordProvider {
    /// Creates a provider for a keyed record.
    ///
    /// # Errors
    ///
    /// `KeyNotSet` when the record has no key yet.
    pub fn new(record: Arc<dyn Record>) -> Result<Self, Error> {
        if record.base().key().is_none() {
            return Err(rampart_core::Error::KeyNotSet.into());
        }
        Ok(Self { record })
    }
}

#[async_trait]
impl RuntimeProvider for SingleRecordProvider {
    async fn get(&self, key_or_prefix: &str) -> Result<Vec<Arc<dyn Record>>, Error> {
        let db_key = self.record.database_key().unwrap_or_default();
        if db_key.starts_with(key_or_prefix) {
            Ok(vec![Arc::clone(&self.record)])
        } else {
            Ok(Vec::new())
        }
    }

    async fn set(&self, _record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        Err(Error::ReadOnly)
    }
}
