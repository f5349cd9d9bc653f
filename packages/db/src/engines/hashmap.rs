//! In-memory [`StorageEngine`] backed by [`DashMap`].
//!
//! Provides concurrent access without external locking and implements
//! every optional capability, which makes it the reference engine for
//! tests and for ephemeral databases.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rampart_core::{unix_now, Meta, Query, Record};

use crate::error::Error;
use crate::storage::{channel, Batch, RecordIterator, StorageEngine, ITERATOR_BUFFER};

/// Storage type name under which this engine is registered.
pub const STORAGE_TYPE: &str = "hashmap";

/// In-memory storage keyed by intra-database key.
///
/// Records are shared, not copied: the stored `Arc` is the canonical
/// record, and meta mutations through it are immediately visible. The
/// map itself is shared with batch-consumer tasks.
pub struct HashMapStorage {
    entries: Arc<DashMap<String, Arc<dyn Record>>>,
}

impl HashMapStorage {
    /// Creates a new, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Number of stored records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the engine holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Record>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn matches(q: &Query, local: bool, internal: bool, key: &str, record: &dyn Record) -> bool {
        if !q.matches_db_key(key) {
            return false;
        }
        let meta = record.meta();
        meta.check_validity()
            && meta.check_permission(local, internal)
            && q.matches_record(record)
    }

    fn store_into(
        entries: &DashMap<String, Arc<dyn Record>>,
        record: Arc<dyn Record>,
        shadow_delete: bool,
    ) -> Result<(), Error> {
        let db_key = record.database_key().ok_or(rampart_core::Error::KeyNotSet)?;
        if record.meta().is_deleted() && !shadow_delete {
            entries.remove(&db_key);
        } else {
            entries.insert(db_key, record);
        }
        Ok(())
    }
}

impl Default for HashMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for HashMapStorage {
    async fn get(&self, db_key: &str) -> Result<Arc<dyn Record>, Error> {
        self.entries
            .get(db_key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::NotFound)
    }

    async fn get_meta(&self, db_key: &str) -> Result<Meta, Error> {
        self.get(db_key).await.map(|record| record.meta())
    }

    async fn put(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        let db_key = record.database_key().ok_or(rampart_core::Error::KeyNotSet)?;
        self.entries.insert(db_key, Arc::clone(&record));
        Ok(record)
    }

    async fn delete(&self, db_key: &str) -> Result<(), Error> {
        self.entries.remove(db_key);
        Ok(())
    }

    async fn query(
        &self,
        q: Query,
        local: bool,
        internal: bool,
    ) -> Result<RecordIterator, Error> {
        let snapshot = self.snapshot();
        let (feeder, iterator) = channel(ITERATOR_BUFFER);
        tokio::spawn(async move {
            for (key, record) in snapshot {
                if Self::matches(&q, local, internal, &key, record.as_ref())
                    && !feeder.feed(record).await
                {
                    break;
                }
            }
        });
        Ok(iterator)
    }

    fn put_many(&self, shadow_delete: bool) -> Batch {
        let (batch, mut backend) = Batch::channel(ITERATOR_BUFFER);
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            while let Some(record) = backend.records.recv().await {
                if let Err(err) = Self::store_into(&entries, record, shadow_delete) {
                    let _ = backend.errors.try_send(err);
                    return;
                }
            }
            // Dropping the error sender signals a clean finish.
        });
        batch
    }

    async fn purge(
        &self,
        q: &Query,
        local: bool,
        internal: bool,
        shadow_delete: bool,
    ) -> Result<usize, Error> {
        let mut purged = 0;
        for (key, record) in self.snapshot() {
            if !Self::matches(q, local, internal, &key, record.as_ref()) {
                continue;
            }
            if shadow_delete {
                record.mark_deleted();
            } else {
                self.entries.remove(&key);
            }
            purged += 1;
        }
        Ok(purged)
    }

    fn read_only(&self) -> bool {
        false
    }

    fn injected(&self) -> bool {
        false
    }

    async fn maintain_record_states(
        &self,
        purge_deleted_before: i64,
        shadow_delete: bool,
    ) -> Result<(), Error> {
        let now = unix_now();
        for (key, record) in self.snapshot() {
            let meta = record.meta();
            if meta.deleted > 0 {
                if meta.deleted < purge_deleted_before {
                    self.entries.remove(&key);
                }
            } else if meta.expires > 0 && meta.expires < now {
                if shadow_delete {
                    record.mark_deleted();
                } else {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use rampart_core::{dsd, Base, Condition, Format, Operator};

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Entry {
        #[serde(skip)]
        base: Base,
        name: String,
        score: i64,
    }

    impl Record for Entry {
        fn base(&self) -> &Base {
            &self.base
        }

        fn payload(&self, format: Format) -> Result<Vec<u8>, rampart_core::Error> {
            dsd::dump(self, format)
        }

        fn attributes(&self) -> Option<serde_json::Value> {
            serde_json::to_value(self).ok()
        }
    }

    fn entry(key: &str, name: &str, score: i64) -> Arc<dyn Record> {
        let entry = Entry {
            name: name.to_string(),
            score,
            ..Entry::default()
        };
        entry.set_key(key).unwrap();
        entry.update_meta();
        Arc::new(entry)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let engine = HashMapStorage::new();
        let record = entry("t1:a", "Herbert", 411);

        let stored = engine.put(Arc::clone(&record)).await.unwrap();
        assert_eq!(stored.database_key().as_deref(), Some("a"));

        let fetched = engine.get("a").await.unwrap();
        assert_eq!(fetched.key(), record.key());

        engine.delete("a").await.unwrap();
        assert!(matches!(engine.get("a").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn get_meta_returns_meta_only() {
        let engine = HashMapStorage::new();
        engine.put(entry("t1:a", "x", 1)).await.unwrap();
        let meta = engine.get_meta("a").await.unwrap();
        assert!(meta.created > 0);
        assert!(matches!(engine.get_meta("b").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn query_filters_by_prefix_and_condition() {
        let engine = HashMapStorage::new();
        engine.put(entry("t1:p/a", "Herbert", 411)).await.unwrap();
        engine.put(entry("t1:p/b", "Fritz", 347)).await.unwrap();
        engine.put(entry("t1:q/c", "Norbert", 217)).await.unwrap();

        let q = Query::new("t1:p/")
            .filter(Condition::field("score", Operator::GreaterThan, 100))
            .check()
            .unwrap();
        let records = engine.query(q, false, false).await.unwrap();
        let mut keys: Vec<_> = records
            .collect()
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.database_key())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["p/a", "p/b"]);
    }

    #[tokio::test]
    async fn query_hides_protected_records_from_unprivileged_callers() {
        let engine = HashMapStorage::new();
        let secret = entry("t1:s", "hidden", 1);
        secret.base().with_meta(|m| m.secret = true);
        engine.put(secret).await.unwrap();
        engine.put(entry("t1:o", "open", 1)).await.unwrap();

        let q = Query::new("t1:").check().unwrap();
        let visible = engine
            .query(q.clone(), false, false)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);

        let all = engine
            .query(q, true, true)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn put_many_applies_batch() {
        let engine = Arc::new(HashMapStorage::new());
        let mut batch = engine.put_many(true);
        for i in 0..10 {
            batch.send(entry(&format!("t1:k{i}"), "n", i)).await.unwrap();
        }
        batch.finish().await.unwrap();
        assert_eq!(engine.len(), 10);
    }

    #[tokio::test]
    async fn put_many_without_shadow_delete_removes_tombstones() {
        let engine = Arc::new(HashMapStorage::new());
        engine.put(entry("t1:a", "x", 1)).await.unwrap();

        let tombstone = entry("t1:a", "x", 1);
        tombstone.mark_deleted();

        let mut batch = engine.put_many(false);
        batch.send(tombstone).await.unwrap();
        batch.finish().await.unwrap();

        assert!(matches!(engine.get("a").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn maintain_record_states_drops_expired_and_old_tombstones() {
        let engine = HashMapStorage::new();
        let now = unix_now();

        let expired = entry("t1:expired", "x", 1);
        expired.base().with_meta(|m| m.expires = now - 10);
        engine.put(expired).await.unwrap();

        let old_tombstone = entry("t1:old", "x", 1);
        old_tombstone.base().with_meta(|m| m.deleted = now - 120);
        engine.put(old_tombstone).await.unwrap();

        let fresh_tombstone = entry("t1:fresh", "x", 1);
        fresh_tombstone.base().with_meta(|m| m.deleted = now - 10);
        engine.put(fresh_tombstone).await.unwrap();

        engine.maintain_record_states(now - 60, false).await.unwrap();

        assert!(matches!(engine.get("expired").await, Err(Error::NotFound)));
        assert!(matches!(engine.get("old").await, Err(Error::NotFound)));
        // Fresh tombstones survive until they age past the threshold.
        assert!(engine.get("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn maintain_record_states_shadow_deletes_expired() {
        let engine = HashMapStorage::new();
        let now = unix_now();

        let expired = entry("t1:expired", "x", 1);
        expired.base().with_meta(|m| m.expires = now - 10);
        engine.put(expired).await.unwrap();

        engine.maintain_record_states(now - 60, true).await.unwrap();

        let record = engine.get("expired").await.unwrap();
        assert!(record.meta().is_deleted());
    }

    #[tokio::test]
    async fn purge_deletes_matching_records() {
        let engine = HashMapStorage::new();
        engine.put(entry("t1:p/a", "x", 1)).await.unwrap();
        engine.put(entry("t1:p/b", "x", 2)).await.unwrap();
        engine.put(entry("t1:q/c", "x", 3)).await.unwrap();

        let q = Query::new("t1:p/").check().unwrap();
        let purged = engine.purge(&q, true, true, false).await.unwrap();
        assert_eq!(purged, 2);
        assert_eq!(engine.len(), 1);
    }
}
