//! The runtime registry: a prefix tree of providers, injectable as a
//! storage engine.
//!
//! Registrations are either exact record keys or prefixes ending in
//! `/`. Lookups probe the key's prefixes longest-first over an ordered
//! map, which keeps the longest-prefix match at radix-tree asymptotics.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rampart_core::{Meta, Query, Record};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::Error;
use crate::registry::{InjectionHandle, Registry};
use crate::storage::{channel, RecordIterator, StorageEngine, ITERATOR_BUFFER};

/// Upper bound on providers queried concurrently during a fan-out.
const QUERY_FANOUT: usize = 8;

/// Prefix-keyed provider multiplexer.
///
/// Inject it into a pre-registered database with storage type
/// `"injected"` via [`inject_as_database`](Self::inject_as_database).
pub struct RuntimeRegistry {
    providers: RwLock<BTreeMap<String, Arc<dyn super::RuntimeProvider>>>,
}

impl RuntimeRegistry {
    /// Creates an empty runtime registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a provider under an exact key or a prefix (ending in
    /// `/`).
    ///
    /// Overlap detection is symmetric: a registration is refused when it
    /// is a prefix of an existing one or an existing one is a prefix of
    /// it.
    ///
    /// # Errors
    ///
    /// `KeyTaken` on overlap.
    pub fn register(
        &self,
        key_or_prefix: &str,
        provider: Arc<dyn super::RuntimeProvider>,
    ) -> Result<(), Error> {
        if key_or_prefix.is_empty() {
            return Err(Error::Storage(anyhow::anyhow!(
                "registration key must not be empty"
            )));
        }
        let mut providers = self.providers.write();
        for existing in providers.keys() {
            if existing.starts_with(key_or_prefix) || key_or_prefix.starts_with(existing.as_str())
            {
                return Err(Error::KeyTaken(existing.clone()));
            }
        }
        providers.insert(key_or_prefix.to_string(), provider);
        Ok(())
    }

    /// Binds this registry as the engine of a pre-registered database.
    ///
    /// # Errors
    ///
    /// See [`Registry::inject_database`].
    pub async fn inject_as_database(
        self: &Arc<Self>,
        hub: &Arc<Registry>,
        name: &str,
    ) -> Result<InjectionHandle, Error> {
        hub.inject_database(name, Arc::clone(self) as Arc<dyn StorageEngine>)
            .await
    }

    /// The provider owning `db_key`, by longest registered prefix.
    fn longest_prefix(&self, db_key: &str) -> Option<Arc<dyn super::RuntimeProvider>> {
        let providers = self.providers.read();
        for end in (1..=db_key.len()).rev() {
            if !db_key.is_char_boundary(end) {
                continue;
            }
            let candidate = &db_key[..end];
            // Anything shorter than the key itself only matches as a
            // prefix registration.
            if end < db_key.len() && !candidate.ends_with('/') {
                continue;
            }
            if let Some(provider) = providers.get(candidate) {
                return Some(Arc::clone(provider));
            }
        }
        None
    }

    /// Providers overlapping a query prefix, with the key each should be
    /// asked for (the longer of its own key and the query prefix).
    fn overlapping(&self, prefix: &str) -> Vec<(String, Arc<dyn super::RuntimeProvider>)> {
        self.providers
            .read()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix) || prefix.starts_with(key.as_str()))
            .map(|(key, provider)| {
                let request = if key.len() >= prefix.len() {
                    key.clone()
                } else {
                    prefix.to_string()
                };
                (request, Arc::clone(provider))
            })
            .collect()
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for RuntimeRegistry {
    async fn get(&self, db_key: &str) -> Result<Arc<dyn Record>, Error> {
        let provider = self.longest_prefix(db_key).ok_or(Error::NotFound)?;
        let records = match provider.get(db_key).await {
            // Write-only providers hide their records from readers.
            Err(Error::WriteOnly) => return Err(Error::NotFound),
            other => other?,
        };
        records
            .into_iter()
            .find(|record| record.database_key().as_deref() == Some(db_key))
            .ok_or(Error::NotFound)
    }

    async fn put(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        let db_key = record.database_key().ok_or(rampart_core::Error::KeyNotSet)?;
        let provider = self
            .longest_prefix(&db_key)
            .ok_or(Error::KeyUnmanaged(db_key))?;
        provider.set(record).await
    }

    async fn delete(&self, _db_key: &str) -> Result<(), Error> {
        // Runtime databases run with shadow-delete on, so deletions
        // arrive at providers as tombstone writes through `put`.
        Err(Error::NotImplemented)
    }

    async fn query(
        &self,
        q: Query,
        local: bool,
        internal: bool,
    ) -> Result<RecordIterator, Error> {
        let targets = self.overlapping(q.database_key_prefix());
        let (feeder, iterator) = channel(ITERATOR_BUFFER);
        let q = Arc::new(q);
        let limiter = Arc::new(Semaphore::new(QUERY_FANOUT));

        let mut tasks: JoinSet<()> = JoinSet::new();
        for (request, provider) in targets {
            let feeder = feeder.clone();
            let q = Arc::clone(&q);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return;
                };
                let records = match provider.get(&request).await {
                    Err(Error::WriteOnly) => return,
                    Err(err) => {
                        feeder.report_error(err);
                        return;
                    }
                    Ok(records) => records,
                };
                for record in records {
                    let Some(db_key) = record.database_key() else {
                        continue;
                    };
                    let meta: Meta = record.meta();
                    if q.matches_db_key(&db_key)
                        && meta.check_validity()
                        && meta.check_permission(local, internal)
                        && q.matches_record(record.as_ref())
                        && !feeder.feed(record).await
                    {
                        return;
                    }
                }
            });
        }

        // The supervisor owns the last feeder: the iterator closes when
        // every provider task has finished, and provider panics become
        // the iterator's terminal error.
        tokio::spawn(async move {
            while let Some(result) = tasks.join_next().await {
                if let Err(join_err) = result {
                    if join_err.is_panic() {
                        warn!("runtime provider panicked during query");
                        feeder.report_error(Error::Storage(anyhow::anyhow!(
                            "runtime provider panicked during query"
                        )));
                    }
                }
            }
        });

        Ok(iterator)
    }

    fn read_only(&self) -> bool {
        false
    }

    fn injected(&self) -> bool {
        true
    }

    async fn maintain_record_states(
        &self,
        _purge_deleted_before: i64,
        _shadow_delete: bool,
    ) -> Result<(), Error> {
        // Nothing is persisted; provider records expire by themselves.
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.providers.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use rampart_core::{dsd, Base, Format};

    use crate::runtime::{RuntimeProvider, SingleRecordProvider};

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Virt {
        #[serde(skip)]
        base: Base,
        tag: String,
    }

    impl Record for Virt {
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

    fn virt(key: &str, tag: &str) -> Arc<dyn Record> {
        let record = Virt {
            tag: tag.to_string(),
            ..Virt::default()
        };
        record.set_key(key).unwrap();
        record.update_meta();
        Arc::new(record)
    }

    /// Serves a fixed set of records under one prefix.
    struct FixedProvider {
        records: Vec<Arc<dyn Record>>,
    }

    #[async_trait]
    impl RuntimeProvider for FixedProvider {
        async fn get(&self, key_or_prefix: &str) -> Result<Vec<Arc<dyn Record>>, Error> {
            Ok(self
                .records
                .iter()
                .filter(|record| {
                    record
                        .database_key()
                        .is_some_and(|key| key.starts_with(key_or_prefix))
                })
                .map(Arc::clone)
                .collect())
        }

        async fn set(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
            Ok(record)
        }
    }

    struct WriteOnlyProvider;

    #[async_trait]
    impl RuntimeProvider for WriteOnlyProvider {
        async fn get(&self, _key_or_prefix: &str) -> Result<Vec<Arc<dyn Record>>, Error> {
            Err(Error::WriteOnly)
        }

        async fn set(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
            Ok(record)
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl RuntimeProvider for PanickingProvider {
        async fn get(&self, _key_or_prefix: &str) -> Result<Vec<Arc<dyn Record>>, Error> {
            panic!("provider exploded");
        }

        async fn set(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
            Ok(record)
        }
    }

    fn fixed(keys: &[&str]) -> Arc<dyn RuntimeProvider> {
        Arc::new(FixedProvider {
            records: keys.iter().map(|key| virt(key, "fixed")).collect(),
        })
    }

    #[test]
    fn collision_detection_is_symmetric() {
        let registry = RuntimeRegistry::new();
        registry.register("a/b/", fixed(&[])).unwrap();

        // A registration under an existing prefix is refused.
        assert!(matches!(
            registry.register("a/b/c", fixed(&[])),
            Err(Error::KeyTaken(_))
        ));

        let registry = RuntimeRegistry::new();
        registry.register("a/b", fixed(&[])).unwrap();

        // A prefix over an existing registration is refused too.
        assert!(matches!(
            registry.register("a/", fixed(&[])),
            Err(Error::KeyTaken(_))
        ));
    }

    #[test]
    fn disjoint_registrations_coexist() {
        let registry = RuntimeRegistry::new();
        registry.register("p1/", fixed(&[])).unwrap();
        registry.register("p2/f1", fixed(&[])).unwrap();
        registry.register("q/", fixed(&[])).unwrap();
    }

    #[tokio::test]
    async fn get_routes_by_longest_prefix() {
        let registry = RuntimeRegistry::new();
        registry
            .register("p1/", fixed(&["rt:p1/a", "rt:p1/b"]))
            .unwrap();
        registry.register("p2/f1", fixed(&["rt:p2/f1"])).unwrap();

        let record = registry.get("p1/a").await.unwrap();
        assert_eq!(record.database_key().as_deref(), Some("p1/a"));

        let record = registry.get("p2/f1").await.unwrap();
        assert_eq!(record.database_key().as_deref(), Some("p2/f1"));

        // An exact-key registration does not cover deeper keys.
        assert!(matches!(registry.get("p2/f1/x").await, Err(Error::NotFound)));
        assert!(matches!(registry.get("p3/z").await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn write_only_provider_reads_as_not_found() {
        let registry = RuntimeRegistry::new();
        registry.register("sink/", Arc::new(WriteOnlyProvider)).unwrap();

        assert!(matches!(registry.get("sink/x").await, Err(Error::NotFound)));
        // Writes still go through.
        assert!(registry.put(virt("rt:sink/x", "w")).await.is_ok());
    }

    #[tokio::test]
    async fn put_without_provider_is_unmanaged() {
        let registry = RuntimeRegistry::new();
        assert!(matches!(
            registry.put(virt("rt:nowhere/x", "w")).await,
            Err(Error::KeyUnmanaged(_))
        ));
    }

    #[tokio::test]
    async fn query_unions_overlapping_providers() {
        let registry = RuntimeRegistry::new();
        registry
            .register("p1/", fixed(&["rt:p1/f1", "rt:p1/f2"]))
            .unwrap();
        registry.register("p2/f1", fixed(&["rt:p2/f1"])).unwrap();

        let q = Query::new("rt:p").check().unwrap();
        let records = registry
            .query(q, true, true)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let mut keys: Vec<_> = records.iter().filter_map(|r| r.database_key()).collect();
        keys.sort();
        assert_eq!(keys, vec!["p1/f1", "p1/f2", "p2/f1"]);
    }

    #[tokio::test]
    async fn query_narrows_to_provider_subset() {
        let registry = RuntimeRegistry::new();
        registry
            .register("p1/", fixed(&["rt:p1/f1", "rt:p1/f2", "rt:p1/g1"]))
            .unwrap();
        registry.register("p2/f1", fixed(&["rt:p2/f1"])).unwrap();

        let q = Query::new("rt:p1/f").check().unwrap();
        let records = registry
            .query(q, true, true)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        let mut keys: Vec<_> = records.iter().filter_map(|r| r.database_key()).collect();
        keys.sort();
        assert_eq!(keys, vec!["p1/f1", "p1/f2"]);
    }

    #[tokio::test]
    async fn query_filters_permissions_and_validity() {
        let secret = virt("rt:p1/secret", "s");
        secret.base().with_meta(|m| m.secret = true);
        let dead = virt("rt:p1/dead", "d");
        dead.mark_deleted();

        let registry = RuntimeRegistry::new();
        registry
            .register(
                "p1/",
                Arc::new(FixedProvider {
                    records: vec![virt("rt:p1/open", "o"), secret, dead],
                }),
            )
            .unwrap();

        let q = Query::new("rt:p1/").check().unwrap();
        let visible = registry
            .query(q.clone(), false, false)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);

        let privileged = registry
            .query(q, true, true)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(privileged.len(), 2);
    }

    #[tokio::test]
    async fn provider_panic_becomes_terminal_error() {
        let registry = RuntimeRegistry::new();
        registry.register("ok/", fixed(&["rt:ok/a"])).unwrap();
        registry.register("bad/", Arc::new(PanickingProvider)).unwrap();

        let q = Query::new("rt:").check().unwrap();
        let mut iterator = registry.query(q, true, true).await.unwrap();

        let mut yielded = 0;
        while iterator.next().await.is_some() {
            yielded += 1;
        }
        assert_eq!(yielded, 1);
        assert!(matches!(iterator.error(), Some(Error::Storage(_))));
    }

    #[tokio::test]
    async fn single_record_provider_round_trip() {
        let registry = RuntimeRegistry::new();
        let record = virt("rt:info/version", "v1");
        registry
            .register(
                "info/version",
                Arc::new(SingleRecordProvider::new(Arc::clone(&record)).unwrap()),
            )
            .unwrap();

        let fetched = registry.get("info/version").await.unwrap();
        assert_eq!(fetched.database_key().as_deref(), Some("info/version"));

        assert!(matches!(
            registry.put(virt("rt:info/version", "v2")).await,
            Err(Error::ReadOnly)
        ));
    }
}
