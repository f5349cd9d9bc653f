//! The caller-facing database handle.
//!
//! An [`Interface`] binds permission flags and write defaults to every
//! operation it issues, optionally fronted by a read cache and a
//! delayed-write path.
//!
//! Caching caveat, preserved on purpose: writes from one interface do
//! not invalidate another interface's cache, so stale reads are possible
//! there until eviction.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::Expiry;
use rampart_core::{Key, Meta, Query, Record};
use tokio::time::timeout;

use crate::error::Error;
use crate::hooks::{Hook, HookHandle};
use crate::registry::Registry;
use crate::storage::{Batch, RecordIterator, ITERATOR_BUFFER};
use crate::subscription::SubscriptionHandle;
use crate::write_behind::WriteBehind;

/// How long a batched put waits for the next record before giving up.
/// A constant, not configurable.
pub const BATCH_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Permission flags, write defaults, and caching options of an
/// interface.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Caller is local; may read crownjewel records.
    pub local: bool,
    /// Caller is internal; may read secret records.
    pub internal: bool,
    /// Force the secret flag on every written record.
    pub always_make_secret: bool,
    /// Force the crownjewel flag on every written record.
    pub always_make_crownjewel: bool,
    /// Force an absolute expiry (Unix seconds) on every written record.
    /// 0 = off.
    pub always_set_absolute_expiry: i64,
    /// Force a relative expiry (seconds) on every written record.
    /// 0 = off. Ignored when an absolute expiry is forced.
    pub always_set_relative_expiry: i64,
    /// Read cache capacity in records. 0 = no cache.
    pub cache_size: usize,
    /// Name of a batcher-capable database whose writes are delayed
    /// through the cache.
    pub delay_cached_writes: Option<String>,
}

impl Options {
    /// Whether permission checks can be short-circuited.
    #[must_use]
    pub fn has_all_permissions(&self) -> bool {
        self.local && self.internal
    }

    /// Stamps a record's meta for a write and applies the forced
    /// defaults, in one pass under the record's lock.
    pub fn apply(&self, record: &dyn Record) {
        record.base().with_meta(|meta| {
            if self.always_make_secret {
                meta.secret = true;
            }
            if self.always_make_crownjewel {
                meta.crownjewel = true;
            }
            if self.always_set_absolute_expiry > 0 {
                meta.set_absolute_expiry(self.always_set_absolute_expiry);
            } else if self.always_set_relative_expiry > 0 {
                meta.set_relative_expiry(self.always_set_relative_expiry);
            }
            meta.update();
        });
    }
}

/// One cached record plus the TTL it was inserted with.
#[derive(Clone)]
struct CacheEntry {
    record: Arc<dyn Record>,
    ttl: Option<Duration>,
}

/// Per-entry expiration: a record with a relative expiry lives in the
/// cache for exactly that long.
struct CacheExpiry;

impl Expiry<String, CacheEntry> for CacheExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// A caller handle bound to permission flags and defaults.
pub struct Interface {
    registry: Arc<Registry>,
    options: Options,
    cache: Option<Cache<String, CacheEntry>>,
    write_behind: Option<Arc<WriteBehind>>,
}

impl Interface {
    /// Creates an interface on the hub with the given options.
    #[must_use]
    pub fn new(registry: Arc<Registry>, options: Options) -> Self {
        let write_behind = options
            .delay_cached_writes
            .as_ref()
            .map(|db_name| WriteBehind::start(Arc::clone(&registry), db_name.clone()));

        let cache = (options.cache_size > 0).then(|| {
            let mut builder = Cache::builder()
                .max_capacity(options.cache_size as u64)
                .expire_after(CacheExpiry);
            if let Some(write_behind) = &write_behind {
                let write_behind = Arc::clone(write_behind);
                builder = builder.eviction_listener(move |key: Arc<String>, _entry, cause| {
                    if cause.was_evicted() {
                        if let Ok(parsed) = Key::parse(&key) {
                            write_behind.on_evict(parsed.database_key());
                        }
                    }
                });
            }
            builder.build()
        });

        Self {
            registry,
            options,
            cache,
            write_behind,
        }
    }

    /// The options this interface was created with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn check_permission(&self, meta: &Meta) -> Result<(), Error> {
        if self.options.has_all_permissions() {
            return Ok(());
        }
        if meta.check_permission(self.options.local, self.options.internal) {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }

    async fn cache_put(&self, key: &str, record: &Arc<dyn Record>) {
        let Some(cache) = &self.cache else { return };
        let meta = record.meta();
        if !meta.check_validity() {
            cache.invalidate(key).await;
            return;
        }
        let ttl = meta
            .relative_expiry()
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs.unsigned_abs()));
        cache
            .insert(
                key.to_string(),
                CacheEntry {
                    record: Arc::clone(record),
                    ttl,
                },
            )
            .await;
    }

    async fn cache_get(&self, key: &str) -> Option<Arc<dyn Record>> {
        let cache = self.cache.as_ref()?;
        let entry = cache.get(key).await?;
        if entry.record.meta().check_validity() {
            Some(entry.record)
        } else {
            None
        }
    }

    /// Fetches a record.
    ///
    /// Consults the cache first; on a miss the controller chain runs and
    /// the result is cached with a TTL matching its relative expiry.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PermissionDenied`, hook errors, engine errors.
    pub async fn get(&self, key: &str) -> Result<Arc<dyn Record>, Error> {
        let parsed = Key::parse(key)?;

        if let Some(record) = self.cache_get(key).await {
            self.check_permission(&record.meta())?;
            return Ok(record);
        }

        let controller = self.registry.controller(parsed.database_name()).await?;
        let record = controller.get(parsed.database_key()).await?;
        self.check_permission(&record.meta())?;

        self.cache_put(key, &record).await;
        Ok(record)
    }

    /// Fetches only a record's meta.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn get_meta(&self, key: &str) -> Result<Meta, Error> {
        let parsed = Key::parse(key)?;
        let controller = self.registry.controller(parsed.database_name()).await?;
        let meta = controller.get_meta(parsed.database_key()).await?;
        self.check_permission(&meta)?;
        Ok(meta)
    }

    /// Whether a record exists and is valid.
    ///
    /// A record the caller may not read still exists.
    ///
    /// # Errors
    ///
    /// Engine errors other than `NotFound`.
    pub async fn exists(&self, key: &str) -> Result<bool, Error> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(Error::PermissionDenied) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Stores a record, applying this interface's write defaults.
    ///
    /// With delayed writes enabled for the record's database, the write
    /// is parked and acknowledged without a synchronous engine call.
    ///
    /// # Errors
    ///
    /// `ReadOnly`, hook errors, engine errors.
    pub async fn put(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        let key = record.base().key().ok_or(rampart_core::Error::KeyNotSet)?;
        self.options.apply(record.as_ref());

        if let Some(write_behind) = &self.write_behind {
            if write_behind.handles(key.database_name()) {
                write_behind.park(key.database_key().to_string(), Arc::clone(&record));
                self.cache_put(&key.to_string(), &record).await;
                return Ok(record);
            }
        }

        let controller = self.registry.controller(key.database_name()).await?;
        let stored = controller.put(record).await?;
        self.cache_put(&key.to_string(), &stored).await;
        Ok(stored)
    }

    /// Stores a record as new: meta timestamps are reset first, so any
    /// previous lifecycle is discarded.
    ///
    /// # Errors
    ///
    /// As [`put`](Self::put).
    pub async fn put_new(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        record.base().with_meta(Meta::reset);
        self.put(record).await
    }

    /// Opens a batched write pipeline into `db_name`.
    ///
    /// Records are stamped with this interface's defaults on the way
    /// through. The batch is abandoned with `Timeout` if the caller
    /// stops feeding for [`BATCH_IDLE_TIMEOUT`]. Hooks and subscriptions
    /// are not invoked for batched writes.
    ///
    /// # Errors
    ///
    /// Controller resolution errors.
    pub async fn put_many(&self, db_name: &str) -> Result<Batch, Error> {
        let controller = self.registry.controller(db_name).await?;
        let mut engine_batch = controller.put_many();

        let (batch, mut backend) = Batch::channel(ITERATOR_BUFFER);
        let options = self.options.clone();
        tokio::spawn(async move {
            loop {
                match timeout(BATCH_IDLE_TIMEOUT, backend.records.recv()).await {
                    Err(_idle) => {
                        let _ = backend.errors.try_send(Error::Timeout);
                        return;
                    }
                    Ok(None) => {
                        if let Err(err) = engine_batch.finish().await {
                            let _ = backend.errors.try_send(err);
                        }
                        return;
                    }
                    Ok(Some(record)) => {
                        options.apply(record.as_ref());
                        if let Err(err) = engine_batch.send(record).await {
                            let _ = backend.errors.try_send(err);
                            return;
                        }
                    }
                }
            }
        });
        Ok(batch)
    }

    /// Marks a record as deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is nothing to delete; permission errors.
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        self.get_modify_put(key, Meta::delete).await
    }

    /// Sets the secret flag on a stored record.
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub async fn make_secret(&self, key: &str) -> Result<(), Error> {
        self.get_modify_put(key, |meta| meta.secret = true).await
    }

    /// Sets the crownjewel flag on a stored record.
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub async fn make_crown_jewel(&self, key: &str) -> Result<(), Error> {
        self.get_modify_put(key, |meta| meta.crownjewel = true).await
    }

    /// Sets an absolute expiry on a stored record.
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub async fn set_absolute_expiry(&self, key: &str, expires: i64) -> Result<(), Error> {
        self.get_modify_put(key, move |meta| meta.set_absolute_expiry(expires))
            .await
    }

    /// Sets a relative expiry on a stored record.
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub async fn set_relative_expiry(&self, key: &str, seconds: i64) -> Result<(), Error> {
        self.get_modify_put(key, move |meta| meta.set_relative_expiry(seconds))
            .await
    }

    async fn get_modify_put(
        &self,
        key: &str,
        modify: impl FnOnce(&mut Meta),
    ) -> Result<(), Error> {
        let record = self.get(key).await?;
        record.base().with_meta(modify);
        self.put(record).await?;
        Ok(())
    }

    /// Streams records matching `q`, filtered by this interface's
    /// permission flags.
    ///
    /// # Errors
    ///
    /// Query validation and engine errors.
    pub async fn query(&self, q: Query) -> Result<RecordIterator, Error> {
        let q = if q.is_checked() { q } else { q.check()? };
        let controller = self.registry.controller(q.database_name()).await?;
        controller
            .query(q, self.options.local, self.options.internal)
            .await
    }

    /// Bulk-deletes records matching `q`, subject to this interface's
    /// permission flags.
    ///
    /// # Errors
    ///
    /// `NotImplemented` when the engine lacks purge.
    pub async fn purge(&self, q: Query) -> Result<usize, Error> {
        let q = if q.is_checked() { q } else { q.check()? };
        let controller = self.registry.controller(q.database_name()).await?;
        controller
            .purge(&q, self.options.local, self.options.internal)
            .await
    }

    /// Subscribes to updates matching `q`. The feed holds at most
    /// `buffer` undelivered updates; further ones are dropped.
    ///
    /// # Errors
    ///
    /// Query validation and controller resolution errors.
    pub async fn subscribe(
        &self,
        q: Query,
        buffer: usize,
    ) -> Result<SubscriptionHandle, Error> {
        let q = if q.is_checked() { q } else { q.check()? };
        let controller = self.registry.controller(q.database_name()).await?;
        Ok(controller.subscribe(q, self.options.local, self.options.internal, buffer))
    }

    /// Installs a hook on the database scoped by `q`.
    ///
    /// # Errors
    ///
    /// Query validation and controller resolution errors.
    pub async fn register_hook(
        &self,
        q: Query,
        hook: Arc<dyn Hook>,
    ) -> Result<HookHandle, Error> {
        let q = if q.is_checked() { q } else { q.check()? };
        let controller = self.registry.controller(q.database_name()).await?;
        let id = controller.register_hook(q, hook);
        Ok(HookHandle::new(controller, id))
    }

    /// Drains any delayed writes through the batch path now.
    pub async fn flush_writes(&self) {
        if let Some(write_behind) = &self.write_behind {
            write_behind.flush(&self.registry).await;
        }
    }

    /// Number of delayed writes not yet handed to the engine.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.write_behind
            .as_ref()
            .map_or(0, |write_behind| write_behind.pending_len())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use rampart_core::{dsd, unix_now, Base, Format};

    use crate::registry::Database;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Entry {
        #[serde(skip)]
        base: Base,
        label: String,
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

    fn entry(key: &str, label: &str) -> Arc<dyn Record> {
        let entry = Entry {
            label: label.to_string(),
            ..Entry::default()
        };
        entry.set_key(key).unwrap();
        Arc::new(entry)
    }

    async fn hub() -> Arc<Registry> {
        let registry = Registry::start(None).await.unwrap();
        registry
            .register(Database::new("ifc", "interface tests", "hashmap", true))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn defaults_are_applied_on_put() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            always_make_secret: true,
            always_set_relative_expiry: 600,
            ..Options::default()
        });

        let stored = iface.put(entry("ifc:a", "x")).await.unwrap();
        let meta = stored.meta();
        assert!(meta.secret);
        assert_eq!(meta.relative_expiry(), Some(600));
        assert!(meta.expires >= unix_now() + 599);
        assert!(meta.created > 0);
    }

    #[tokio::test]
    async fn absolute_expiry_default_wins_over_relative() {
        let registry = hub().await;
        let expires = unix_now() + 10_000;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            always_set_absolute_expiry: expires,
            always_set_relative_expiry: 600,
            ..Options::default()
        });

        let stored = iface.put(entry("ifc:a", "x")).await.unwrap();
        assert_eq!(stored.meta().expires, expires);
        assert_eq!(stored.meta().relative_expiry(), None);
    }

    #[tokio::test]
    async fn permission_checks_on_read() {
        let registry = hub().await;
        let writer = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        let secret = entry("ifc:secret", "s");
        secret.base().with_meta(|m| m.secret = true);
        writer.put(secret).await.unwrap();

        let jewel = entry("ifc:jewel", "j");
        jewel.base().with_meta(|m| m.crownjewel = true);
        writer.put(jewel).await.unwrap();

        let external = registry.interface(Options::default());
        assert!(matches!(
            external.get("ifc:secret").await,
            Err(Error::PermissionDenied)
        ));
        assert!(matches!(
            external.get("ifc:jewel").await,
            Err(Error::PermissionDenied)
        ));

        let internal_only = registry.interface(Options {
            internal: true,
            ..Options::default()
        });
        assert!(internal_only.get("ifc:secret").await.is_ok());
        assert!(matches!(
            internal_only.get("ifc:jewel").await,
            Err(Error::PermissionDenied)
        ));

        // Both flags short-circuit every check.
        assert!(writer.get("ifc:secret").await.is_ok());
        assert!(writer.get("ifc:jewel").await.is_ok());
    }

    #[tokio::test]
    async fn exists_classifies_outcomes() {
        let registry = hub().await;
        let writer = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });
        let secret = entry("ifc:secret", "s");
        secret.base().with_meta(|m| m.secret = true);
        writer.put(secret).await.unwrap();

        let external = registry.interface(Options::default());
        assert!(!external.exists("ifc:absent").await.unwrap());
        // Denied still means the record exists.
        assert!(external.exists("ifc:secret").await.unwrap());
        assert!(writer.exists("ifc:secret").await.unwrap());
    }

    #[tokio::test]
    async fn delete_marks_and_hides() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        iface.put(entry("ifc:gone", "x")).await.unwrap();
        iface.delete("ifc:gone").await.unwrap();

        assert!(matches!(iface.get("ifc:gone").await, Err(Error::NotFound)));
        assert!(matches!(
            iface.delete("ifc:gone").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn flag_and_expiry_helpers_persist() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        iface.put(entry("ifc:a", "x")).await.unwrap();

        iface.make_secret("ifc:a").await.unwrap();
        assert!(iface.get_meta("ifc:a").await.unwrap().secret);

        iface.make_crown_jewel("ifc:a").await.unwrap();
        assert!(iface.get_meta("ifc:a").await.unwrap().crownjewel);

        iface.set_relative_expiry("ifc:a", 900).await.unwrap();
        assert_eq!(
            iface.get_meta("ifc:a").await.unwrap().relative_expiry(),
            Some(900)
        );

        let expires = unix_now() + 5_000;
        iface.set_absolute_expiry("ifc:a", expires).await.unwrap();
        assert_eq!(iface.get_meta("ifc:a").await.unwrap().expires, expires);
    }

    #[tokio::test]
    async fn put_new_discards_previous_lifecycle() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        let recycled = entry("ifc:new", "x");
        recycled.base().with_meta(|m| {
            m.created = 1;
            m.modified = 1;
            m.expires = 1;
        });

        let stored = iface.put_new(recycled).await.unwrap();
        let meta = stored.meta();
        assert!(meta.created > 1);
        assert_eq!(meta.expires, 0);
    }

    #[tokio::test]
    async fn cached_reads_serve_repeat_gets() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            cache_size: 16,
            ..Options::default()
        });

        iface.put(entry("ifc:c", "cached")).await.unwrap();

        let first = iface.get("ifc:c").await.unwrap();
        let second = iface.get("ifc:c").await.unwrap();
        // Same Arc: the second read came from the cache.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn stale_cache_caveat_across_interfaces() {
        let registry = hub().await;
        let cached = registry.interface(Options {
            local: true,
            internal: true,
            cache_size: 16,
            ..Options::default()
        });
        let writer = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        cached.put(entry("ifc:stale", "v1")).await.unwrap();
        cached.get("ifc:stale").await.unwrap();

        // Another interface replaces the record; the first cache does
        // not notice until eviction. This staleness is the documented
        // caveat, asserted so a behavior change is loud.
        writer.put(entry("ifc:stale", "v2")).await.unwrap();
        let from_cache = cached.get("ifc:stale").await.unwrap();
        assert_eq!(from_cache.attributes().unwrap()["label"], "v1");

        let fresh = writer.get("ifc:stale").await.unwrap();
        assert_eq!(fresh.attributes().unwrap()["label"], "v2");
    }

    #[tokio::test]
    async fn delayed_writes_park_then_flush() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            cache_size: 16,
            delay_cached_writes: Some("ifc".to_string()),
            ..Options::default()
        });

        iface.put(entry("ifc:d1", "x")).await.unwrap();
        iface.put(entry("ifc:d2", "x")).await.unwrap();
        assert_eq!(iface.pending_writes(), 2);

        // Parked writes are already readable through this interface's
        // cache.
        assert!(iface.get("ifc:d1").await.is_ok());

        iface.flush_writes().await;
        assert_eq!(iface.pending_writes(), 0);

        // Now the engine has them: a fresh interface sees both.
        let other = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });
        assert!(other.get("ifc:d1").await.is_ok());
        assert!(other.get("ifc:d2").await.is_ok());
    }

    struct BlockingHook;

    #[async_trait::async_trait]
    impl crate::hooks::Hook for BlockingHook {
        fn uses_pre_get(&self) -> bool {
            true
        }

        async fn pre_get(&self, _db_key: &str) -> Result<(), Error> {
            Err(Error::PermissionDenied)
        }
    }

    #[tokio::test]
    async fn registered_hook_participates_until_cancelled() {
        let registry = hub().await;
        let iface = registry.interface(Options {
            local: true,
            internal: true,
            ..Options::default()
        });

        iface.put(entry("ifc:h", "x")).await.unwrap();

        let handle = iface
            .register_hook(Query::new("ifc:").check().unwrap(), Arc::new(BlockingHook))
            .await
            .unwrap();
        assert!(matches!(
            iface.get("ifc:h").await,
            Err(Error::PermissionDenied)
        ));

        handle.cancel();
        assert!(iface.get("ifc:h").await.is_ok());
    }

    #[tokio::test]
    async fn unkeyed_record_is_rejected() {
        let registry = hub().await;
        let iface = registry.interface(Options::default());
        let unkeyed: Arc<dyn Record> = Arc::new(Entry::default());
        assert!(iface.put(unkeyed).await.is_err());
    }
}
