//! The hub: registered databases, lazily-started controllers, engine
//! factories, injected bindings, catalogue persistence, and hub-wide
//! maintenance and shutdown.

pub mod database;
pub mod persist;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rampart_core::{unix_now, Record};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::engines::hashmap::{self, HashMapStorage};
use crate::error::Error;
use crate::interface::{Interface, Options};
use crate::shutdown::ShutdownController;
use crate::storage::StorageEngine;

pub use database::{validate_name, Database, INJECTED_STORAGE_TYPE};
pub use persist::CATALOGUE_FILE;

/// Tombstones older than this are purged by the hub-wide record-state
/// sweep.
pub const PURGE_TOMBSTONES_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Starts a storage engine for a registered database.
///
/// `location` is the engine's directory (`<root>/<name>/<storageType>/`),
/// or `None` on a hub without a filesystem root.
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    async fn start(
        &self,
        name: &str,
        location: Option<&Path>,
    ) -> Result<Arc<dyn StorageEngine>, Error>;
}

/// Factory for the built-in in-memory engine. Ignores the location.
struct HashMapFactory;

#[async_trait]
impl EngineFactory for HashMapFactory {
    async fn start(
        &self,
        _name: &str,
        _location: Option<&Path>,
    ) -> Result<Arc<dyn StorageEngine>, Error> {
        Ok(Arc::new(HashMapStorage::new()))
    }
}

/// The top-level database hub.
///
/// Owns the catalogue of registered databases, memoises one
/// [`Controller`] per database, and carries the process lifecycle:
/// every entry point fails fast with `ShuttingDown` once
/// [`shutdown`](Registry::shutdown) has begun.
pub struct Registry {
    root: Option<PathBuf>,
    databases: DashMap<String, Database>,
    controllers: DashMap<String, Arc<Controller>>,
    factories: DashMap<String, Arc<dyn EngineFactory>>,
    shutdown: Arc<ShutdownController>,
    dirty: AtomicBool,
    controller_init: tokio::sync::Mutex<()>,
}

impl Registry {
    /// Starts a hub.
    ///
    /// With a filesystem root, the catalogue is loaded from
    /// `<root>/databases.json` and a background writer flushes it
    /// hourly; without one, the hub is fully ephemeral.
    ///
    /// # Errors
    ///
    /// Root directory creation and catalogue load errors.
    pub async fn start(root: Option<PathBuf>) -> Result<Arc<Self>, Error> {
        if let Some(root) = &root {
            ensure_dir(root).await?;
        }

        let registry = Arc::new(Self {
            root,
            databases: DashMap::new(),
            controllers: DashMap::new(),
            factories: DashMap::new(),
            shutdown: Arc::new(ShutdownController::new()),
            dirty: AtomicBool::new(false),
            controller_init: tokio::sync::Mutex::new(()),
        });

        registry
            .factories
            .insert(hashmap::STORAGE_TYPE.to_string(), Arc::new(HashMapFactory));

        if let Some(root) = &registry.root {
            let catalogue = persist::load(&persist::catalogue_path(root)).await?;
            let count = catalogue.len();
            for (name, db) in catalogue {
                registry.databases.insert(name, db);
            }
            if count > 0 {
                info!(databases = count, "catalogue loaded");
            }
            tokio::spawn(persist::catalogue_writer(Arc::downgrade(&registry)));
        }

        registry.shutdown.set_ready();
        Ok(registry)
    }

    /// Creates an interface on this hub.
    #[must_use]
    pub fn interface(self: &Arc<Self>, options: Options) -> Interface {
        Interface::new(Arc::clone(self), options)
    }

    fn check_shutdown(&self) -> Result<(), Error> {
        if self.shutdown.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// A receiver signalled when hub shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.receiver()
    }

    /// Registers a database, or refreshes an existing registration
    /// (keeping its original registration timestamp).
    ///
    /// # Errors
    ///
    /// `InvalidName`, `ShuttingDown`.
    pub fn register(&self, db: Database) -> Result<(), Error> {
        self.check_shutdown()?;
        validate_name(&db.name)?;

        match self.databases.get_mut(&db.name) {
            Some(mut existing) => existing.refresh_from(&db),
            None => {
                self.databases.insert(db.name.clone(), db);
            }
        }
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Makes engines of `storage_type` startable by registration.
    pub fn register_engine_factory(&self, storage_type: &str, factory: Arc<dyn EngineFactory>) {
        self.factories.insert(storage_type.to_string(), factory);
    }

    /// A snapshot of one registered database's descriptor.
    #[must_use]
    pub fn get_database(&self, name: &str) -> Option<Database> {
        self.databases.get(name).map(|entry| entry.value().clone())
    }

    /// Snapshots of all registered databases.
    #[must_use]
    pub fn databases(&self) -> Vec<Database> {
        self.databases.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The controller for a registered database, starting its engine on
    /// first use.
    pub(crate) async fn controller(&self, name: &str) -> Result<Arc<Controller>, Error> {
        self.check_shutdown()?;
        if let Some(controller) = self.controllers.get(name) {
            return Ok(Arc::clone(controller.value()));
        }

        // One engine start at a time; re-check after taking the lock.
        let _init = self.controller_init.lock().await;
        if let Some(controller) = self.controllers.get(name) {
            return Ok(Arc::clone(controller.value()));
        }

        let db = self
            .databases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        if db.storage_type == INJECTED_STORAGE_TYPE {
            return Err(Error::Injected(format!(
                "database {name} has no storage bound"
            )));
        }

        let factory = self
            .factories
            .get(&db.storage_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::Storage(anyhow::anyhow!(
                    "unknown storage type {} for database {name}",
                    db.storage_type
                ))
            })?;

        let location = match &self.root {
            Some(root) => {
                let dir = root.join(name).join(&db.storage_type);
                ensure_dir(&dir).await?;
                Some(dir)
            }
            None => None,
        };

        let storage = factory.start(name, location.as_deref()).await?;
        info!(db = name, storage_type = %db.storage_type, "storage started");

        let controller = Arc::new(Controller::new(
            storage,
            db.shadow_delete,
            Arc::clone(&self.shutdown),
        ));
        self.controllers
            .insert(name.to_string(), Arc::clone(&controller));
        if let Some(mut entry) = self.databases.get_mut(name) {
            entry.mark_loaded();
        }
        self.dirty.store(true, Ordering::Relaxed);
        Ok(controller)
    }

    /// Binds an already-running engine to a pre-registered database
    /// whose storage type is `"injected"`.
    ///
    /// # Errors
    ///
    /// `NotRegistered`, `Injected` (wrong storage type, engine not
    /// reporting as injected, or already bound).
    pub async fn inject_database(
        self: &Arc<Self>,
        name: &str,
        storage: Arc<dyn StorageEngine>,
    ) -> Result<InjectionHandle, Error> {
        self.check_shutdown()?;

        if !storage.injected() {
            return Err(Error::Injected(
                "storage does not report as injected".to_string(),
            ));
        }
        let db = self
            .databases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        if db.storage_type != INJECTED_STORAGE_TYPE {
            return Err(Error::Injected(format!(
                "database {name} uses storage type {}, not {INJECTED_STORAGE_TYPE}",
                db.storage_type
            )));
        }

        let controller = Arc::new(Controller::new(
            storage,
            db.shadow_delete,
            Arc::clone(&self.shutdown),
        ));
        match self.controllers.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::Injected(format!("database {name} already bound")));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(controller);
            }
        }

        if let Some(mut entry) = self.databases.get_mut(name) {
            entry.mark_loaded();
        }
        self.dirty.store(true, Ordering::Relaxed);
        info!(db = name, "storage injected");

        Ok(InjectionHandle {
            registry: Arc::clone(self),
            name: name.to_string(),
        })
    }

    /// Notifies a live database's subscribers without storing anything.
    /// Used by runtime providers whose records change out-of-band.
    ///
    /// # Errors
    ///
    /// `NotRegistered` when no controller is live for the record's
    /// database.
    pub fn push_update(&self, record: Arc<dyn Record>) -> Result<(), Error> {
        self.check_shutdown()?;
        let name = record
            .database_name()
            .ok_or(rampart_core::Error::KeyNotSet)?;
        let controller = self
            .controllers
            .get(&name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::NotRegistered(name))?;
        controller.push_update(&record)
    }

    fn live_controllers(&self) -> Vec<(String, Arc<Controller>)> {
        self.controllers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Runs light maintenance on every live database.
    ///
    /// # Errors
    ///
    /// `ShuttingDown`; per-database failures are logged, not fatal.
    pub async fn maintain_all(&self) -> Result<(), Error> {
        self.check_shutdown()?;
        for (name, controller) in self.live_controllers() {
            if let Err(err) = controller.maintain().await {
                warn!(db = %name, %err, "maintenance failed");
            }
        }
        Ok(())
    }

    /// Runs thorough maintenance on every live database.
    ///
    /// # Errors
    ///
    /// `ShuttingDown`; per-database failures are logged, not fatal.
    pub async fn maintain_thorough_all(&self) -> Result<(), Error> {
        self.check_shutdown()?;
        for (name, controller) in self.live_controllers() {
            if let Err(err) = controller.maintain_thorough().await {
                warn!(db = %name, %err, "thorough maintenance failed");
            }
        }
        Ok(())
    }

    /// Sweeps record states on every live database: drops expired
    /// records and purges tombstones older than
    /// [`PURGE_TOMBSTONES_AFTER`].
    ///
    /// # Errors
    ///
    /// `ShuttingDown`; per-database failures are logged, not fatal.
    pub async fn maintain_record_states_all(&self) -> Result<(), Error> {
        self.check_shutdown()?;
        // Threshold fits i64 for any plausible duration constant.
        #[allow(clippy::cast_possible_wrap)]
        let purge_deleted_before = unix_now() - PURGE_TOMBSTONES_AFTER.as_secs() as i64;
        for (name, controller) in self.live_controllers() {
            if let Err(err) = controller.maintain_record_states(purge_deleted_before).await {
                warn!(db = %name, %err, "record state maintenance failed");
            }
        }
        Ok(())
    }

    /// Flushes the catalogue if it changed since the last flush.
    ///
    /// Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Filesystem errors; the catalogue stays dirty for a retry.
    pub async fn flush_catalogue(&self) -> Result<bool, Error> {
        let Some(root) = &self.root else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(false);
        }
        let snapshot: std::collections::HashMap<String, Database> = self
            .databases
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if let Err(err) = persist::store(&persist::catalogue_path(root), &snapshot).await {
            self.dirty.store(true, Ordering::Relaxed);
            return Err(err);
        }
        Ok(true)
    }

    /// Shuts the hub down: broadcasts the signal exactly once, flushes
    /// the catalogue, and stops every live engine. Idempotent.
    pub async fn shutdown(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        info!("database hub shutting down");

        self.dirty.store(true, Ordering::Relaxed);
        if let Err(err) = self.flush_catalogue().await {
            warn!(%err, "final catalogue flush failed");
        }

        for (name, controller) in self.live_controllers() {
            if let Err(err) = controller.storage().shutdown().await {
                warn!(db = %name, %err, "engine shutdown failed");
            }
        }
    }
}

/// A live injected-storage binding. Withdrawing removes the binding but
/// leaves the name registered.
pub struct InjectionHandle {
    registry: Arc<Registry>,
    name: String,
}

impl InjectionHandle {
    /// The bound database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the binding.
    pub fn withdraw(self) {
        self.registry.controllers.remove(&self.name);
        info!(db = %self.name, "injected storage withdrawn");
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| Error::Storage(err.into()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|err| Error::Storage(err.into()))?;
    }
    Ok(())
}
