//! Catalogue persistence: atomic JSON snapshots of the registered
//! databases, flushed by a background writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;

use super::database::Database;
use super::Registry;

/// Catalogue file name inside the hub root.
pub const CATALOGUE_FILE: &str = "databases.json";

/// How often the background writer flushes a dirty catalogue.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The catalogue path for a hub root.
pub(crate) fn catalogue_path(root: &Path) -> PathBuf {
    root.join(CATALOGUE_FILE)
}

/// Loads the catalogue, treating a missing file as empty.
pub(crate) async fn load(path: &Path) -> Result<HashMap<String, Database>, Error> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(Error::Storage(err.into())),
    };
    serde_json::from_slice(&raw).map_err(|err| Error::Storage(err.into()))
}

/// Writes the catalogue atomically: temp file, mode 0600, rename.
pub(crate) async fn store(
    path: &Path,
    databases: &HashMap<String, Database>,
) -> Result<(), Error> {
    let encoded =
        serde_json::to_vec_pretty(databases).map_err(|err| Error::Storage(err.into()))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &encoded)
        .await
        .map_err(|err| Error::Storage(err.into()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|err| Error::Storage(err.into()))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|err| Error::Storage(err.into()))
}

/// Background writer: flushes the catalogue on a ticker until the hub
/// shuts down or is dropped. Write failures are logged and retried on
/// the next tick.
pub(crate) async fn catalogue_writer(registry: Weak<Registry>) {
    let mut shutdown = match registry.upgrade() {
        Some(registry) => registry.shutdown_receiver(),
        None => return,
    };
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else { return };
                match registry.flush_catalogue().await {
                    Ok(flushed) => {
                        if flushed {
                            debug!("catalogue flushed");
                        }
                    }
                    Err(err) => warn!(%err, "catalogue flush failed, retrying next tick"),
                }
            }
            // Shutdown flushes the catalogue itself; the writer just stops.
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_catalogue_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&catalogue_path(dir.path())).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = catalogue_path(dir.path());

        let mut databases = HashMap::new();
        databases.insert(
            "core".to_string(),
            Database::new("core", "core config", "hashmap", true),
        );
        databases.insert(
            "runtime".to_string(),
            Database::new("runtime", "virtual records", "injected", true),
        );

        store(&path, &databases).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["core"].storage_type, "hashmap");
        assert_eq!(loaded["runtime"].storage_type, "injected");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn catalogue_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = catalogue_path(dir.path());
        store(&path, &HashMap::new()).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn store_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = catalogue_path(dir.path());

        let mut databases = HashMap::new();
        databases.insert(
            "one".to_string(),
            Database::new("one", "", "hashmap", true),
        );
        store(&path, &databases).await.unwrap();

        databases.clear();
        databases.insert(
            "two".to_string(),
            Database::new("two", "", "hashmap", true),
        );
        store(&path, &databases).await.unwrap();

        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("two"));
    }
}
