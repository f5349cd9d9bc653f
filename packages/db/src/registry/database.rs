//! Registered database descriptors.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use rampart_core::unix_now;

use crate::error::Error;

/// Storage type of databases bound at runtime via
/// [`inject_database`](crate::registry::Registry::inject_database).
pub const INJECTED_STORAGE_TYPE: &str = "injected";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_-]{3,}$").expect("static pattern"))
}

/// Validates a database name against `^[A-Za-z0-9_-]{3,}$`.
///
/// # Errors
///
/// `InvalidName` when the name does not match.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Catalogue entry describing one registered database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Registered name; also the first segment of every record key.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// Engine selector (e.g. `"hashmap"`, `"injected"`).
    pub storage_type: String,
    /// Whether deletions are retained as tombstones until maintenance.
    pub shadow_delete: bool,
    /// When the database was first registered (Unix seconds).
    pub registered: i64,
    /// When the registration was last refreshed.
    pub last_updated: i64,
    /// When the engine was last started.
    pub last_loaded: i64,
}

impl Database {
    /// Creates a descriptor stamped as registered now.
    #[must_use]
    pub fn new(name: &str, description: &str, storage_type: &str, shadow_delete: bool) -> Self {
        let now = unix_now();
        Self {
            name: name.to_string(),
            description: description.to_string(),
            storage_type: storage_type.to_string(),
            shadow_delete,
            registered: now,
            last_updated: now,
            last_loaded: 0,
        }
    }

    /// Refreshes this descriptor from a re-registration, keeping the
    /// original registration and load timestamps.
    pub(crate) fn refresh_from(&mut self, updated: &Database) {
        self.description = updated.description.clone();
        self.storage_type = updated.storage_type.clone();
        self.shadow_delete = updated.shadow_delete;
        self.last_updated = unix_now();
    }

    /// Stamps the descriptor as loaded now.
    pub(crate) fn mark_loaded(&mut self) {
        self.last_loaded = unix_now();
    }
}
