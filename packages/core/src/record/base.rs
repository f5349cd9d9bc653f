//! Shared record state: the set-once key and the meta behind the
//! record's own lock.

use std::fmt;

use parking_lot::RwLock;

use crate::error::Error;

use super::meta::Meta;

/// A parsed record key: `<dbName>:<dbKey>`.
///
/// The database name is everything before the first `:`; the rest is the
/// opaque intra-database key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    database_name: String,
    database_key: String,
}

impl Key {
    /// Parses a full `<dbName>:<dbKey>` key.
    ///
    /// # Errors
    ///
    /// `MalformedKey` when the separator is missing or either part is
    /// empty.
    pub fn parse(key: &str) -> Result<Self, Error> {
        match key.split_once(':') {
            Some((name, db_key)) if !name.is_empty() && !db_key.is_empty() => Ok(Self {
                database_name: name.to_string(),
                database_key: db_key.to_string(),
            }),
            _ => Err(Error::MalformedKey(key.to_string())),
        }
    }

    /// Builds a key from its two parts.
    #[must_use]
    pub fn from_parts(database_name: &str, database_key: &str) -> Self {
        Self {
            database_name: database_name.to_string(),
            database_key: database_key.to_string(),
        }
    }

    /// The database name part.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The intra-database key part.
    #[must_use]
    pub fn database_key(&self) -> &str {
        &self.database_key
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database_name, self.database_key)
    }
}

/// Key and meta shared by every record variant.
///
/// The meta sits behind the record's own lock, so every read is a
/// consistent snapshot and concurrent observers (subscription fan-out
/// included) never see a half-written meta. Guards are scoped to the
/// accessor calls and never escape.
#[derive(Default)]
pub struct Base {
    key: RwLock<Option<Key>>,
    meta: RwLock<Meta>,
}

impl Base {
    /// Creates an unkeyed base with default meta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a base with the key already set.
    ///
    /// # Errors
    ///
    /// `MalformedKey` if `key` does not parse.
    pub fn with_key(key: &str) -> Result<Self, Error> {
        let base = Self::new();
        base.set_key(key)?;
        Ok(base)
    }

    /// A snapshot of the key, if set.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.key.read().clone()
    }

    /// Whether a key has been set.
    #[must_use]
    pub fn has_key(&self) -> bool {
        self.key.read().is_some()
    }

    /// Sets the key. A key is settable exactly once.
    ///
    /// # Errors
    ///
    /// `KeyAlreadySet` on a second set; `MalformedKey` if `key` does not
    /// parse.
    pub fn set_key(&self, key: &str) -> Result<(), Error> {
        self.adopt_key(Key::parse(key)?)
    }

    /// Sets an already-parsed key, once.
    ///
    /// # Errors
    ///
    /// `KeyAlreadySet` on a second set.
    pub fn adopt_key(&self, key: Key) -> Result<(), Error> {
        let mut slot = self.key.write();
        if slot.is_some() {
            return Err(Error::KeyAlreadySet);
        }
        *slot = Some(key);
        Ok(())
    }

    /// Clears the key so it can be set again. Resetting is explicit;
    /// plain `set_key` never overwrites.
    pub fn reset_key(&self) {
        *self.key.write() = None;
    }

    /// A consistent snapshot of the meta.
    #[must_use]
    pub fn meta(&self) -> Meta {
        self.meta.read().clone()
    }

    /// Replaces the meta.
    pub fn set_meta(&self, meta: Meta) {
        *self.meta.write() = meta;
    }

    /// Stamps the meta for a write (see [`Meta::update`]).
    pub fn update_meta(&self) {
        self.meta.write().update();
    }

    /// Runs `f` on the meta under the record's lock.
    pub fn with_meta<R>(&self, f: impl FnOnce(&mut Meta) -> R) -> R {
        f(&mut self.meta.write())
    }
}

impl Clone for Base {
    fn clone(&self) -> Self {
        Self {
            key: RwLock::new(self.key()),
            meta: RwLock::new(self.meta()),
        }
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Base")
            .field("key", &self.key())
            .field("meta", &self.meta())
            .finish()
    }
}
