//! Errors surfaced by the database layer.

/// Errors returned by controllers, interfaces, engines, and the runtime
/// registry.
///
/// Variants are matchable; engine errors that are not one of the known
/// kinds pass through unchanged inside `Storage`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key absent, or present but invalid (expired / tombstoned), or
    /// hidden by a write-only runtime provider.
    #[error("record not found")]
    NotFound,

    /// The record exists but the interface flags fail its permission
    /// check.
    #[error("permission denied")]
    PermissionDenied,

    /// Write attempted on a read-only storage.
    #[error("storage is read-only")]
    ReadOnly,

    /// Read attempted on a write-only runtime provider.
    #[error("provider is write-only")]
    WriteOnly,

    /// The database hub is shutting down.
    #[error("shutting down")]
    ShuttingDown,

    /// The storage does not implement the requested optional capability.
    #[error("not implemented by this storage")]
    NotImplemented,

    /// A batch stopped being fed and timed out.
    #[error("batch timed out")]
    Timeout,

    /// Runtime registration collides with an existing provider.
    #[error("key or prefix already taken by {0}")]
    KeyTaken(String),

    /// No runtime provider is responsible for the key.
    #[error("no provider manages key {0}")]
    KeyUnmanaged(String),

    /// Injected-storage binding error (missing, duplicate, or
    /// mismatched).
    #[error("injected storage: {0}")]
    Injected(String),

    /// The database name does not satisfy `^[A-Za-z0-9_-]{3,}$`.
    #[error("invalid database name: {0}")]
    InvalidName(String),

    /// The database name is not registered.
    #[error("database not registered: {0}")]
    NotRegistered(String),

    /// Codec or record-model error from the core layer.
    #[error(transparent)]
    Codec(#[from] rampart_core::Error),

    /// Engine error passed through unchanged.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Whether this is the `NotFound` kind.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}
