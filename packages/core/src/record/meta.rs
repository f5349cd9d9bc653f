//! Record metadata: timestamps, tombstone/TTL semantics, permission flags.

use serde::{Deserialize, Serialize};

use crate::dsd::GenCode;
use crate::error::Error;

/// Current Unix time in seconds.
///
/// Seconds fit in i64 for any plausible wall clock.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Metadata attached to every record.
///
/// Timestamps are Unix seconds. `deleted` doubles as the tombstone marker
/// (`> 0`: deleted at that time) and the relative-TTL carrier (`< 0`:
/// every [`update`](Meta::update) pushes `expires` to `now + |deleted|`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Set on first update.
    pub created: i64,
    /// Set on every update.
    pub modified: i64,
    /// Absolute expiry; 0 = never.
    pub expires: i64,
    /// Tombstone (`> 0`) or relative TTL in seconds (`< 0`); 0 = live.
    pub deleted: i64,
    /// Readable only through internal interfaces.
    #[serde(default)]
    pub secret: bool,
    /// Readable only through local interfaces.
    #[serde(default)]
    pub crownjewel: bool,
}

/// Fixed GenCode size: four little-endian i64 timestamps + two flag bytes.
pub const META_GENCODE_SIZE: usize = 34;

impl Meta {
    /// Stamps the meta for a write: sets `created` on first call,
    /// `modified` always, and recomputes `expires` from a relative TTL.
    pub fn update(&mut self) {
        let now = unix_now();
        if self.deleted < 0 {
            self.expires = now - self.deleted;
        }
        self.modified = now;
        if self.created == 0 {
            self.created = now;
        }
    }

    /// Clears all timestamps, preserving the permission flags.
    pub fn reset(&mut self) {
        self.created = 0;
        self.modified = 0;
        self.expires = 0;
        self.deleted = 0;
    }

    /// Marks the record as deleted now.
    pub fn delete(&mut self) {
        self.deleted = unix_now();
    }

    /// Whether the record is tombstoned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted > 0
    }

    /// Sets an absolute expiry time, clearing any relative TTL.
    pub fn set_absolute_expiry(&mut self, expires: i64) {
        self.expires = expires;
        self.deleted = 0;
    }

    /// Sets a relative TTL in seconds, applied on every update.
    pub fn set_relative_expiry(&mut self, seconds: i64) {
        self.deleted = -seconds;
    }

    /// The relative TTL in seconds, if one is set.
    #[must_use]
    pub fn relative_expiry(&self) -> Option<i64> {
        if self.deleted < 0 {
            Some(-self.deleted)
        } else {
            None
        }
    }

    /// Whether the record is neither tombstoned nor expired.
    #[must_use]
    pub fn check_validity(&self) -> bool {
        if self.deleted > 0 {
            return false;
        }
        if self.expires > 0 && self.expires < unix_now() {
            return false;
        }
        true
    }

    /// Whether an interface with the given flags may read this record.
    #[must_use]
    pub fn check_permission(&self, local: bool, internal: bool) -> bool {
        (!self.secret || internal) && (!self.crownjewel || local)
    }
}

impl GenCode for Meta {
    fn gencode_size(&self) -> usize {
        META_GENCODE_SIZE
    }

    fn gencode_marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(META_GENCODE_SIZE);
        out.extend_from_slice(&self.created.to_le_bytes());
        out.extend_from_slice(&self.modified.to_le_bytes());
        out.extend_from_slice(&self.expires.to_le_bytes());
        out.extend_from_slice(&self.deleted.to_le_bytes());
        out.push(u8::from(self.secret));
        out.push(u8::from(self.crownjewel));
        out
    }

    fn gencode_unmarshal(&mut self, data: &[u8]) -> Result<usize, Error> {
        if data.len() < META_GENCODE_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let ts = |range: std::ops::Range<usize>| {
            i64::from_le_bytes(data[range].try_into().expect("checked length"))
        };
        self.created = ts(0..8);
        self.modified = ts(8..16);
        self.expires = ts(16..24);
        self.deleted = ts(24..32);
        self.secret = data[32] != 0;
        self.crownjewel = data[33] != 0;
        Ok(META_GENCODE_SIZE)
    }
}
