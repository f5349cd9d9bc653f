//! The record contract and its concrete variants.
//!
//! A record is key + [`Meta`] + payload. Application code defines typed
//! records by embedding [`Base`] (skipped during serde) and implementing
//! [`Record`]; the database hands records back as [`Wrapper`]s, which
//! carry the payload opaquely until [`Wrapper::unwrap_into`] decodes it
//! into a typed record. Records flow through the system as
//! `Arc<dyn Record>`.

pub mod base;
pub mod meta;
pub mod wrapper;

use std::fmt;

use crate::container::Container;
use crate::dsd::{Format, GenCode};
use crate::error::Error;

pub use base::{Base, Key};
pub use meta::{unix_now, Meta, META_GENCODE_SIZE};
pub use wrapper::Wrapper;

/// Version byte of the marshalled record envelope.
pub const RECORD_VERSION: u8 = 1;

/// The polymorphic record contract.
///
/// `payload` and `attributes` are the only methods a typed record has to
/// implement itself (plus `base`); everything else is provided on top of
/// the shared [`Base`] state.
pub trait Record: fmt::Debug + Send + Sync {
    /// The shared key/meta state.
    fn base(&self) -> &Base;

    /// The DSD-tagged payload (`varint(format) || body`).
    ///
    /// # Errors
    ///
    /// `IncompatibleFormat` when the record cannot produce the requested
    /// format.
    fn payload(&self, format: Format) -> Result<Vec<u8>, Error>;

    /// A generic attribute view for query evaluation, when the payload
    /// has one.
    fn attributes(&self) -> Option<serde_json::Value>;

    /// Whether this record carries its payload opaquely.
    fn is_wrapped(&self) -> bool {
        false
    }

    /// The full `<dbName>:<dbKey>` key, if set.
    fn key(&self) -> Option<String> {
        self.base().key().map(|k| k.to_string())
    }

    /// The database name part of the key, if set.
    fn database_name(&self) -> Option<String> {
        self.base().key().map(|k| k.database_name().to_string())
    }

    /// The intra-database key part, if set.
    fn database_key(&self) -> Option<String> {
        self.base().key().map(|k| k.database_key().to_string())
    }

    /// Sets the key, once.
    ///
    /// # Errors
    ///
    /// `KeyAlreadySet` / `MalformedKey`.
    fn set_key(&self, key: &str) -> Result<(), Error> {
        self.base().set_key(key)
    }

    /// A consistent snapshot of the meta.
    fn meta(&self) -> Meta {
        self.base().meta()
    }

    /// Replaces the meta.
    fn set_meta(&self, meta: Meta) {
        self.base().set_meta(meta);
    }

    /// Stamps the meta for a write.
    fn update_meta(&self) {
        self.base().update_meta();
    }

    /// Tombstones the record.
    fn mark_deleted(&self) {
        self.base().with_meta(meta::Meta::delete);
    }

    /// The tagged payload, or `None` for a tombstoned record.
    ///
    /// # Errors
    ///
    /// See [`Record::payload`].
    fn marshal_payload(&self, format: Format) -> Result<Option<Vec<u8>>, Error> {
        if self.meta().is_deleted() {
            return Ok(None);
        }
        self.payload(format).map(Some)
    }

    /// The full record envelope:
    /// `version || varint(len(meta)) || meta || [payload]`.
    ///
    /// The payload section is omitted for tombstoned records.
    ///
    /// # Errors
    ///
    /// Payload marshalling errors.
    fn marshal_record(&self) -> Result<Vec<u8>, Error> {
        let meta = self.meta();
        let mut envelope = Container::with(vec![RECORD_VERSION]);
        envelope.append_as_block(meta.gencode_marshal());
        if !meta.is_deleted() {
            envelope.append(self.payload(Format::Auto)?);
        }
        Ok(envelope.compile_data().to_vec())
    }
}
