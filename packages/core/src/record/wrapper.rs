//! Opaque-payload record variant.
//!
//! A [`Wrapper`] is used when a payload is loaded before its concrete
//! schema is known: the storage layer parses the envelope, keeps the
//! payload bytes and their format tag, and the caller decodes them into a
//! typed record later via [`Wrapper::unwrap_into`].

use serde::de::DeserializeOwned;

use crate::container::Container;
use crate::dsd::{self, Format, GenCode};
use crate::error::Error;
use crate::varint;

use super::base::Base;
use super::meta::Meta;
use super::{Record, RECORD_VERSION};

/// A record whose payload is opaque bytes in a remembered format.
#[derive(Debug, Clone)]
pub struct Wrapper {
    base: Base,
    format: Format,
    data: Vec<u8>,
}

impl Wrapper {
    /// Wraps a tagged DSD payload under the given full key.
    ///
    /// # Errors
    ///
    /// `MalformedKey` / tag decoding errors.
    pub fn new(key: &str, tagged_payload: &[u8]) -> Result<Self, Error> {
        let (tag, n) = varint::unpack(tagged_payload)?;
        let tag = u8::try_from(tag).map_err(|_| Error::VarintExceedsWidth)?;
        let format = Format::from_tag(tag)?;
        Ok(Self {
            base: Base::with_key(key)?,
            format,
            data: tagged_payload[n..].to_vec(),
        })
    }

    /// Parses a marshalled record envelope into a wrapper.
    ///
    /// Restores version, meta, format tag, and payload body. Tombstoned
    /// envelopes carry no payload section.
    ///
    /// # Errors
    ///
    /// `InvalidEnvelope` on version or structure mismatch.
    pub fn from_envelope(
        database_name: &str,
        database_key: &str,
        envelope: &[u8],
    ) -> Result<Self, Error> {
        let mut c = Container::with(envelope.to_vec());

        let version = c.get(1)?[0];
        if version != RECORD_VERSION {
            return Err(Error::InvalidEnvelope("unsupported version"));
        }

        let meta_section = c.get_next_block()?;
        let mut meta = Meta::default();
        meta.gencode_unmarshal(&meta_section)?;

        let (format, data) = if meta.is_deleted() {
            (Format::Raw, Vec::new())
        } else {
            let tag = c.get(1).map_err(|_| Error::InvalidEnvelope("missing payload"))?[0];
            (Format::from_tag(tag)?, c.get_all())
        };

        let base = Base::new();
        base.adopt_key(super::Key::from_parts(database_name, database_key))?;
        base.set_meta(meta);

        Ok(Self { base, format, data })
    }

    /// The format the payload was stored in.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// The bare payload body, without the format tag.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the payload into a typed record, copying key and meta
    /// onto it.
    ///
    /// # Errors
    ///
    /// `InvalidEnvelope` for tombstoned wrappers (they have no payload);
    /// decode errors otherwise.
    pub fn unwrap_into<T>(&self) -> Result<T, Error>
    where
        T: Record + DeserializeOwned,
    {
        if self.meta().is_deleted() {
            return Err(Error::InvalidEnvelope("deleted record has no payload"));
        }
        let target: T = dsd::deserialize(self.format, &self.data)?;
        if let Some(key) = self.base.key() {
            target.base().reset_key();
            target.base().adopt_key(key)?;
        }
        target.set_meta(self.meta());
        Ok(target)
    }
}

impl Record for Wrapper {
    fn base(&self) -> &Base {
        &self.base
    }

    fn payload(&self, format: Format) -> Result<Vec<u8>, Error> {
        // The payload is opaque: it can only be re-emitted in the format
        // it was stored in.
        if format != Format::Auto && format.resolve() != self.format {
            return Err(Error::IncompatibleFormat);
        }
        let mut out = varint::pack(u64::from(self.format.tag()));
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    fn attributes(&self) -> Option<serde_json::Value> {
        match self.format {
            Format::Json | Format::Yaml | Format::Cbor | Format::MsgPack => {
                dsd::deserialize(self.format, &self.data).ok()
            }
            _ => None,
        }
    }

    fn is_wrapped(&self) -> bool {
        true
    }
}
