//! DSD: dynamic self-describing serialization.
//!
//! A DSD payload is `varint(format) || body`. The format tag selects the
//! codec (JSON, YAML, CBOR, MsgPack, GenCode, raw); a compression tag
//! (gzip) wraps another DSD payload. [`dump`] and [`load`] are the
//! serde-driven entry points; fixed-layout types go through the
//! [`GenCode`](gencode::GenCode) trait instead.

pub mod gencode;
pub mod http;

use std::io::Read;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::varint;

pub use gencode::GenCode;

/// A serialization (or compression) format, identified by a one-byte tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Format {
    /// Placeholder that resolves to the configured default.
    Auto = 0,
    /// Raw bytes, no serialization.
    Raw = 1,
    /// CBOR via `ciborium`.
    Cbor = 67,
    /// Fixed-layout binary encoding via the [`GenCode`] trait.
    GenCode = 71,
    /// JSON via `serde_json`.
    Json = 74,
    /// MsgPack via `rmp-serde`.
    MsgPack = 77,
    /// YAML via `serde_yaml`.
    Yaml = 89,
    /// Gzip compression wrapping another DSD payload.
    Gzip = 90,
}

/// Default format used when a caller passes [`Format::Auto`].
pub const DEFAULT_SERIALIZATION_FORMAT: Format = Format::Json;

/// Default compression used when a caller passes [`Format::Auto`] to
/// [`dump_and_compress`].
pub const DEFAULT_COMPRESSION_FORMAT: Format = Format::Gzip;

impl Format {
    /// Maps a tag byte back to its format.
    ///
    /// # Errors
    ///
    /// `UnknownFormat` for unassigned tags.
    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(Format::Auto),
            1 => Ok(Format::Raw),
            67 => Ok(Format::Cbor),
            71 => Ok(Format::GenCode),
            74 => Ok(Format::Json),
            77 => Ok(Format::MsgPack),
            89 => Ok(Format::Yaml),
            90 => Ok(Format::Gzip),
            other => Err(Error::UnknownFormat(other)),
        }
    }

    /// The one-byte tag identifying this format.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this tag identifies a compression layer rather than a
    /// serialization codec.
    #[must_use]
    pub fn is_compression(self) -> bool {
        self == Format::Gzip
    }

    /// Resolves [`Format::Auto`] to the default serialization format.
    #[must_use]
    pub fn resolve(self) -> Self {
        if self == Format::Auto {
            DEFAULT_SERIALIZATION_FORMAT
        } else {
            self
        }
    }
}

/// Serializes `value` to a bare body in `format`, without the tag.
///
/// # Errors
///
/// `IncompatibleFormat` for formats the serde path cannot produce
/// (raw, GenCode, compression tags).
pub fn serialize<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>, Error> {
    match format.resolve() {
        Format::Json => Ok(serde_json::to_vec(value)?),
        Format::Yaml => {
            let s = serde_yaml::to_string(value)?;
            Ok(s.into_bytes())
        }
        Format::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
        Format::Cbor => {
            let mut out = Vec::new();
            ciborium::into_writer(value, &mut out)?;
            Ok(out)
        }
        _ => Err(Error::IncompatibleFormat),
    }
}

/// Deserializes a bare body in `format` into `T`.
///
/// # Errors
///
/// `IsRaw` when the body is raw bytes; `IncompatibleFormat` for
/// non-serde formats.
pub fn deserialize<T: DeserializeOwned>(format: Format, body: &[u8]) -> Result<T, Error> {
    match format.resolve() {
        Format::Json => Ok(serde_json::from_slice(body)?),
        Format::Yaml => Ok(serde_yaml::from_slice(body)?),
        Format::MsgPack => Ok(rmp_serde::from_slice(body)?),
        Format::Cbor => Ok(ciborium::from_reader(body)?),
        Format::Raw => Err(Error::IsRaw),
        _ => Err(Error::IncompatibleFormat),
    }
}

/// Serializes `value` as a tagged DSD payload: `varint(format) || body`.
///
/// # Errors
///
/// See [`serialize`].
pub fn dump<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>, Error> {
    let format = format.resolve();
    let body = serialize(value, format)?;
    let mut out = varint::pack(u64::from(format.tag()));
    out.extend(body);
    Ok(out)
}

/// Serializes and gzip-wraps `value`:
/// `varint(GZIP) || gzip(varint(format) || body)`.
///
/// # Errors
///
/// `IncompatibleFormat` if `compression` is not a compression format.
pub fn dump_and_compress<T: Serialize>(
    value: &T,
    format: Format,
    compression: Format,
) -> Result<Vec<u8>, Error> {
    let compression = if compression == Format::Auto {
        DEFAULT_COMPRESSION_FORMAT
    } else {
        compression
    };
    if !compression.is_compression() {
        return Err(Error::IncompatibleFormat);
    }

    let inner = dump(value, format)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &inner)?;
    let compressed = encoder.finish()?;

    let mut out = varint::pack(u64::from(compression.tag()));
    out.extend(compressed);
    Ok(out)
}

/// Reads the format tag of a DSD payload without decoding the body.
///
/// # Errors
///
/// `BufferTooSmall` on an empty payload, `UnknownFormat` on an
/// unassigned tag.
pub fn format_of(data: &[u8]) -> Result<Format, Error> {
    let (tag, _) = varint::unpack(data)?;
    let tag = u8::try_from(tag).map_err(|_| Error::VarintExceedsWidth)?;
    Format::from_tag(tag)
}

/// Decodes a tagged DSD payload into `T`.
///
/// A compression tag is unwrapped once, then the inner payload is decoded.
///
/// # Errors
///
/// `UnknownFormat` on an unassigned tag, `IsRaw` for raw payloads,
/// decoder errors otherwise.
pub fn load<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    let (tag, n) = varint::unpack(data)?;
    let tag = u8::try_from(tag).map_err(|_| Error::VarintExceedsWidth)?;
    let format = Format::from_tag(tag)?;

    if format.is_compression() {
        let decompressed = decompress(format, &data[n..])?;
        let (inner_tag, inner_n) = varint::unpack(&decompressed)?;
        let inner_tag = u8::try_from(inner_tag).map_err(|_| Error::VarintExceedsWidth)?;
        let inner_format = Format::from_tag(inner_tag)?;
        if inner_format.is_compression() {
            return Err(Error::IncompatibleFormat);
        }
        return deserialize(inner_format, &decompressed[inner_n..]);
    }

    if format == Format::Auto {
        return Err(Error::UnknownFormat(0));
    }
    deserialize(format, &data[n..])
}

fn decompress(format: Format, body: &[u8]) -> Result<Vec<u8>, Error> {
    match format {
        Format::Gzip => {
            let mut decoder = GzDecoder::new(body);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        _ => Err(Error::IncompatibleFormat),
    }
}
