//! Error type shared by the container, codec, record, and query layers.

/// Errors produced by the core data layer.
///
/// Variants are matchable so callers can distinguish codec problems
/// (`UnknownFormat`, `IncompatibleFormat`) from buffer problems
/// (`BufferTooSmall`) without string inspection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The buffer does not hold enough bytes for the requested operation.
    #[error("buffer too small")]
    BufferTooSmall,

    /// A varint decoded to a value that does not fit the requested width.
    #[error("encoded integer exceeds width")]
    VarintExceedsWidth,

    /// A format tag that does not map to any known serialization format.
    #[error("unknown serialization format: {0}")]
    UnknownFormat(u8),

    /// The requested format cannot represent the value, or disagrees with
    /// the format a payload was stored in.
    #[error("incompatible serialization format")]
    IncompatibleFormat,

    /// The payload is raw bytes, not a serialized object.
    #[error("payload is raw data")]
    IsRaw,

    /// A record key may only be set once.
    #[error("record key already set")]
    KeyAlreadySet,

    /// The operation requires a key but none has been set.
    #[error("record key not set")]
    KeyNotSet,

    /// The key string does not have the `<dbName>:<dbKey>` shape.
    #[error("malformed record key: {0}")]
    MalformedKey(String),

    /// A marshalled record envelope failed structural validation.
    #[error("invalid record envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// A query failed syntax validation.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("cbor encode: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor decode: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
