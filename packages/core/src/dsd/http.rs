//! Format negotiation against HTTP Accept headers.
//!
//! Only negotiation lives here; the HTTP surface itself belongs to the
//! platform layers above this crate.

use crate::error::Error;

use super::{Format, DEFAULT_SERIALIZATION_FORMAT};

/// Media type served for each negotiable format.
#[must_use]
pub fn media_type(format: Format) -> &'static str {
    match format.resolve() {
        Format::Cbor => "application/cbor",
        Format::MsgPack => "application/msgpack",
        Format::Yaml => "application/yaml",
        Format::Raw | Format::Gzip | Format::GenCode => "application/octet-stream",
        _ => "application/json",
    }
}

/// Chooses a serialization format from an HTTP Accept header.
///
/// An empty header yields [`Format::Auto`], leaving the choice to the
/// caller. A wildcard entry falls back to the default format. Otherwise
/// the first recognised media type wins.
///
/// # Errors
///
/// `IncompatibleFormat` when the header names only unknown media types
/// and no wildcard.
pub fn format_from_accept(accept: &str) -> Result<Format, Error> {
    if accept.trim().is_empty() {
        return Ok(Format::Auto);
    }

    for entry in accept.split(',') {
        // Quality parameters are ignored: first listed match wins.
        let media = entry.split(';').next().unwrap_or("").trim();
        match media {
            "*" | "*/*" | "application/*" | "text/*" => {
                return Ok(DEFAULT_SERIALIZATION_FORMAT)
            }
            "application/json" | "text/json" => return Ok(Format::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" => {
                return Ok(Format::Yaml)
            }
            "application/cbor" => return Ok(Format::Cbor),
            "application/msgpack" | "application/x-msgpack" => return Ok(Format::MsgPack),
            "application/octet-stream" => return Ok(Format::Raw),
            _ => {}
        }
    }

    Err(Error::IncompatibleFormat)
}
