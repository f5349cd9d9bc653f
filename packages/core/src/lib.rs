//! Rampart Core -- record model, DSD codec, container buffer, and query
//! language.
//!
//! This crate is the pure data layer beneath the Rampart database:
//!
//! - **Container** ([`container`]): chunked byte buffer carrying the
//!   marshalled record envelope
//! - **Varint** ([`varint`]): unsigned LEB128 with width-checked variants
//! - **DSD** ([`dsd`]): self-describing serialization (format tag + body,
//!   optional gzip wrap, Accept-header negotiation)
//! - **Record** ([`record`]): `Meta`, `Base`, the `Record` trait, and the
//!   opaque `Wrapper` variant
//! - **Query** ([`query`]): prefix-scoped predicate trees over record
//!   attributes

pub mod container;
pub mod dsd;
pub mod error;
pub mod query;
pub mod record;
pub mod varint;

// Container
pub use container::Container;

// Error
pub use error::Error;

// DSD
pub use dsd::{Format, GenCode};

// Record
pub use record::{unix_now, Base, Key, Meta, Record, Wrapper, RECORD_VERSION};

// Query
pub use query::{Accessor, Condition, IsValue, Operand, Operator, Query};
