//! Runtime-computed records: providers synthesise records on demand
//! instead of persisting them.
//!
//! A [`RuntimeRegistry`] multiplexes providers by key prefix and is
//! injected as the storage engine of a database with storage type
//! `"injected"`, so callers use the ordinary interface operations
//! against virtual records.

pub mod provider;
pub mod registry;
pub mod single;

pub use provider::RuntimeProvider;
pub use registry::RuntimeRegistry;
pub use single::SingleRecordProvider;
