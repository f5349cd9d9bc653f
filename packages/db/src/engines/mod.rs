//! Built-in storage engines.
//!
//! Only the in-memory reference engine lives in-tree; persistent engines
//! are supplied by collaborators against the
//! [`StorageEngine`](crate::storage::StorageEngine) contract.

pub mod hashmap;

pub use hashmap::HashMapStorage;
