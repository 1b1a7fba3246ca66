//! Persistent Store
//!
//! Durable table of `ClusterRecord`s keyed by cluster name. Every operation
//! is atomic for a single record; the registry relies on that to write a
//! record before the workflow depending on it is dispatched.

pub mod memory;
pub mod record;
pub mod rocksdb_store;

pub use memory::MemStore;
pub use record::ClusterRecord;
pub use rocksdb_store::RocksDBStore;

use std::collections::BTreeMap;
use std::fmt;

/// Errors raised by a `ClusterStore`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// No record under this name
    NotFound(String),
    /// The backing database failed
    Backend(String),
    /// A record could not be encoded or decoded
    Codec(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(name) => write!(f, "cluster record {} not found", name),
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
            StoreError::Codec(msg) => write!(f, "cluster record codec error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Table-style access to durable cluster records
pub trait ClusterStore: Send + Sync + 'static {
    /// Insert or overwrite the record stored under `name`
    fn create_or_update(&self, name: &str, record: &ClusterRecord) -> Result<(), StoreError>;

    fn get(&self, name: &str) -> Result<ClusterRecord, StoreError>;

    /// All records, read from one consistent view of the table
    fn list(&self) -> Result<BTreeMap<String, ClusterRecord>, StoreError>;

    fn delete(&self, name: &str) -> Result<(), StoreError>;
}
