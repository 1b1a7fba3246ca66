//! RocksDB-backed cluster table
//!
//! # Schema Design
//!
//! **Clusters Column Family:**
//! - Key: cluster name (UTF-8 bytes)
//! - Value: JSON-serialized `ClusterRecord`
//!
//! Writes are synced to disk before returning, reads of the whole table go
//! through a RocksDB snapshot so recovery sees a single point in time.

use super::{ClusterRecord, ClusterStore, StoreError};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use std::collections::BTreeMap;
use std::path::Path;

const CF_CLUSTERS: &str = "clusters";

/// Persistent cluster table stored in RocksDB
#[derive(Debug)]
pub struct RocksDBStore {
    db: DB,
}

impl RocksDBStore {
    /// Open the database at `path`, creating it if missing
    ///
    /// # Returns
    /// * `Ok(RocksDBStore)` - Successfully created/opened storage
    /// * `Err(StoreError::Backend)` - The database could not be opened
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![ColumnFamilyDescriptor::new(CF_CLUSTERS, Options::default())];
        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cfs).map_err(backend)?;

        Ok(Self { db })
    }

    fn clusters_cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_CLUSTERS)
            .ok_or_else(|| StoreError::Backend(format!("column family {} missing", CF_CLUSTERS)))
    }

    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl ClusterStore for RocksDBStore {
    fn create_or_update(&self, name: &str, record: &ClusterRecord) -> Result<(), StoreError> {
        let cf = self.clusters_cf()?;
        let value = record.encode()?;
        self.db
            .put_cf_opt(cf, name.as_bytes(), value, &Self::sync_writes())
            .map_err(backend)
    }

    fn get(&self, name: &str) -> Result<ClusterRecord, StoreError> {
        let cf = self.clusters_cf()?;
        match self.db.get_cf(cf, name.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(ClusterRecord::decode(&bytes)?),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    fn list(&self) -> Result<BTreeMap<String, ClusterRecord>, StoreError> {
        let cf = self.clusters_cf()?;
        let snapshot = self.db.snapshot();

        let mut records = BTreeMap::new();
        for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(backend)?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Codec(format!("invalid cluster key: {}", e)))?;
            records.insert(name, ClusterRecord::decode(&value)?);
        }
        Ok(records)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let cf = self.clusters_cf()?;
        self.db
            .delete_cf_opt(cf, name.as_bytes(), &Self::sync_writes())
            .map_err(backend)
    }
}
