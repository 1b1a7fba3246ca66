use super::{ClusterRecord, ClusterStore, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Volatile store for tests and dry runs
///
/// Records are kept encoded so a read never shares state with a write, the
/// same as a real backend. `set_unavailable` makes every call fail.
#[derive(Debug, Default)]
pub struct MemStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl ClusterStore for MemStore {
    fn create_or_update(&self, name: &str, record: &ClusterRecord) -> Result<(), StoreError> {
        self.check()?;
        let bytes = record.encode()?;
        self.records.write().insert(name.to_string(), bytes);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<ClusterRecord, StoreError> {
        self.check()?;
        let records = self.records.read();
        let bytes = records
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(ClusterRecord::decode(bytes)?)
    }

    fn list(&self) -> Result<BTreeMap<String, ClusterRecord>, StoreError> {
        self.check()?;
        let records = self.records.read();
        records
            .iter()
            .map(|(name, bytes)| Ok((name.clone(), ClusterRecord::decode(bytes)?)))
            .collect()
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().remove(name);
        Ok(())
    }
}
