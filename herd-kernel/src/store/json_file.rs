use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::memory::StoreData;
use super::{HostConfigMappingRecord, HostRecord, HostStore, StoreError};

/// Store persisted as a single pretty-printed JSON document.
///
/// The whole document is loaded at open time and rewritten after every
/// successful mutation. A write only becomes visible in the cache once the
/// file has been written.
pub struct JsonFileHostStore {
    storage_path: PathBuf,
    cache: Mutex<StoreData>,
}

impl JsonFileHostStore {
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let data = Self::load_from_disk(&storage_path)?;
        info!(
            path = %storage_path.display(),
            hosts = data.hosts.len(),
            "opened host store"
        );
        Ok(Self {
            storage_path,
            cache: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn load_from_disk(path: &Path) -> Result<StoreData, StoreError> {
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            return Ok(StoreData::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(StoreData::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save_to_disk(&self, data: &StoreData) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(data)?;
        let tmp = self.storage_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.storage_path)?;
        debug!(path = %self.storage_path.display(), "host store saved");
        Ok(())
    }

    /// Applies `op` to a copy of the document, writes it, then swaps it in.
    fn write_with<F>(&self, op: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreData) -> Result<(), StoreError>,
    {
        let mut cache = self.cache.lock();
        let mut next = cache.clone();
        op(&mut next)?;
        self.save_to_disk(&next)?;
        *cache = next;
        Ok(())
    }
}

impl HostStore for JsonFileHostStore {
    fn create(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.write_with(|data| data.create(record))
    }

    fn merge(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.write_with(|data| data.merge(record))
    }

    fn find_by_host_id(&self, host_name: &str) -> Result<Option<HostRecord>, StoreError> {
        Ok(self.cache.lock().hosts.get(host_name).cloned())
    }

    fn find_all(&self) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self.cache.lock().hosts.values().cloned().collect())
    }

    fn create_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.write_with(|data| data.create_config_mapping(record))
    }

    fn merge_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.write_with(|data| data.merge_config_mapping(record))
    }

    fn find_config_mappings(&self, host_name: &str) -> Result<Vec<HostConfigMappingRecord>, StoreError> {
        Ok(self.cache.lock().config_mappings_of(host_name))
    }
}
