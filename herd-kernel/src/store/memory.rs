use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{HostConfigMappingRecord, HostRecord, HostStore, StoreError};

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub(super) struct StoreData {
    pub hosts: BTreeMap<String, HostRecord>,
    /// host name -> rows keyed by mapping id
    pub config_mappings: BTreeMap<String, BTreeMap<u64, HostConfigMappingRecord>>,
}

impl StoreData {
    pub fn create(&mut self, record: &HostRecord) -> Result<(), StoreError> {
        if self.hosts.contains_key(&record.host_name) {
            return Err(StoreError::AlreadyExists(record.host_name.clone()));
        }
        self.hosts.insert(record.host_name.clone(), record.clone());
        Ok(())
    }

    pub fn merge(&mut self, record: &HostRecord) -> Result<(), StoreError> {
        match self.hosts.get_mut(&record.host_name) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.host_name.clone())),
        }
    }

    pub fn create_config_mapping(&mut self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        let rows = self.config_mappings.entry(record.host_name.clone()).or_default();
        if rows.contains_key(&record.mapping.id) {
            return Err(StoreError::AlreadyExists(format!(
                "{}/mapping/{}",
                record.host_name, record.mapping.id
            )));
        }
        rows.insert(record.mapping.id, record.clone());
        Ok(())
    }

    pub fn merge_config_mapping(&mut self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        match self
            .config_mappings
            .get_mut(&record.host_name)
            .and_then(|rows| rows.get_mut(&record.mapping.id))
        {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "{}/mapping/{}",
                record.host_name, record.mapping.id
            ))),
        }
    }

    pub fn config_mappings_of(&self, host_name: &str) -> Vec<HostConfigMappingRecord> {
        self.config_mappings
            .get(host_name)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Store kept entirely in memory. Used by tests and by embedders that bring
/// their own durability.
#[derive(Debug, Default)]
pub struct InMemoryHostStore {
    data: Mutex<StoreData>,
}

impl InMemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_count(&self) -> usize {
        self.data.lock().hosts.len()
    }
}

impl HostStore for InMemoryHostStore {
    fn create(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.data.lock().create(record)
    }

    fn merge(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.data.lock().merge(record)
    }

    fn find_by_host_id(&self, host_name: &str) -> Result<Option<HostRecord>, StoreError> {
        Ok(self.data.lock().hosts.get(host_name).cloned())
    }

    fn find_all(&self) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self.data.lock().hosts.values().cloned().collect())
    }

    fn create_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.data.lock().create_config_mapping(record)
    }

    fn merge_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.data.lock().merge_config_mapping(record)
    }

    fn find_config_mappings(&self, host_name: &str) -> Result<Vec<HostConfigMappingRecord>, StoreError> {
        Ok(self.data.lock().config_mappings_of(host_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostConfigMapping, HostState};

    fn record(name: &str) -> HostRecord {
        HostRecord {
            host_name: name.to_string(),
            public_host_name: None,
            ipv4: None,
            ipv6: None,
            os_type: None,
            os_arch: None,
            os_info: None,
            rack_info: None,
            cpu_count: 0,
            physical_cpu_count: 0,
            total_mem_bytes: 0,
            available_mem_bytes: 0,
            host_attributes: "{}".into(),
            disks_info: "[]".into(),
            agent_version: None,
            last_agent_env: None,
            current_state: HostState::Init,
            health_status: r#"{"status":"UNKNOWN","health_report":""}"#.into(),
            time_in_state: 0,
            last_registration_time: 0,
            maintenance_state: None,
        }
    }

    #[test]
    fn test_create_then_merge() {
        let store = InMemoryHostStore::new();
        store.create(&record("h1")).unwrap();
        assert!(matches!(store.create(&record("h1")), Err(StoreError::AlreadyExists(_))));

        let mut updated = record("h1");
        updated.rack_info = Some("/rack-2".into());
        store.merge(&updated).unwrap();
        assert_eq!(
            store.find_by_host_id("h1").unwrap().unwrap().rack_info.as_deref(),
            Some("/rack-2")
        );
        assert!(matches!(store.merge(&record("h2")), Err(StoreError::NotFound(_))));
        assert_eq!(store.host_count(), 1);
    }

    #[test]
    fn test_config_mapping_rows() {
        let store = InMemoryHostStore::new();
        let mapping = HostConfigMapping {
            id: 1,
            cluster_id: 5,
            config_type: "core-site".into(),
            version_tag: "v1".into(),
            user: "admin".into(),
            selected: true,
            create_time: 1,
        };
        let mut row = HostConfigMappingRecord::new("h1", &mapping);
        store.create_config_mapping(&row).unwrap();
        row.mapping.selected = false;
        store.merge_config_mapping(&row).unwrap();
        let rows = store.find_config_mappings("h1").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].mapping.selected);
        assert!(store.find_config_mappings("h2").unwrap().is_empty());
    }
}
