//! Durable store boundary for hosts.
//!
//! The core treats the store as an opaque create / merge / find service. The
//! records here are the only place where structured host sub-objects are
//! flattened to JSON text; the in-memory host never holds serialized blobs.

mod json_file;
mod memory;

pub use json_file::JsonFileHostStore;
pub use memory::InMemoryHostStore;

use serde::{Deserialize, Serialize};

use crate::host::{HostConfigMapping, HostState};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable projection of a host.
///
/// `host_attributes`, `disks_info`, `agent_version`, `last_agent_env`,
/// `health_status` and `maintenance_state` hold JSON text. The last heartbeat
/// time is not stored: it changes on every heartbeat and a restarted server
/// waits for agents to re-register anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_name: String,
    pub public_host_name: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub os_type: Option<String>,
    pub os_arch: Option<String>,
    pub os_info: Option<String>,
    pub rack_info: Option<String>,
    pub cpu_count: u32,
    pub physical_cpu_count: u32,
    pub total_mem_bytes: u64,
    pub available_mem_bytes: u64,
    pub host_attributes: String,
    pub disks_info: String,
    pub agent_version: Option<String>,
    pub last_agent_env: Option<String>,
    pub current_state: HostState,
    pub health_status: String,
    pub time_in_state: i64,
    pub last_registration_time: i64,
    pub maintenance_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfigMappingRecord {
    pub host_name: String,
    #[serde(flatten)]
    pub mapping: HostConfigMapping,
}

impl HostConfigMappingRecord {
    pub fn new(host_name: &str, mapping: &HostConfigMapping) -> Self {
        Self {
            host_name: host_name.to_string(),
            mapping: mapping.clone(),
        }
    }
}

/// Opaque durable store used for write-through.
///
/// Calls are synchronous and made while the host's write lock is held.
pub trait HostStore: Send + Sync {
    fn create(&self, record: &HostRecord) -> Result<(), StoreError>;

    fn merge(&self, record: &HostRecord) -> Result<(), StoreError>;

    fn find_by_host_id(&self, host_name: &str) -> Result<Option<HostRecord>, StoreError>;

    fn find_all(&self) -> Result<Vec<HostRecord>, StoreError>;

    fn create_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError>;

    fn merge_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError>;

    fn find_config_mappings(&self, host_name: &str) -> Result<Vec<HostConfigMappingRecord>, StoreError>;
}
