use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::maintenance::MaintenanceState;
use super::types::{AgentEnv, AgentVersion, DiskInfo, HostHealthStatus, HostState};

/// Immutable read projection of a host, detached from its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host_name: String,
    pub public_host_name: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub cpu_count: u32,
    pub physical_cpu_count: u32,
    pub total_mem_bytes: u64,
    pub available_mem_bytes: u64,
    pub disks_info: Vec<DiskInfo>,
    pub os_type: Option<String>,
    pub os_arch: Option<String>,
    pub os_info: Option<String>,
    pub rack_info: Option<String>,
    pub host_attributes: BTreeMap<String, String>,
    /// Serialized as its upper-case name, e.g. `"HEARTBEAT_LOST"`.
    pub host_state: HostState,
    pub health_status: HostHealthStatus,
    pub last_heartbeat_time: i64,
    pub last_registration_time: i64,
    pub time_in_state: i64,
    pub agent_version: Option<AgentVersion>,
    pub last_agent_env: Option<AgentEnv>,
    /// Clusters with an explicit maintenance entry; all others are OFF.
    pub maintenance: BTreeMap<u64, MaintenanceState>,
    /// cluster id -> config type -> selected tag
    pub desired_configs: BTreeMap<u64, BTreeMap<String, String>>,
    pub persisted: bool,
}

impl HostSnapshot {
    pub fn maintenance_state(&self, cluster_id: u64) -> MaintenanceState {
        self.maintenance.get(&cluster_id).copied().unwrap_or_default()
    }

    pub fn in_maintenance_anywhere(&self) -> bool {
        self.maintenance
            .values()
            .any(|state| *state != MaintenanceState::Off)
    }

    /// Last heartbeat as an RFC 3339 string, `None` before the first one.
    pub fn last_heartbeat_rfc3339(&self) -> Option<String> {
        millis_to_rfc3339(self.last_heartbeat_time)
    }

    pub fn last_registration_rfc3339(&self) -> Option<String> {
        millis_to_rfc3339(self.last_registration_time)
    }
}

fn millis_to_rfc3339(millis: i64) -> Option<String> {
    if millis <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_format() {
        assert_eq!(millis_to_rfc3339(0), None);
        assert_eq!(
            millis_to_rfc3339(1_000).as_deref(),
            Some("1970-01-01T00:00:01Z")
        );
    }
}
