use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::fsm::FsmEvent;

/// Lifecycle state of a host, changed only through the host transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Init,
    WaitingForHostStatusUpdates,
    Healthy,
    Unhealthy,
    HeartbeatLost,
}

impl HostState {
    pub const ALL: [HostState; 5] = [
        HostState::Init,
        HostState::WaitingForHostStatusUpdates,
        HostState::Healthy,
        HostState::Unhealthy,
        HostState::HeartbeatLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Init => "INIT",
            HostState::WaitingForHostStatusUpdates => "WAITING_FOR_HOST_STATUS_UPDATES",
            HostState::Healthy => "HEALTHY",
            HostState::Unhealthy => "UNHEALTHY",
            HostState::HeartbeatLost => "HEARTBEAT_LOST",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostEventKind {
    RegistrationRequest,
    StatusUpdatesReceived,
    HeartbeatHealthy,
    HeartbeatUnhealthy,
    HeartbeatLost,
}

impl HostEventKind {
    pub const ALL: [HostEventKind; 5] = [
        HostEventKind::RegistrationRequest,
        HostEventKind::StatusUpdatesReceived,
        HostEventKind::HeartbeatHealthy,
        HostEventKind::HeartbeatUnhealthy,
        HostEventKind::HeartbeatLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostEventKind::RegistrationRequest => "REGISTRATION_REQUEST",
            HostEventKind::StatusUpdatesReceived => "STATUS_UPDATES_RECEIVED",
            HostEventKind::HeartbeatHealthy => "HEARTBEAT_HEALTHY",
            HostEventKind::HeartbeatUnhealthy => "HEARTBEAT_UNHEALTHY",
            HostEventKind::HeartbeatLost => "HEARTBEAT_LOST",
        }
    }
}

impl fmt::Display for HostEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Reported health of a host: a status plus the agent's free-form report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHealthStatus {
    pub status: HealthStatus,
    #[serde(default)]
    pub health_report: String,
}

impl HostHealthStatus {
    pub fn new(status: HealthStatus, health_report: impl Into<String>) -> Self {
        Self {
            status,
            health_report: health_report.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown, "")
    }

    /// Same report text, new status.
    pub fn with_status(&self, status: HealthStatus) -> Self {
        Self::new(status, self.health_report.clone())
    }
}

impl Default for HostHealthStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub version: String,
}

impl AgentVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub mountpoint: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub used: Option<String>,
    #[serde(default)]
    pub available: Option<String>,
    #[serde(default)]
    pub percent: Option<String>,
}

impl DiskInfo {
    pub fn new(mountpoint: impl Into<String>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            device: None,
            fs_type: None,
            size: None,
            used: None,
            available: None,
            percent: None,
        }
    }
}

/// Agent-side environment report (users, packages, java processes...). Kept
/// as an opaque section map and replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEnv {
    #[serde(default)]
    pub sections: BTreeMap<String, serde_json::Value>,
}

/// Hardware, OS and network attributes reported by an agent at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub host_name: Option<String>,
    pub ip_address: Option<String>,
    pub processor_count: u32,
    pub physical_processor_count: u32,
    pub memory_total_bytes: u64,
    pub free_memory_bytes: u64,
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub os_release: Option<String>,
    pub os_family: Option<String>,
    pub mounts: Vec<DiskInfo>,
    pub hardware_isa: Option<String>,
    pub hardware_model: Option<String>,
    pub interfaces: Option<String>,
    pub kernel: Option<String>,
    pub kernel_major_version: Option<String>,
    pub kernel_release: Option<String>,
    pub kernel_version: Option<String>,
    pub mac_address: Option<String>,
    pub netmask: Option<String>,
    pub selinux: bool,
    pub swap_size: Option<String>,
    pub swap_free: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub host_info: HostInfo,
    pub registration_time: i64,
    #[serde(default)]
    pub agent_env: Option<AgentEnv>,
    #[serde(default)]
    pub agent_version: Option<AgentVersion>,
    #[serde(default)]
    pub public_host_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEventPayload {
    RegistrationRequest(RegistrationRequest),
    StatusUpdatesReceived {
        timestamp: i64,
    },
    HeartbeatHealthy {
        heartbeat_time: i64,
        agent_env: Option<AgentEnv>,
        mounts: Option<Vec<DiskInfo>>,
    },
    HeartbeatUnhealthy {
        heartbeat_time: i64,
        health_status: HostHealthStatus,
    },
    HeartbeatLost,
}

impl HostEventPayload {
    /// Event time in epoch milliseconds, absent for heartbeat loss.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            HostEventPayload::RegistrationRequest(req) => Some(req.registration_time),
            HostEventPayload::StatusUpdatesReceived { timestamp } => Some(*timestamp),
            HostEventPayload::HeartbeatHealthy { heartbeat_time, .. }
            | HostEventPayload::HeartbeatUnhealthy { heartbeat_time, .. } => Some(*heartbeat_time),
            HostEventPayload::HeartbeatLost => None,
        }
    }
}

impl FsmEvent for HostEventPayload {
    type Kind = HostEventKind;

    fn kind(&self) -> HostEventKind {
        match self {
            HostEventPayload::RegistrationRequest(_) => HostEventKind::RegistrationRequest,
            HostEventPayload::StatusUpdatesReceived { .. } => HostEventKind::StatusUpdatesReceived,
            HostEventPayload::HeartbeatHealthy { .. } => HostEventKind::HeartbeatHealthy,
            HostEventPayload::HeartbeatUnhealthy { .. } => HostEventKind::HeartbeatUnhealthy,
            HostEventPayload::HeartbeatLost => HostEventKind::HeartbeatLost,
        }
    }
}

/// Inbound lifecycle event addressed to one host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub host_name: String,
    pub payload: HostEventPayload,
}

impl HostEvent {
    pub fn new(host_name: impl Into<String>, payload: HostEventPayload) -> Self {
        Self {
            host_name: host_name.into(),
            payload,
        }
    }

    pub fn registration(host_name: impl Into<String>, request: RegistrationRequest) -> Self {
        Self::new(host_name, HostEventPayload::RegistrationRequest(request))
    }

    pub fn status_updates_received(host_name: impl Into<String>, timestamp: i64) -> Self {
        Self::new(host_name, HostEventPayload::StatusUpdatesReceived { timestamp })
    }

    pub fn heartbeat_healthy(host_name: impl Into<String>, heartbeat_time: i64) -> Self {
        Self::new(
            host_name,
            HostEventPayload::HeartbeatHealthy {
                heartbeat_time,
                agent_env: None,
                mounts: None,
            },
        )
    }

    pub fn heartbeat_unhealthy(
        host_name: impl Into<String>,
        heartbeat_time: i64,
        health_status: HostHealthStatus,
    ) -> Self {
        Self::new(
            host_name,
            HostEventPayload::HeartbeatUnhealthy {
                heartbeat_time,
                health_status,
            },
        )
    }

    pub fn heartbeat_lost(host_name: impl Into<String>) -> Self {
        Self::new(host_name, HostEventPayload::HeartbeatLost)
    }

    pub fn kind(&self) -> HostEventKind {
        self.payload.kind()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.payload.timestamp()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_in_screaming_case() {
        let json = serde_json::to_string(&HostState::WaitingForHostStatusUpdates).unwrap();
        assert_eq!(json, "\"WAITING_FOR_HOST_STATUS_UPDATES\"");
        let back: HostState = serde_json::from_str("\"HEARTBEAT_LOST\"").unwrap();
        assert_eq!(back, HostState::HeartbeatLost);
        assert_eq!(HostState::Healthy.to_string(), "HEALTHY");
    }

    #[test]
    fn test_event_kind_and_timestamp() {
        let ev = HostEvent::heartbeat_healthy("h1", 1040);
        assert_eq!(ev.kind(), HostEventKind::HeartbeatHealthy);
        assert_eq!(ev.timestamp(), Some(1040));
        assert_eq!(HostEvent::heartbeat_lost("h1").timestamp(), None);
    }

    #[test]
    fn test_health_with_status_keeps_report() {
        let h = HostHealthStatus::new(HealthStatus::Unhealthy, "disk full");
        let healed = h.with_status(HealthStatus::Healthy);
        assert_eq!(healed.status, HealthStatus::Healthy);
        assert_eq!(healed.health_report, "disk full");
    }
}
