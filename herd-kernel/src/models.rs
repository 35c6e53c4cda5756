//! Wire messages of the MQTT bridge.
//!
//! Inbound messages are what agents publish; outbound notifications are what
//! the kernel publishes on `herd/hosts/events@v1`.

use serde::{Deserialize, Serialize};

use crate::host::{
    now_millis, AgentEnv, AgentVersion, DiskInfo, HealthStatus, HostEvent, HostEventPayload, HostHealthStatus,
    HostInfo, HostSnapshot, HostState, MaintenanceState, RegistrationRequest,
};

// ===== Inbound (agents -> kernel) =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationIn {
    pub host_name: String,
    /// Epoch milliseconds; receive time when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub host_info: HostInfo,
    #[serde(default)]
    pub agent_env: Option<AgentEnv>,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub public_host_name: Option<String>,
}

impl RegistrationIn {
    pub fn into_event(self) -> HostEvent {
        HostEvent::registration(
            self.host_name,
            RegistrationRequest {
                host_info: self.host_info,
                registration_time: self.timestamp.unwrap_or_else(now_millis),
                agent_env: self.agent_env,
                agent_version: self.agent_version.map(AgentVersion::new),
                public_host_name: self.public_host_name,
            },
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatIn {
    pub host_name: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub status: HealthStatus,
    #[serde(default)]
    pub health_report: String,
    #[serde(default)]
    pub agent_env: Option<AgentEnv>,
    #[serde(default)]
    pub mounts: Option<Vec<DiskInfo>>,
}

impl HeartbeatIn {
    /// HEALTHY maps to a healthy heartbeat; anything else carries the
    /// reported status as an unhealthy one.
    pub fn into_event(self) -> HostEvent {
        let heartbeat_time = self.timestamp.unwrap_or_else(now_millis);
        let payload = match self.status {
            HealthStatus::Healthy => HostEventPayload::HeartbeatHealthy {
                heartbeat_time,
                agent_env: self.agent_env,
                mounts: self.mounts,
            },
            status => HostEventPayload::HeartbeatUnhealthy {
                heartbeat_time,
                health_status: HostHealthStatus::new(status, self.health_report),
            },
        };
        HostEvent::new(self.host_name, payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusIn {
    pub host_name: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl StatusIn {
    pub fn into_event(self) -> HostEvent {
        HostEvent::status_updates_received(self.host_name, self.timestamp.unwrap_or_else(now_millis))
    }
}

// ===== Outbound (kernel -> subscribers) =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostNotificationOut {
    HostRegistered {
        host_name: String,
        already_associated: bool,
        state: HostState,
        public_host_name: Option<String>,
        ts: String,
    },
    HostHeartbeatLost {
        host_name: String,
        last_heartbeat: Option<String>,
        ts: String,
    },
    MaintenanceModeChanged {
        host_name: String,
        cluster_id: u64,
        state: MaintenanceState,
        ts: String,
    },
}

impl HostNotificationOut {
    pub fn registered(host: &HostSnapshot, already_associated: bool, ts: String) -> Self {
        Self::HostRegistered {
            host_name: host.host_name.clone(),
            already_associated,
            state: host.host_state,
            public_host_name: host.public_host_name.clone(),
            ts,
        }
    }

    pub fn heartbeat_lost(host: &HostSnapshot, ts: String) -> Self {
        Self::HostHeartbeatLost {
            host_name: host.host_name.clone(),
            last_heartbeat: host.last_heartbeat_rfc3339(),
            ts,
        }
    }

    pub fn host_name(&self) -> &str {
        match self {
            Self::HostRegistered { host_name, .. }
            | Self::HostHeartbeatLost { host_name, .. }
            | Self::MaintenanceModeChanged { host_name, .. } => host_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostEventKind;

    #[test]
    fn test_heartbeat_status_selects_event_kind() {
        let healthy: HeartbeatIn =
            serde_json::from_str(r#"{"host_name":"h1","timestamp":1040,"status":"HEALTHY"}"#).unwrap();
        let ev = healthy.into_event();
        assert_eq!(ev.kind(), HostEventKind::HeartbeatHealthy);
        assert_eq!(ev.timestamp(), Some(1040));

        let sick: HeartbeatIn = serde_json::from_str(
            r#"{"host_name":"h1","timestamp":1041,"status":"UNHEALTHY","health_report":"disk full"}"#,
        )
        .unwrap();
        match sick.into_event().payload {
            HostEventPayload::HeartbeatUnhealthy { health_status, .. } => {
                assert_eq!(health_status.status, HealthStatus::Unhealthy);
                assert_eq!(health_status.health_report, "disk full");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_registration_defaults() {
        let msg: RegistrationIn = serde_json::from_str(r#"{"host_name":"h1","agent_version":"2.0"}"#).unwrap();
        let ev = msg.into_event();
        assert_eq!(ev.kind(), HostEventKind::RegistrationRequest);
        assert!(ev.timestamp().unwrap() > 0);
    }

    #[test]
    fn test_notification_tagging() {
        let n = HostNotificationOut::MaintenanceModeChanged {
            host_name: "h1".into(),
            cluster_id: 5,
            state: MaintenanceState::On,
            ts: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "maintenance_mode_changed");
        assert_eq!(json["state"], "ON");
        assert_eq!(n.host_name(), "h1");
    }
}
