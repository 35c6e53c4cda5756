/*!
Test Harness pour le cycle de vie des hosts

Facilite l'écriture de tests avec:
- Registre de hosts branché sur des fakes (store, sink, membership, publisher, config lookup)
- Conduite d'un host vers n'importe quel état du cycle de vie
- Pont MQTT simulé : messages agents routés, notifications enregistrées
*/

use crate::fakes::{FlakyStore, RecordingPublisher, RecordingSink, StaticConfigLookup, StaticMembership};
use crate::mqtt_stub::{MockMessage, MockMqttClient};
use herd_kernel::host::{HealthStatus, HostHealthStatus, HostInfo, RegistrationRequest};
use herd_kernel::mqtt::{route_message, BridgeError, MqttNotifier};
use herd_kernel::{Host, HostContext, HostEvent, HostRegistry, HostResult, HostState};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Harness de test complet pour le registre de hosts
pub struct HostHarness {
    pub store: Arc<FlakyStore>,
    pub sink: Arc<RecordingSink>,
    pub membership: Arc<StaticMembership>,
    pub publisher: Arc<RecordingPublisher>,
    pub config_lookup: Arc<StaticConfigLookup>,
    pub registry: Arc<HostRegistry>,
    pub mqtt_client: MockMqttClient,
}

impl HostHarness {
    /// Crée un nouveau harness de test
    pub fn new() -> Self {
        Self::with_config_lookup(StaticConfigLookup::new())
    }

    pub fn with_config_lookup(config_lookup: StaticConfigLookup) -> Self {
        // Init logging pour tests (les events tracing passent par `log`)
        env_logger::builder().is_test(true).try_init().ok();

        let store = Arc::new(FlakyStore::new());
        let sink = Arc::new(RecordingSink::new());
        let membership = Arc::new(StaticMembership::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let config_lookup = Arc::new(config_lookup);

        let ctx = HostContext::new(store.clone())
            .with_sink(sink.clone())
            .with_membership(membership.clone())
            .with_publisher(publisher.clone())
            .with_config_lookup(config_lookup.clone());

        Self {
            store,
            sink,
            membership,
            publisher,
            config_lookup,
            registry: Arc::new(HostRegistry::new(ctx)),
            mqtt_client: MockMqttClient::new(),
        }
    }

    pub fn ctx(&self) -> HostContext {
        self.registry.context().clone()
    }

    /// Host vivant du registre (créé en INIT si absent)
    pub fn host(&self, host_name: &str) -> Arc<Host> {
        self.registry.get_or_create(host_name)
    }

    pub fn fire(&self, event: HostEvent) -> HostResult<HostState> {
        self.registry.handle_event(&event)
    }

    pub fn register(&self, host_name: &str, time: i64) -> HostResult<HostState> {
        self.fire(registration_event(host_name, time))
    }

    /// Amène `host_name` dans `target` en passant par des transitions valides
    pub fn drive_to(&self, host_name: &str, target: HostState) -> HostResult<Arc<Host>> {
        let host = self.host(host_name);
        match target {
            HostState::Init => {}
            HostState::WaitingForHostStatusUpdates => {
                self.register(host_name, 1000)?;
            }
            HostState::Healthy => {
                self.register(host_name, 1000)?;
                self.fire(HostEvent::status_updates_received(host_name, 1005))?;
            }
            HostState::Unhealthy => {
                self.register(host_name, 1000)?;
                self.fire(HostEvent::status_updates_received(host_name, 1005))?;
                self.fire(HostEvent::heartbeat_unhealthy(
                    host_name,
                    1040,
                    HostHealthStatus::new(HealthStatus::Unhealthy, "disk full"),
                ))?;
            }
            HostState::HeartbeatLost => {
                self.register(host_name, 1000)?;
                self.fire(HostEvent::heartbeat_lost(host_name))?;
            }
        }
        assert_eq!(host.state(), target, "drive_to({host_name}) ended in the wrong state");
        Ok(host)
    }

    /// Route un message agent comme le ferait le listener MQTT
    pub fn deliver(&self, (topic, payload): (&str, Value)) -> Result<HostState, BridgeError> {
        let bytes = serde_json::to_vec(&payload).map_err(|source| BridgeError::Payload {
            topic: topic.to_string(),
            source,
        })?;
        route_message(&self.registry, topic, &bytes)
    }

    /// Vide le receiver du mock et route chaque message reçu
    pub fn pump(&self, rx: &mut mpsc::UnboundedReceiver<MockMessage>) -> Vec<Result<HostState, BridgeError>> {
        let mut results = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            results.push(route_message(&self.registry, &msg.topic, &msg.payload));
        }
        results
    }

    /// Notifier MQTT qui publie dans le mock client du harness
    pub fn notifier(&self) -> MqttNotifier<MockMqttClient> {
        MqttNotifier::new(self.mqtt_client.clone())
    }
}

impl Default for HostHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Événement registration minimal, horodaté `time`
pub fn registration_event(host_name: &str, time: i64) -> HostEvent {
    HostEvent::registration(
        host_name,
        RegistrationRequest {
            host_info: HostInfo {
                host_name: Some(host_name.to_string()),
                ip_address: Some("10.0.0.1".into()),
                processor_count: 4,
                physical_processor_count: 2,
                os: Some("ubuntu".into()),
                os_release: Some("22.04".into()),
                architecture: Some("x86_64".into()),
                ..HostInfo::default()
            },
            registration_time: time,
            agent_env: None,
            agent_version: None,
            public_host_name: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_to_every_state() {
        let harness = HostHarness::new();
        for (i, state) in HostState::ALL.into_iter().enumerate() {
            let host = harness.drive_to(&format!("h{i}"), state).unwrap();
            assert_eq!(host.state(), state);
        }
    }

    #[test]
    fn test_pump_routes_simulated_messages() {
        let harness = HostHarness::new();
        let mut rx = harness.mqtt_client.setup_receiver();
        let agent = crate::mqtt_stub::AgentMessageBuilder::new("h1");
        for (topic, payload) in [agent.registration(1000), agent.status(1001)] {
            harness
                .mqtt_client
                .simulate_incoming(topic, serde_json::to_vec(&payload).unwrap())
                .unwrap();
        }
        let results = harness.pump(&mut rx);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(harness.registry.get("h1").unwrap().state(), HostState::Healthy);
    }
}
