/**
 * MQTT BRIDGE - Pont entre les agents et le registre des hosts
 *
 * RÔLE :
 * - entrée : registration / heartbeat / status publiés par les agents,
 *   décodés en HostEvent et passés au HostRegistry
 * - sortie : MqttNotifier publie les notifications de cycle de vie
 *   (registration, perte de heartbeat, maintenance) sur herd/hosts/events@v1
 *
 * Les publications sortantes utilisent try_publish : un sink ne bloque jamais
 * le thread qui a fait la transition.
 */

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::{HostEventPublisher, PublishedHostEvent, TopologySink};
use crate::config::MqttConf;
use crate::error::{CollaboratorError, ErrorCategory, HostError};
use crate::host::{HostEvent, HostSnapshot, HostState};
use crate::models::{HeartbeatIn, HostNotificationOut, RegistrationIn, StatusIn};
use crate::registry::{HostRegistry, SharedHostRegistry};

pub const REGISTRATION_TOPIC: &str = "herd/hosts/registration@v1";
pub const HEARTBEAT_TOPIC: &str = "herd/hosts/heartbeat@v1";
pub const STATUS_TOPIC: &str = "herd/hosts/status@v1";
pub const EVENTS_TOPIC: &str = "herd/hosts/events@v1";

pub const INBOUND_TOPICS: [&str; 3] = [REGISTRATION_TOPIC, HEARTBEAT_TOPIC, STATUS_TOPIC];

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no route for topic {0}")]
    UnknownTopic(String),
    #[error("invalid JSON on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Host(#[from] HostError),
}

impl BridgeError {
    /// The event was applied to the host; only a downstream notification failed.
    pub fn state_committed(&self) -> bool {
        matches!(self, BridgeError::Host(e) if e.category() == ErrorCategory::Collaborator)
    }
}

/// Decodes one inbound agent message into the event it carries.
pub fn decode_event(topic: &str, payload: &[u8]) -> Result<HostEvent, BridgeError> {
    let bad_json = |source| BridgeError::Payload {
        topic: topic.to_string(),
        source,
    };
    match topic {
        REGISTRATION_TOPIC => Ok(serde_json::from_slice::<RegistrationIn>(payload)
            .map_err(bad_json)?
            .into_event()),
        HEARTBEAT_TOPIC => Ok(serde_json::from_slice::<HeartbeatIn>(payload)
            .map_err(bad_json)?
            .into_event()),
        STATUS_TOPIC => Ok(serde_json::from_slice::<StatusIn>(payload)
            .map_err(bad_json)?
            .into_event()),
        other => Err(BridgeError::UnknownTopic(other.to_string())),
    }
}

/// Decodes a message and hands it to the registry. Blocking.
pub fn route_message(registry: &HostRegistry, topic: &str, payload: &[u8]) -> Result<HostState, BridgeError> {
    let event = decode_event(topic, payload)?;
    debug!(host = %event.host_name, event = %event.kind(), "routing agent message");
    Ok(registry.handle_event(&event)?)
}

/// Non-blocking outbound publish used by [`MqttNotifier`].
pub trait NotificationTransport: Send + Sync {
    fn try_publish_json(&self, topic: &str, payload: Vec<u8>) -> Result<(), CollaboratorError>;
}

impl NotificationTransport for AsyncClient {
    fn try_publish_json(&self, topic: &str, payload: Vec<u8>) -> Result<(), CollaboratorError> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| CollaboratorError::Sink(e.to_string()))
    }
}

/// Topology sink and maintenance publisher that report over MQTT.
pub struct MqttNotifier<T> {
    transport: T,
    topic: String,
}

impl<T: NotificationTransport> MqttNotifier<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            topic: EVENTS_TOPIC.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    fn send(&self, notification: &HostNotificationOut) -> Result<(), CollaboratorError> {
        let payload = serde_json::to_vec(notification).map_err(|e| CollaboratorError::Sink(e.to_string()))?;
        self.transport.try_publish_json(&self.topic, payload)?;
        debug!(host = %notification.host_name(), topic = %self.topic, "host notification published");
        Ok(())
    }
}

impl<T: NotificationTransport> TopologySink for MqttNotifier<T> {
    fn on_host_registered(&self, host: &HostSnapshot, already_associated: bool) -> Result<(), CollaboratorError> {
        self.send(&HostNotificationOut::registered(host, already_associated, now_rfc3339()))
    }

    fn on_host_heartbeat_lost(&self, host: &HostSnapshot) -> Result<(), CollaboratorError> {
        self.send(&HostNotificationOut::heartbeat_lost(host, now_rfc3339()))
    }
}

impl<T: NotificationTransport> HostEventPublisher for MqttNotifier<T> {
    fn publish(&self, event: &PublishedHostEvent) -> Result<(), CollaboratorError> {
        let PublishedHostEvent::MaintenanceModeChanged {
            cluster_id,
            host_name,
            state,
        } = event;
        self.send(&HostNotificationOut::MaintenanceModeChanged {
            host_name: host_name.clone(),
            cluster_id: *cluster_id,
            state: *state,
            ts: now_rfc3339(),
        })
        .map_err(|e| match e {
            CollaboratorError::Sink(msg) => CollaboratorError::Publisher(msg),
            other => other,
        })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let client_id = cfg
        .client_id
        .clone()
        .unwrap_or_else(|| format!("herd-kernel-{}", Uuid::new_v4().simple()));
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

/// Polls the broker forever, (re)subscribing on every connection and
/// routing agent messages to the registry.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    registry: SharedHostRegistry,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("MQTT connected");
                    for topic in INBOUND_TOPICS {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            warn!(topic, error = %e, "MQTT subscribe failed");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    // write-through blocks; stay on this task so per-topic order holds
                    let outcome = task::block_in_place(|| route_message(&registry, &p.topic, &p.payload));
                    match outcome {
                        Ok(state) => debug!(topic = %p.topic, state = %state, "agent message applied"),
                        Err(e) if e.state_committed() => {
                            warn!(topic = %p.topic, error = %e, "agent message applied, notification failed")
                        }
                        Err(BridgeError::Host(e)) => {
                            warn!(topic = %p.topic, category = ?e.category(), error = %e, "agent message rejected")
                        }
                        Err(e) => warn!(topic = %p.topic, error = %e, "agent message dropped"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
