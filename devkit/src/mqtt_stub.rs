/*!
Client MQTT factice pour les tests du pont herd (aucun broker requis)

Enregistre tous les messages publiés (y compris les notifications du kernel via
`NotificationTransport`) et permet de simuler la réception de messages agents.
*/

use anyhow::Result;
use herd_kernel::mqtt::{NotificationTransport, HEARTBEAT_TOPIC, REGISTRATION_TOPIC, STATUS_TOPIC};
use herd_kernel::CollaboratorError;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Remplace `rumqttc::AsyncClient` : tout ce qui est publié reste en mémoire
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Branche le channel qui recevra les messages agents simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    fn record(&self, message: MockMessage) {
        log::info!("[MOCK] published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
    }

    /// Injecte un message comme s'il venait du broker
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        log::info!("[MOCK] simulated incoming: {}", message.topic);

        let sender = self.message_sender.lock();
        let Some(sender) = sender.as_ref() else {
            anyhow::bail!("no receiver configured, call setup_receiver first");
        };
        sender
            .send(message)
            .map_err(|e| anyhow::anyhow!("send error: {}", e))
    }

    /// Copie de tout ce qui a été publié, dans l'ordre
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Tous les messages JSON d'un topic, dans l'ordre de publication
    pub fn json_messages(&self, topic: &str) -> Result<Vec<Value>> {
        self.find_messages_by_topic(topic)
            .iter()
            .map(|msg| Ok(serde_json::from_slice(&msg.payload)?))
            .collect()
    }

    /// Dernier message JSON publié sur `topic`
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
    }
}

impl NotificationTransport for MockMqttClient {
    fn try_publish_json(&self, topic: &str, payload: Vec<u8>) -> Result<(), CollaboratorError> {
        self.record(MockMessage {
            topic: topic.to_string(),
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
        });
        Ok(())
    }
}

/// Helper pour créer les messages agents tels que publiés sur herd/hosts/*
pub struct AgentMessageBuilder {
    host_name: String,
}

impl AgentMessageBuilder {
    pub fn new<S: Into<String>>(host_name: S) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    /// Horodatage courant en millisecondes epoch
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Message registration@v1 : topic + payload
    pub fn registration(&self, timestamp: i64) -> (&'static str, Value) {
        (
            REGISTRATION_TOPIC,
            serde_json::json!({
                "host_name": self.host_name,
                "timestamp": timestamp,
                "host_info": {
                    "host_name": self.host_name,
                    "ip_address": "192.168.1.10",
                    "processor_count": 8,
                    "physical_processor_count": 4,
                    "memory_total_bytes": 16_u64 << 30,
                    "free_memory_bytes": 8_u64 << 30,
                    "architecture": "x86_64",
                    "os": "centos",
                    "os_release": "7.9.2009",
                    "os_family": "redhat",
                    "kernel": "Linux",
                    "mounts": [{ "mountpoint": "/", "device": "/dev/sda1", "size": "100G" }]
                },
                "agent_version": "2.7.0",
                "public_host_name": format!("{}.public", self.host_name)
            }),
        )
    }

    /// Message heartbeat@v1, HEALTHY
    pub fn heartbeat_healthy(&self, timestamp: i64) -> (&'static str, Value) {
        (
            HEARTBEAT_TOPIC,
            serde_json::json!({
                "host_name": self.host_name,
                "timestamp": timestamp,
                "status": "HEALTHY"
            }),
        )
    }

    /// Message heartbeat@v1 avec un statut dégradé
    pub fn heartbeat_unhealthy(&self, timestamp: i64, report: &str) -> (&'static str, Value) {
        (
            HEARTBEAT_TOPIC,
            serde_json::json!({
                "host_name": self.host_name,
                "timestamp": timestamp,
                "status": "UNHEALTHY",
                "health_report": report
            }),
        )
    }

    /// Message status@v1 (premières mises à jour de statut reçues)
    pub fn status(&self, timestamp: i64) -> (&'static str, Value) {
        (
            STATUS_TOPIC,
            serde_json::json!({
                "host_name": self.host_name,
                "timestamp": timestamp
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_messages_are_kept_in_order() {
        let client = MockMqttClient::new();
        let agent = AgentMessageBuilder::new("h1");
        for timestamp in [42, 43] {
            let (topic, body) = agent.status(timestamp);
            client
                .try_publish_json(topic, serde_json::to_vec(&body).unwrap())
                .unwrap();
        }
        let sent = client.find_messages_by_topic(STATUS_TOPIC);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].qos, QoS::AtLeastOnce);
        let stamps: Vec<Value> = client
            .json_messages(STATUS_TOPIC)
            .unwrap()
            .into_iter()
            .map(|m| m["timestamp"].clone())
            .collect();
        assert_eq!(stamps, vec![Value::from(42), Value::from(43)]);

        client.clear();
        assert!(client.get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_incoming_reaches_receiver() {
        let client = MockMqttClient::new();
        assert!(client.simulate_incoming("a/b", b"x".to_vec()).is_err());

        let mut rx = client.setup_receiver();
        client.simulate_incoming("a/b", b"x".to_vec()).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "a/b");
    }

    #[test]
    fn test_transport_records_notifications() {
        let client = MockMqttClient::new();
        client
            .try_publish_json("herd/hosts/events@v1", br#"{"event":"x"}"#.to_vec())
            .unwrap();
        let last: Option<Value> = client.get_last_json_message("herd/hosts/events@v1").unwrap();
        assert_eq!(last.unwrap()["event"], "x");
    }

    #[test]
    fn test_message_builders() {
        let b = AgentMessageBuilder::new("h1");
        let (topic, reg) = b.registration(1000);
        assert_eq!(topic, REGISTRATION_TOPIC);
        assert_eq!(reg["host_info"]["os"], "centos");

        let (topic, hb) = b.heartbeat_unhealthy(1040, "disk full");
        assert_eq!(topic, HEARTBEAT_TOPIC);
        assert_eq!(hb["status"], "UNHEALTHY");
        assert!(AgentMessageBuilder::now_millis() > 0);
    }
}
