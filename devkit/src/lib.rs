/*!
# Herd DevKit - Fakes et utilitaires de test pour le kernel herd

Bibliothèque facilitant les tests du cycle de vie des hosts avec:
- Fakes de tous les collaborateurs (store avec pannes injectables, sink, membership...)
- Stub MQTT pour tests sans broker
- Builders de messages agents
- Harness qui conduit les hosts à travers leur cycle de vie
*/

pub mod fakes;
pub mod mqtt_stub;
pub mod test_utils;

pub use fakes::{FlakyStore, RecordingPublisher, RecordingSink, SinkCall, StaticConfigLookup, StaticMembership};
pub use mqtt_stub::{AgentMessageBuilder, MockMessage, MockMqttClient};
pub use test_utils::{registration_event, HostHarness};
