//! Host lifecycle core of the herd server.
//!
//! Tracks every managed machine through registration, status updates,
//! heartbeats and heartbeat loss, keeps each host's durable record in sync
//! and tells cluster-level collaborators about the transitions that matter.
//!
//! - [`fsm`]: generic table-driven state machine executor
//! - [`host`]: the host aggregate and its lifecycle table
//! - [`store`]: durable store boundary and two implementations
//! - [`collab`]: collaborator interfaces (topology sink, membership, publisher, config lookup)
//! - [`registry`], [`monitor`]: one live host per name, heartbeat-loss sweeps
//! - [`config`], [`topology`], [`models`], [`mqtt`]: what the `herd-kernel` binary wires together

pub mod collab;
pub mod config;
pub mod error;
pub mod fsm;
pub mod host;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod registry;
pub mod store;
pub mod topology;

pub use collab::{
    ClusterMembership, ConfigGroup, ConfigLookup, Detached, HostContext, HostEventPublisher, PublishedHostEvent,
    TopologySink,
};
pub use error::{CollaboratorError, ErrorCategory, HostError, HostResult};
pub use host::{
    ConfigVersion, Host, HostConfig, HostConfigMapping, HostEvent, HostEventKind, HostSnapshot, HostState,
    MaintenanceState,
};
pub use registry::{EventOutcome, HostRegistry, SharedHostRegistry};
pub use store::{HostStore, InMemoryHostStore, JsonFileHostStore, StoreError};
