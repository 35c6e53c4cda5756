//! Interfaces of the collaborators a host talks to, and the bundle passed to
//! every host at construction.
//!
//! All collaborator calls happen after the host's write lock is released, in
//! commit order for that host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CollaboratorError;
use crate::host::{HostSnapshot, MaintenanceState};
use crate::store::{HostStore, InMemoryHostStore};

/// Cluster-level reactions to host lifecycle changes.
pub trait TopologySink: Send + Sync {
    fn on_host_registered(
        &self,
        host: &HostSnapshot,
        already_associated_with_cluster: bool,
    ) -> Result<(), CollaboratorError>;

    fn on_host_heartbeat_lost(&self, host: &HostSnapshot) -> Result<(), CollaboratorError>;
}

/// Owner of the host-to-cluster mapping.
pub trait ClusterMembership: Send + Sync {
    fn update_host_mappings(&self, host: &HostSnapshot) -> Result<(), CollaboratorError>;

    fn is_host_mapped_to_cluster(&self, host_name: &str) -> Result<bool, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishedHostEvent {
    MaintenanceModeChanged {
        cluster_id: u64,
        host_name: String,
        state: MaintenanceState,
    },
}

pub trait HostEventPublisher: Send + Sync {
    fn publish(&self, event: &PublishedHostEvent) -> Result<(), CollaboratorError>;
}

/// A config group: a set of hosts pinned to specific config tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGroup {
    pub id: u64,
    pub name: String,
    /// config type -> tag
    pub configurations: BTreeMap<String, String>,
}

/// Read-only cluster configuration lookup.
pub trait ConfigLookup: Send + Sync {
    /// Cluster-wide desired tag per config type.
    fn cluster_desired_tags(&self, cluster_id: u64) -> Result<BTreeMap<String, String>, CollaboratorError>;

    fn config_groups_for_host(
        &self,
        cluster_id: u64,
        host_name: &str,
    ) -> Result<Vec<ConfigGroup>, CollaboratorError>;
}

/// Collaborator that accepts every call and does nothing. Default for every
/// slot of [`HostContext`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl TopologySink for Detached {
    fn on_host_registered(&self, _host: &HostSnapshot, _associated: bool) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn on_host_heartbeat_lost(&self, _host: &HostSnapshot) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

impl ClusterMembership for Detached {
    fn update_host_mappings(&self, _host: &HostSnapshot) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn is_host_mapped_to_cluster(&self, _host_name: &str) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

impl HostEventPublisher for Detached {
    fn publish(&self, _event: &PublishedHostEvent) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

impl ConfigLookup for Detached {
    fn cluster_desired_tags(&self, _cluster_id: u64) -> Result<BTreeMap<String, String>, CollaboratorError> {
        Ok(BTreeMap::new())
    }

    fn config_groups_for_host(
        &self,
        _cluster_id: u64,
        _host_name: &str,
    ) -> Result<Vec<ConfigGroup>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Explicit dependencies of a host. Cloning is cheap.
#[derive(Clone)]
pub struct HostContext {
    pub store: Arc<dyn HostStore>,
    pub sink: Arc<dyn TopologySink>,
    pub membership: Arc<dyn ClusterMembership>,
    pub publisher: Arc<dyn HostEventPublisher>,
    pub config_lookup: Arc<dyn ConfigLookup>,
}

impl HostContext {
    pub fn new(store: Arc<dyn HostStore>) -> Self {
        Self {
            store,
            sink: Arc::new(Detached),
            membership: Arc::new(Detached),
            publisher: Arc::new(Detached),
            config_lookup: Arc::new(Detached),
        }
    }

    /// Context backed by a fresh [`InMemoryHostStore`] and detached collaborators.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryHostStore::new()))
    }

    pub fn with_sink(mut self, sink: Arc<dyn TopologySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_membership(mut self, membership: Arc<dyn ClusterMembership>) -> Self {
        self.membership = membership;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn HostEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_config_lookup(mut self, config_lookup: Arc<dyn ConfigLookup>) -> Self {
        self.config_lookup = config_lookup;
        self
    }
}
