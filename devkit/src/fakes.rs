/*!
Fakes des collaborateurs d'un host

Chaque fake enregistre les appels reçus et peut être mis en échec à la demande,
pour tester les chemins d'erreur (PersistenceError, CollaboratorError).
*/

use herd_kernel::collab::{
    ClusterMembership, ConfigGroup, ConfigLookup, HostEventPublisher, PublishedHostEvent, TopologySink,
};
use herd_kernel::store::{HostConfigMappingRecord, HostRecord, HostStore, InMemoryHostStore, StoreError};
use herd_kernel::{CollaboratorError, HostSnapshot, HostState};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Registered {
        host_name: String,
        already_associated: bool,
        state: HostState,
    },
    HeartbeatLost {
        host_name: String,
        state: HostState,
    },
}

/// Topology sink qui enregistre chaque notification
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toutes les notifications suivantes échouent tant que `failing` est vrai
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn registered_count(&self, host_name: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::Registered { host_name: h, .. } if h == host_name))
            .count()
    }

    pub fn heartbeat_lost_count(&self, host_name: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SinkCall::HeartbeatLost { host_name: h, .. } if h == host_name))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: SinkCall) -> Result<(), CollaboratorError> {
        self.calls.lock().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Sink("injected sink failure".into()));
        }
        Ok(())
    }
}

impl TopologySink for RecordingSink {
    fn on_host_registered(&self, host: &HostSnapshot, already_associated: bool) -> Result<(), CollaboratorError> {
        self.record(SinkCall::Registered {
            host_name: host.host_name.clone(),
            already_associated,
            state: host.host_state,
        })
    }

    fn on_host_heartbeat_lost(&self, host: &HostSnapshot) -> Result<(), CollaboratorError> {
        self.record(SinkCall::HeartbeatLost {
            host_name: host.host_name.clone(),
            state: host.host_state,
        })
    }
}

/// Publisher d'événements maintenance qui enregistre ce qu'il reçoit
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedHostEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedHostEvent> {
        self.events.lock().clone()
    }
}

impl HostEventPublisher for RecordingPublisher {
    fn publish(&self, event: &PublishedHostEvent) -> Result<(), CollaboratorError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Membership statique : les hosts "mappés" sont déclarés à l'avance
#[derive(Debug, Default)]
pub struct StaticMembership {
    mapped: Mutex<HashSet<String>>,
    updates: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapped(self, host_name: &str) -> Self {
        self.mapped.lock().insert(host_name.to_string());
        self
    }

    pub fn set_mapped(&self, host_name: &str, mapped: bool) {
        let mut set = self.mapped.lock();
        if mapped {
            set.insert(host_name.to_string());
        } else {
            set.remove(host_name);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hosts passés à update_host_mappings, dans l'ordre
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().clone()
    }
}

impl ClusterMembership for StaticMembership {
    fn update_host_mappings(&self, host: &HostSnapshot) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Membership("injected membership failure".into()));
        }
        self.updates.lock().push(host.host_name.clone());
        Ok(())
    }

    fn is_host_mapped_to_cluster(&self, host_name: &str) -> Result<bool, CollaboratorError> {
        Ok(self.mapped.lock().contains(host_name))
    }
}

/// Config lookup figé : tags par défaut et config groups par cluster
#[derive(Debug, Default)]
pub struct StaticConfigLookup {
    defaults: BTreeMap<u64, BTreeMap<String, String>>,
    groups: BTreeMap<u64, Vec<(ConfigGroup, Vec<String>)>>,
}

impl StaticConfigLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, cluster_id: u64, config_type: &str, tag: &str) -> Self {
        self.defaults
            .entry(cluster_id)
            .or_default()
            .insert(config_type.to_string(), tag.to_string());
        self
    }

    pub fn with_group(mut self, cluster_id: u64, group: ConfigGroup, hosts: &[&str]) -> Self {
        self.groups
            .entry(cluster_id)
            .or_default()
            .push((group, hosts.iter().map(|h| h.to_string()).collect()));
        self
    }
}

impl ConfigLookup for StaticConfigLookup {
    fn cluster_desired_tags(&self, cluster_id: u64) -> Result<BTreeMap<String, String>, CollaboratorError> {
        Ok(self.defaults.get(&cluster_id).cloned().unwrap_or_default())
    }

    fn config_groups_for_host(&self, cluster_id: u64, host_name: &str) -> Result<Vec<ConfigGroup>, CollaboratorError> {
        Ok(self
            .groups
            .get(&cluster_id)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|(_, hosts)| hosts.iter().any(|h| h == host_name))
                    .map(|(group, _)| group.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Store en mémoire avec injection de pannes sur les écritures
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryHostStore,
    failing: AtomicBool,
    writes: AtomicUsize,
    writes_by_host: Mutex<HashMap<String, usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Nombre d'écritures réussies
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn writes_for(&self, host_name: &str) -> usize {
        self.writes_by_host.lock().get(host_name).copied().unwrap_or(0)
    }

    fn guard_write(&self, host_name: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected store failure".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.writes_by_host.lock().entry(host_name.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

impl HostStore for FlakyStore {
    fn create(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.guard_write(&record.host_name)?;
        self.inner.create(record)
    }

    fn merge(&self, record: &HostRecord) -> Result<(), StoreError> {
        self.guard_write(&record.host_name)?;
        self.inner.merge(record)
    }

    fn find_by_host_id(&self, host_name: &str) -> Result<Option<HostRecord>, StoreError> {
        self.inner.find_by_host_id(host_name)
    }

    fn find_all(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.inner.find_all()
    }

    fn create_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.guard_write(&record.host_name)?;
        self.inner.create_config_mapping(record)
    }

    fn merge_config_mapping(&self, record: &HostConfigMappingRecord) -> Result<(), StoreError> {
        self.guard_write(&record.host_name)?;
        self.inner.merge_config_mapping(record)
    }

    fn find_config_mappings(&self, host_name: &str) -> Result<Vec<HostConfigMappingRecord>, StoreError> {
        self.inner.find_config_mappings(host_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_kernel::{Host, HostContext};
    use std::sync::Arc;

    #[test]
    fn test_flaky_store_counts_and_fails() {
        let store = Arc::new(FlakyStore::new());
        let host = Host::new("h1", HostContext::new(store.clone()));
        host.persist().unwrap();
        assert_eq!(store.write_count(), 1);

        store.set_failing(true);
        let err = host.set_rack_info(Some("/r2".into())).unwrap_err();
        assert!(err.needs_resync());
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.writes_for("h1"), 1);
    }

    #[test]
    fn test_static_lookup_filters_groups_by_host() {
        let lookup = StaticConfigLookup::new().with_default(1, "core-site", "v1").with_group(
            1,
            ConfigGroup {
                id: 7,
                name: "g".into(),
                configurations: BTreeMap::from([("core-site".to_string(), "g7".to_string())]),
            },
            &["h2"],
        );
        assert_eq!(lookup.cluster_desired_tags(1).unwrap()["core-site"], "v1");
        assert!(lookup.config_groups_for_host(1, "h1").unwrap().is_empty());
        assert_eq!(lookup.config_groups_for_host(1, "h2").unwrap()[0].id, 7);
    }
}
