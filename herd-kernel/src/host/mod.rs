//! Host aggregate: one managed machine, its lifecycle state and everything
//! the server knows about it.
//!
//! Each [`Host`] owns a reader/writer lock. Reads take the read lock; every
//! mutation takes the write lock for the field update and the durable write,
//! then releases it. Collaborator notifications produced by a mutation are
//! queued on a per-host outbox while the lock is still held, and drained in
//! that order once it is released:
//!
//! ```text
//! handle_event ──► write lock ──► fire arc ──► commit state ──► store write ──► enqueue
//!                                                                                  │
//!                      sink / membership / publisher ◄── drain (no lock held) ◄────┘
//! ```

mod desired_config;
mod maintenance;
mod snapshot;
mod transitions;
mod types;

pub use desired_config::{ConfigVersion, DesiredConfigMappings, HostConfig, HostConfigMapping};
pub use maintenance::{MaintenanceOverlay, MaintenanceState};
pub use snapshot::HostSnapshot;
pub use transitions::{host_transitions, transition_target};
pub use types::{
    now_millis, AgentEnv, AgentVersion, DiskInfo, HealthStatus, HostEvent, HostEventKind, HostEventPayload,
    HostHealthStatus, HostInfo, HostState, RegistrationRequest,
};

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, error, info, warn};

use crate::collab::{HostContext, PublishedHostEvent};
use crate::error::{HostError, HostResult};
use crate::store::{HostConfigMappingRecord, HostRecord, StoreError};
use desired_config::MappingChange;
use transitions::{Notification, HOST_STATE_MACHINE};

/// Mutable host fields. Only ever touched under the host's write lock.
#[derive(Debug, Clone)]
pub(crate) struct HostInner {
    pub host_name: String,
    pub public_host_name: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub os_type: Option<String>,
    pub os_arch: Option<String>,
    pub os_info: Option<String>,
    pub rack_info: Option<String>,
    pub cpu_count: u32,
    pub physical_cpu_count: u32,
    pub total_mem_bytes: u64,
    pub available_mem_bytes: u64,
    pub host_attributes: BTreeMap<String, String>,
    pub disks_info: Vec<DiskInfo>,
    pub agent_version: Option<AgentVersion>,
    pub last_agent_env: Option<AgentEnv>,
    pub state: HostState,
    pub health_status: HostHealthStatus,
    pub last_heartbeat_time: i64,
    pub last_registration_time: i64,
    pub time_in_state: i64,
    pub maintenance: MaintenanceOverlay,
    pub desired_configs: DesiredConfigMappings,
    pub persisted: bool,
    /// Notifications of a registration whose first durable write failed.
    /// Sent once the record is created by `persist()` or `refresh()`.
    pub withheld: Vec<Notification>,
}

impl HostInner {
    pub fn new(host_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            public_host_name: None,
            ipv4: None,
            ipv6: None,
            os_type: None,
            os_arch: None,
            os_info: None,
            rack_info: None,
            cpu_count: 0,
            physical_cpu_count: 0,
            total_mem_bytes: 0,
            available_mem_bytes: 0,
            host_attributes: BTreeMap::new(),
            disks_info: Vec::new(),
            agent_version: None,
            last_agent_env: None,
            state: HostState::Init,
            health_status: HostHealthStatus::unknown(),
            last_heartbeat_time: 0,
            last_registration_time: 0,
            time_in_state: 0,
            maintenance: MaintenanceOverlay::default(),
            desired_configs: DesiredConfigMappings::default(),
            persisted: false,
            withheld: Vec::new(),
        }
    }

    /// Heartbeat times only move forward; a late, older heartbeat is ignored.
    pub fn record_heartbeat(&mut self, heartbeat_time: i64) {
        if heartbeat_time < self.last_heartbeat_time {
            debug!(
                host = %self.host_name,
                heartbeat_time,
                last_heartbeat = self.last_heartbeat_time,
                "ignoring out-of-order heartbeat time"
            );
            return;
        }
        self.last_heartbeat_time = heartbeat_time;
    }

    pub fn import_host_info(&mut self, info: &HostInfo) {
        if let Some(fqdn) = non_empty(&info.host_name) {
            if fqdn != self.host_name {
                if self.persisted {
                    info!(
                        host = %self.host_name,
                        reported = fqdn,
                        "cannot rename a host that is already persisted"
                    );
                } else {
                    self.host_name = fqdn.to_string();
                }
            }
        }

        if let Some(ip) = non_empty(&info.ip_address) {
            self.ipv4 = Some(ip.to_string());
            self.ipv6 = Some(ip.to_string());
        }

        self.cpu_count = info.processor_count;
        self.physical_cpu_count = info.physical_processor_count;
        self.total_mem_bytes = info.memory_total_bytes;
        self.available_mem_bytes = info.free_memory_bytes;

        if let Some(arch) = non_empty(&info.architecture) {
            self.os_arch = Some(arch.to_string());
        }

        if let Some(os) = non_empty(&info.os) {
            let major = info
                .os_release
                .as_deref()
                .and_then(|release| release.split('.').next())
                .unwrap_or("");
            self.os_type = Some(format!("{os}{major}").to_lowercase());
        }

        if !info.mounts.is_empty() {
            self.disks_info = info.mounts.clone();
        }

        let mut attrs = BTreeMap::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                attrs.insert(key.to_string(), value.clone());
            }
        };
        put("hardware_isa", &info.hardware_isa);
        put("hardware_model", &info.hardware_model);
        put("interfaces", &info.interfaces);
        put("kernel", &info.kernel);
        put("kernel_majorversion", &info.kernel_major_version);
        put("kernel_release", &info.kernel_release);
        put("kernel_version", &info.kernel_version);
        put("mac_address", &info.mac_address);
        put("netmask", &info.netmask);
        put("os_family", &info.os_family);
        put("swap_size", &info.swap_size);
        put("swap_free", &info.swap_free);
        put("timezone", &info.timezone);
        if info.physical_processor_count != 0 {
            attrs.insert(
                "physicalprocessors_count".to_string(),
                info.physical_processor_count.to_string(),
            );
        }
        if info.processor_count != 0 {
            attrs.insert("processors_count".to_string(), info.processor_count.to_string());
        }
        attrs.insert("selinux_enabled".to_string(), info.selinux.to_string());

        self.host_attributes.extend(attrs);
    }

    fn to_record(&self) -> Result<HostRecord, StoreError> {
        let maintenance_state = if self.maintenance.entries().is_empty() {
            None
        } else {
            Some(self.maintenance.to_json()?)
        };
        Ok(HostRecord {
            host_name: self.host_name.clone(),
            public_host_name: self.public_host_name.clone(),
            ipv4: self.ipv4.clone(),
            ipv6: self.ipv6.clone(),
            os_type: self.os_type.clone(),
            os_arch: self.os_arch.clone(),
            os_info: self.os_info.clone(),
            rack_info: self.rack_info.clone(),
            cpu_count: self.cpu_count,
            physical_cpu_count: self.physical_cpu_count,
            total_mem_bytes: self.total_mem_bytes,
            available_mem_bytes: self.available_mem_bytes,
            host_attributes: serde_json::to_string(&self.host_attributes)?,
            disks_info: serde_json::to_string(&self.disks_info)?,
            agent_version: self.agent_version.as_ref().map(serde_json::to_string).transpose()?,
            last_agent_env: self.last_agent_env.as_ref().map(serde_json::to_string).transpose()?,
            current_state: self.state,
            health_status: serde_json::to_string(&self.health_status)?,
            time_in_state: self.time_in_state,
            last_registration_time: self.last_registration_time,
            maintenance_state,
        })
    }

    /// Overwrites every durable field from `record`. The last heartbeat time
    /// is not stored and is left as is.
    fn apply_record(&mut self, record: HostRecord, mappings: Vec<HostConfigMappingRecord>) -> Result<(), StoreError> {
        let host_attributes = parse_or_default(&record.host_attributes)?;
        let disks_info = parse_or_default(&record.disks_info)?;
        let agent_version = record.agent_version.as_deref().map(serde_json::from_str).transpose()?;
        let last_agent_env = record.last_agent_env.as_deref().map(serde_json::from_str).transpose()?;
        let health_status = parse_or_default(&record.health_status)?;
        let maintenance = match record.maintenance_state.as_deref() {
            Some(raw) if !raw.trim().is_empty() => MaintenanceOverlay::from_json(raw)?,
            _ => MaintenanceOverlay::default(),
        };

        self.host_name = record.host_name;
        self.public_host_name = record.public_host_name;
        self.ipv4 = record.ipv4;
        self.ipv6 = record.ipv6;
        self.os_type = record.os_type;
        self.os_arch = record.os_arch;
        self.os_info = record.os_info;
        self.rack_info = record.rack_info;
        self.cpu_count = record.cpu_count;
        self.physical_cpu_count = record.physical_cpu_count;
        self.total_mem_bytes = record.total_mem_bytes;
        self.available_mem_bytes = record.available_mem_bytes;
        self.host_attributes = host_attributes;
        self.disks_info = disks_info;
        self.agent_version = agent_version;
        self.last_agent_env = last_agent_env;
        self.state = record.current_state;
        self.health_status = health_status;
        self.time_in_state = record.time_in_state;
        self.last_registration_time = record.last_registration_time;
        self.maintenance = maintenance;
        self.desired_configs =
            DesiredConfigMappings::from_rows(mappings.into_iter().map(|row| row.mapping).collect());
        Ok(())
    }

    fn snapshot(&self) -> HostSnapshot {
        let desired_configs = self
            .desired_configs
            .cluster_ids()
            .into_iter()
            .map(|cluster_id| (cluster_id, self.desired_configs.desired_tags(cluster_id)))
            .collect();
        HostSnapshot {
            host_name: self.host_name.clone(),
            public_host_name: self.public_host_name.clone(),
            ipv4: self.ipv4.clone(),
            ipv6: self.ipv6.clone(),
            cpu_count: self.cpu_count,
            physical_cpu_count: self.physical_cpu_count,
            total_mem_bytes: self.total_mem_bytes,
            available_mem_bytes: self.available_mem_bytes,
            disks_info: self.disks_info.clone(),
            os_type: self.os_type.clone(),
            os_arch: self.os_arch.clone(),
            os_info: self.os_info.clone(),
            rack_info: self.rack_info.clone(),
            host_attributes: self.host_attributes.clone(),
            host_state: self.state,
            health_status: self.health_status.clone(),
            last_heartbeat_time: self.last_heartbeat_time,
            last_registration_time: self.last_registration_time,
            time_in_state: self.time_in_state,
            agent_version: self.agent_version.clone(),
            last_agent_env: self.last_agent_env.clone(),
            maintenance: self.maintenance.entries().clone(),
            desired_configs,
            persisted: self.persisted,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_or_default<T>(raw: &str) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(raw)?)
}

/// Work left to do once the host lock is released.
#[derive(Debug)]
enum Outgoing {
    Lifecycle(Notification, HostSnapshot),
    Published(PublishedHostEvent),
}

#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<Outgoing>,
    draining: bool,
}

pub struct Host {
    inner: RwLock<HostInner>,
    outbox: Mutex<Outbox>,
    ctx: HostContext,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Host")
            .field("host_name", &inner.host_name)
            .field("state", &inner.state)
            .field("persisted", &inner.persisted)
            .finish()
    }
}

impl Host {
    /// Transient host in INIT with unknown health.
    pub fn new(host_name: impl AsRef<str>, ctx: HostContext) -> Self {
        Self::from_inner(HostInner::new(host_name.as_ref()), ctx)
    }

    /// Rebuilds a persisted host from its durable record, keeping the stored
    /// state instead of starting at INIT.
    pub fn rehydrate(
        record: HostRecord,
        mappings: Vec<HostConfigMappingRecord>,
        ctx: HostContext,
    ) -> HostResult<Self> {
        let host_name = record.host_name.clone();
        let mut inner = HostInner::new(&host_name);
        inner
            .apply_record(record, mappings)
            .map_err(|e| HostError::persistence(&host_name, e))?;
        inner.persisted = true;
        Ok(Self::from_inner(inner, ctx))
    }

    /// Loads `host_name` from the context's store, `None` when absent.
    pub fn load(host_name: &str, ctx: HostContext) -> HostResult<Option<Self>> {
        let record = ctx
            .store
            .find_by_host_id(host_name)
            .map_err(|e| HostError::persistence(host_name, e))?;
        let Some(record) = record else {
            return Ok(None);
        };
        let mappings = ctx
            .store
            .find_config_mappings(host_name)
            .map_err(|e| HostError::persistence(host_name, e))?;
        Self::rehydrate(record, mappings, ctx).map(Some)
    }

    fn from_inner(inner: HostInner, ctx: HostContext) -> Self {
        Self {
            inner: RwLock::new(inner),
            outbox: Mutex::new(Outbox::default()),
            ctx,
        }
    }

    // ---- lifecycle ----

    /// Fires `event` at the current state and commits the arc's target.
    ///
    /// On an invalid pair nothing changes. On a store failure the in-memory
    /// host has already moved and the error asks for a resync; no
    /// notification is sent for that event. A failing collaborator does not
    /// undo the committed state: the first such error is returned after all
    /// queued notifications were attempted.
    pub fn handle_event(&self, event: &HostEvent) -> HostResult<HostState> {
        let committed = {
            let mut inner = self.inner.write();
            let from = inner.state;
            let (to, effects) = match HOST_STATE_MACHINE.fire(from, &mut *inner, &event.payload) {
                Ok(fired) => fired,
                Err(invalid) => {
                    warn!(
                        host = %inner.host_name,
                        state = %invalid.state,
                        event = %invalid.event_kind,
                        "rejected host event"
                    );
                    return Err(HostError::InvalidTransition {
                        host_name: inner.host_name.clone(),
                        state: invalid.state,
                        event: invalid.event_kind,
                    });
                }
            };

            inner.state = to;
            if to != from {
                inner.time_in_state = event.timestamp().unwrap_or_else(now_millis);
                info!(host = %inner.host_name, from = %from, to = %to, "host state changed");
            } else {
                debug!(host = %inner.host_name, state = %to, event = %event.kind(), "host event handled");
            }

            let creating = effects.persist && !inner.persisted;
            let written = if creating {
                self.create_locked(&mut inner)
            } else {
                self.save_if_persisted(&inner)
            };
            if let Err(e) = written {
                error!(host = %inner.host_name, error = %e, "write-through failed after transition");
                if creating {
                    inner.withheld = effects.notifications;
                }
                return Err(e);
            }
            if creating || to == HostState::HeartbeatLost {
                inner.withheld.clear();
            }

            if !effects.notifications.is_empty() {
                let snapshot = inner.snapshot();
                self.enqueue(
                    effects
                        .notifications
                        .into_iter()
                        .map(|n| Outgoing::Lifecycle(n, snapshot.clone())),
                );
            }
            to
        };

        self.drain_outbox()?;
        Ok(committed)
    }

    /// Merges a hardware/OS report into the host. The open attribute map is
    /// merged; the disk list is replaced when the report carries mounts.
    pub fn import_attributes(&self, info: &HostInfo) -> HostResult<()> {
        self.mutate(|inner| {
            inner.import_host_info(info);
            Ok(())
        })
    }

    // ---- durability ----

    /// First call creates the durable record and the desired-config rows,
    /// then sends any registration notice withheld by an earlier failed
    /// write. Later calls reload the host from the store.
    pub fn persist(&self) -> HostResult<()> {
        {
            let mut inner = self.inner.write();
            if inner.persisted {
                return self.reload_locked(&mut inner);
            }
            self.create_and_release_locked(&mut inner)?;
        }
        self.drain_outbox()
    }

    /// Brings the host back in line with the store after a `Persistence`
    /// error. A persisted host is reloaded. A transient host whose first
    /// registration write failed gets its record created and its
    /// registration notice sent. Any other transient host has nothing to
    /// resync and is reported as not persisted.
    pub fn refresh(&self) -> HostResult<()> {
        {
            let mut inner = self.inner.write();
            if inner.persisted {
                return self.reload_locked(&mut inner);
            }
            if inner.withheld.is_empty() {
                return Err(HostError::NotPersisted(inner.host_name.clone()));
            }
            self.create_and_release_locked(&mut inner)?;
        }
        self.drain_outbox()
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.read().persisted
    }

    fn create_locked(&self, inner: &mut HostInner) -> HostResult<()> {
        let host_name = inner.host_name.clone();
        let record = inner.to_record().map_err(|e| HostError::persistence(&host_name, e))?;
        self.ctx
            .store
            .create(&record)
            .map_err(|e| HostError::persistence(&host_name, e))?;
        for row in inner.desired_configs.rows() {
            self.ctx
                .store
                .create_config_mapping(&HostConfigMappingRecord::new(&host_name, row))
                .map_err(|e| HostError::persistence(&host_name, e))?;
        }
        inner.persisted = true;
        info!(host = %host_name, "host persisted");
        Ok(())
    }

    /// Creates the record, then queues whatever a failed first write held back.
    fn create_and_release_locked(&self, inner: &mut HostInner) -> HostResult<()> {
        self.create_locked(inner)?;
        let withheld = std::mem::take(&mut inner.withheld);
        if !withheld.is_empty() {
            info!(host = %inner.host_name, "sending registration notice held back by a failed write");
            let snapshot = inner.snapshot();
            self.enqueue(withheld.into_iter().map(|n| Outgoing::Lifecycle(n, snapshot.clone())));
        }
        Ok(())
    }

    fn reload_locked(&self, inner: &mut HostInner) -> HostResult<()> {
        let host_name = inner.host_name.clone();
        let record = self
            .ctx
            .store
            .find_by_host_id(&host_name)
            .map_err(|e| HostError::persistence(&host_name, e))?
            .ok_or_else(|| HostError::persistence(&host_name, StoreError::NotFound(host_name.clone())))?;
        let mappings = self
            .ctx
            .store
            .find_config_mappings(&host_name)
            .map_err(|e| HostError::persistence(&host_name, e))?;
        inner
            .apply_record(record, mappings)
            .map_err(|e| HostError::persistence(&host_name, e))?;
        debug!(host = %host_name, "host reloaded from store");
        Ok(())
    }

    fn save_if_persisted(&self, inner: &HostInner) -> HostResult<()> {
        if !inner.persisted {
            return Ok(());
        }
        let record = inner
            .to_record()
            .map_err(|e| HostError::persistence(&inner.host_name, e))?;
        self.ctx
            .store
            .merge(&record)
            .map_err(|e| HostError::persistence(&inner.host_name, e))
    }

    fn write_mapping_change(&self, inner: &HostInner, change: &MappingChange) -> HostResult<()> {
        if !inner.persisted || change.is_empty() {
            return Ok(());
        }
        let store = &self.ctx.store;
        for row in &change.deselected {
            store
                .merge_config_mapping(&HostConfigMappingRecord::new(&inner.host_name, row))
                .map_err(|e| HostError::persistence(&inner.host_name, e))?;
        }
        if let Some(row) = &change.created {
            store
                .create_config_mapping(&HostConfigMappingRecord::new(&inner.host_name, row))
                .map_err(|e| HostError::persistence(&inner.host_name, e))?;
        }
        Ok(())
    }

    /// Applies `op` under the write lock, then writes through.
    fn mutate<F>(&self, op: F) -> HostResult<()>
    where
        F: FnOnce(&mut HostInner) -> HostResult<()>,
    {
        let mut inner = self.inner.write();
        op(&mut inner)?;
        self.save_if_persisted(&inner)
    }

    // ---- notification outbox ----

    fn enqueue(&self, items: impl IntoIterator<Item = Outgoing>) {
        self.outbox.lock().queue.extend(items);
    }

    /// Dispatches queued notifications in commit order. Only one thread
    /// drains a given host at a time; others leave their items to it.
    fn drain_outbox(&self) -> HostResult<()> {
        {
            let mut outbox = self.outbox.lock();
            if outbox.draining {
                return Ok(());
            }
            outbox.draining = true;
        }

        let mut first_error = None;
        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                match outbox.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        outbox.draining = false;
                        break;
                    }
                }
            };
            if let Err(e) = self.dispatch(&next) {
                warn!(error = %e, "host notification failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dispatch(&self, item: &Outgoing) -> HostResult<()> {
        match item {
            Outgoing::Lifecycle(Notification::Registered, snapshot) => {
                let wrap = |e| HostError::collaborator(&snapshot.host_name, e);
                self.ctx.membership.update_host_mappings(snapshot).map_err(wrap)?;
                // Not atomic with the mapping update above.
                let associated = self
                    .ctx
                    .membership
                    .is_host_mapped_to_cluster(&snapshot.host_name)
                    .map_err(wrap)?;
                self.ctx.sink.on_host_registered(snapshot, associated).map_err(wrap)
            }
            Outgoing::Lifecycle(Notification::HeartbeatLost, snapshot) => self
                .ctx
                .sink
                .on_host_heartbeat_lost(snapshot)
                .map_err(|e| HostError::collaborator(&snapshot.host_name, e)),
            Outgoing::Published(event) => {
                let PublishedHostEvent::MaintenanceModeChanged { host_name, .. } = event;
                self.ctx
                    .publisher
                    .publish(event)
                    .map_err(|e| HostError::collaborator(host_name, e))
            }
        }
    }

    // ---- reads ----

    pub fn host_name(&self) -> String {
        self.inner.read().host_name.clone()
    }

    pub fn state(&self) -> HostState {
        self.inner.read().state
    }

    pub fn health_status(&self) -> HostHealthStatus {
        self.inner.read().health_status.clone()
    }

    pub fn last_heartbeat_time(&self) -> i64 {
        self.inner.read().last_heartbeat_time
    }

    pub fn last_registration_time(&self) -> i64 {
        self.inner.read().last_registration_time
    }

    pub fn time_in_state(&self) -> i64 {
        self.inner.read().time_in_state
    }

    pub fn public_host_name(&self) -> Option<String> {
        self.inner.read().public_host_name.clone()
    }

    pub fn ipv4(&self) -> Option<String> {
        self.inner.read().ipv4.clone()
    }

    pub fn ipv6(&self) -> Option<String> {
        self.inner.read().ipv6.clone()
    }

    pub fn os_type(&self) -> Option<String> {
        self.inner.read().os_type.clone()
    }

    pub fn os_arch(&self) -> Option<String> {
        self.inner.read().os_arch.clone()
    }

    pub fn os_info(&self) -> Option<String> {
        self.inner.read().os_info.clone()
    }

    pub fn rack_info(&self) -> Option<String> {
        self.inner.read().rack_info.clone()
    }

    pub fn cpu_count(&self) -> u32 {
        self.inner.read().cpu_count
    }

    pub fn physical_cpu_count(&self) -> u32 {
        self.inner.read().physical_cpu_count
    }

    pub fn total_mem_bytes(&self) -> u64 {
        self.inner.read().total_mem_bytes
    }

    pub fn available_mem_bytes(&self) -> u64 {
        self.inner.read().available_mem_bytes
    }

    pub fn host_attributes(&self) -> BTreeMap<String, String> {
        self.inner.read().host_attributes.clone()
    }

    pub fn disks_info(&self) -> Vec<DiskInfo> {
        self.inner.read().disks_info.clone()
    }

    pub fn agent_version(&self) -> Option<AgentVersion> {
        self.inner.read().agent_version.clone()
    }

    pub fn last_agent_env(&self) -> Option<AgentEnv> {
        self.inner.read().last_agent_env.clone()
    }

    /// Read-only projection for outer layers.
    pub fn convert_to_snapshot(&self) -> HostSnapshot {
        self.inner.read().snapshot()
    }

    // ---- setters ----

    /// Renames a transient host. Once persisted the name is frozen.
    pub fn set_host_name(&self, host_name: &str) -> HostResult<()> {
        let mut inner = self.inner.write();
        if inner.persisted {
            return Err(HostError::HostNameFrozen {
                host_name: inner.host_name.clone(),
            });
        }
        if host_name.trim().is_empty() {
            return Err(HostError::InvalidArgument("host name must not be empty".into()));
        }
        inner.host_name = host_name.to_string();
        Ok(())
    }

    pub fn set_public_host_name(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.public_host_name = value;
            Ok(())
        })
    }

    pub fn set_ipv4(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.ipv4 = value;
            Ok(())
        })
    }

    pub fn set_ipv6(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.ipv6 = value;
            Ok(())
        })
    }

    pub fn set_os_type(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.os_type = value;
            Ok(())
        })
    }

    pub fn set_os_arch(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.os_arch = value;
            Ok(())
        })
    }

    pub fn set_os_info(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.os_info = value;
            Ok(())
        })
    }

    pub fn set_rack_info(&self, value: Option<String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.rack_info = value;
            Ok(())
        })
    }

    pub fn set_cpu_count(&self, cpu_count: u32, physical_cpu_count: u32) -> HostResult<()> {
        self.mutate(|inner| {
            inner.cpu_count = cpu_count;
            inner.physical_cpu_count = physical_cpu_count;
            Ok(())
        })
    }

    pub fn set_memory(&self, total_mem_bytes: u64, available_mem_bytes: u64) -> HostResult<()> {
        self.mutate(|inner| {
            inner.total_mem_bytes = total_mem_bytes;
            inner.available_mem_bytes = available_mem_bytes;
            Ok(())
        })
    }

    /// Merges `attributes` into the open attribute map.
    pub fn set_host_attributes(&self, attributes: BTreeMap<String, String>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.host_attributes.extend(attributes);
            Ok(())
        })
    }

    pub fn set_disks_info(&self, disks: Vec<DiskInfo>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.disks_info = disks;
            Ok(())
        })
    }

    pub fn set_agent_version(&self, version: Option<AgentVersion>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.agent_version = version;
            Ok(())
        })
    }

    pub fn set_last_agent_env(&self, env: Option<AgentEnv>) -> HostResult<()> {
        self.mutate(|inner| {
            inner.last_agent_env = env;
            Ok(())
        })
    }

    // ---- maintenance ----

    /// OFF for any cluster that never had a state written.
    pub fn maintenance_state(&self, cluster_id: u64) -> MaintenanceState {
        self.inner.read().maintenance.get(cluster_id)
    }

    /// Stores the maintenance state for `cluster_id`, writes through and
    /// publishes a maintenance-change event.
    pub fn set_maintenance_state(&self, cluster_id: u64, state: MaintenanceState) -> HostResult<()> {
        {
            let mut inner = self.inner.write();
            let previous = inner.maintenance.set(cluster_id, state);
            self.save_if_persisted(&inner)?;
            info!(
                host = %inner.host_name,
                cluster_id,
                from = %previous,
                to = %state,
                "maintenance state changed"
            );
            self.enqueue([Outgoing::Published(PublishedHostEvent::MaintenanceModeChanged {
                cluster_id,
                host_name: inner.host_name.clone(),
                state,
            })]);
        }
        self.drain_outbox()
    }

    // ---- desired configs ----

    /// Assigns `config` as the desired version of its type for `cluster_id`.
    /// Returns `true` when a new selected mapping was created.
    pub fn add_desired_config(
        &self,
        cluster_id: u64,
        selected: bool,
        user: &str,
        config: &ConfigVersion,
    ) -> HostResult<bool> {
        if user.trim().is_empty() {
            return Err(HostError::InvalidArgument(
                "user must be provided to assign a desired config".into(),
            ));
        }
        if config.config_type.is_empty() || config.tag.is_empty() {
            return Err(HostError::InvalidArgument(
                "config type and tag must not be empty".into(),
            ));
        }

        let mut inner = self.inner.write();
        let (created, change) = inner
            .desired_configs
            .add(cluster_id, selected, user, config, now_millis());
        self.write_mapping_change(&inner, &change)?;
        if created {
            info!(
                host = %inner.host_name,
                cluster_id,
                config_type = %config.config_type,
                tag = %config.tag,
                user,
                "desired config assigned"
            );
        }
        Ok(created)
    }

    /// Selected tag per config type for `cluster_id`.
    pub fn desired_configs(&self, cluster_id: u64) -> BTreeMap<String, String> {
        self.inner.read().desired_configs.desired_tags(cluster_id)
    }

    /// Every mapping row this host holds for `cluster_id`, selected or not.
    pub fn desired_config_mappings(&self, cluster_id: u64) -> Vec<HostConfigMapping> {
        self.inner
            .read()
            .desired_configs
            .rows()
            .iter()
            .filter(|row| row.cluster_id == cluster_id)
            .cloned()
            .collect()
    }

    /// Per config type: the cluster default tag plus the tags pinned by the
    /// config groups this host belongs to.
    pub fn desired_host_configs(&self, cluster_id: u64) -> HostResult<BTreeMap<String, HostConfig>> {
        let host_name = self.host_name();
        let wrap = |e| HostError::collaborator(&host_name, e);
        let defaults = self.ctx.config_lookup.cluster_desired_tags(cluster_id).map_err(wrap)?;
        let groups = self
            .ctx
            .config_lookup
            .config_groups_for_host(cluster_id, &host_name)
            .map_err(wrap)?;

        let mut result: BTreeMap<String, HostConfig> = defaults
            .into_iter()
            .map(|(config_type, tag)| {
                (
                    config_type,
                    HostConfig {
                        default_tag: Some(tag),
                        ..HostConfig::default()
                    },
                )
            })
            .collect();

        for group in groups {
            for (config_type, tag) in group.configurations {
                result
                    .entry(config_type)
                    .or_default()
                    .config_group_overrides
                    .insert(group.id, tag);
            }
        }
        Ok(result)
    }

    #[cfg(test)]
    fn write(&self) -> parking_lot::RwLockWriteGuard<'_, HostInner> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HostStore, InMemoryHostStore};
    use std::sync::Arc;

    fn registration(time: i64) -> HostEvent {
        HostEvent::registration(
            "h1",
            RegistrationRequest {
                host_info: HostInfo {
                    host_name: Some("h1".into()),
                    ip_address: Some("10.0.0.7".into()),
                    processor_count: 8,
                    physical_processor_count: 2,
                    os: Some("CentOS".into()),
                    os_release: Some("6.4".into()),
                    architecture: Some("x86_64".into()),
                    kernel: Some("Linux".into()),
                    ..HostInfo::default()
                },
                registration_time: time,
                agent_env: None,
                agent_version: Some(AgentVersion::new("1.4.0")),
                public_host_name: Some("h1.example.com".into()),
            },
        )
    }

    fn host_with_store() -> (Host, Arc<InMemoryHostStore>) {
        let store = Arc::new(InMemoryHostStore::new());
        let host = Host::new("h1", HostContext::new(store.clone()));
        (host, store)
    }

    #[test]
    fn test_registration_imports_and_persists() {
        let (host, store) = host_with_store();
        assert_eq!(host.handle_event(&registration(1000)).unwrap(), HostState::WaitingForHostStatusUpdates);
        assert!(host.is_persisted());
        assert_eq!(host.last_registration_time(), 1000);
        assert_eq!(host.last_heartbeat_time(), 1000);
        assert_eq!(host.time_in_state(), 1000);
        assert_eq!(host.os_type().as_deref(), Some("centos6"));
        assert_eq!(host.ipv6().as_deref(), Some("10.0.0.7"));
        let attrs = host.host_attributes();
        assert_eq!(attrs.get("processors_count").map(String::as_str), Some("8"));
        assert_eq!(attrs.get("selinux_enabled").map(String::as_str), Some("false"));
        assert!(!attrs.contains_key("swap_size"));

        let record = store.find_by_host_id("h1").unwrap().unwrap();
        assert_eq!(record.current_state, HostState::WaitingForHostStatusUpdates);
    }

    #[test]
    fn test_write_through_after_persist() {
        let (host, store) = host_with_store();
        host.handle_event(&registration(1000)).unwrap();
        host.handle_event(&HostEvent::status_updates_received("h1", 1005)).unwrap();
        let record = store.find_by_host_id("h1").unwrap().unwrap();
        assert_eq!(record.current_state, HostState::Healthy);
        assert_eq!(record.time_in_state, 1005);
    }

    #[test]
    fn test_transient_host_is_not_written() {
        let (host, store) = host_with_store();
        host.set_rack_info(Some("/r1".into())).unwrap();
        assert!(store.find_by_host_id("h1").unwrap().is_none());
    }

    #[test]
    fn test_name_frozen_after_persist() {
        let (host, _) = host_with_store();
        host.set_host_name("h1.renamed").unwrap();
        host.persist().unwrap();
        assert!(matches!(
            host.set_host_name("other"),
            Err(HostError::HostNameFrozen { .. })
        ));
    }

    #[test]
    fn test_refresh_of_unregistered_transient_host_is_an_error() {
        let (host, store) = host_with_store();
        let err = host.refresh().unwrap_err();
        assert!(matches!(err, HostError::NotPersisted(ref name) if name == "h1"));
        assert!(store.find_by_host_id("h1").unwrap().is_none());

        host.persist().unwrap();
        host.refresh().unwrap();
    }

    #[test]
    fn test_second_persist_reloads_from_store() {
        let (host, store) = host_with_store();
        host.persist().unwrap();
        let mut record = store.find_by_host_id("h1").unwrap().unwrap();
        record.rack_info = Some("/rack-9".into());
        store.merge(&record).unwrap();

        host.persist().unwrap();
        assert_eq!(host.rack_info().as_deref(), Some("/rack-9"));
    }

    #[test]
    fn test_attribute_map_is_merged() {
        let (host, _) = host_with_store();
        host.import_attributes(&HostInfo {
            kernel: Some("Linux".into()),
            mounts: vec![DiskInfo::new("/")],
            ..HostInfo::default()
        })
        .unwrap();
        host.import_attributes(&HostInfo {
            timezone: Some("UTC".into()),
            ..HostInfo::default()
        })
        .unwrap();
        let attrs = host.host_attributes();
        assert_eq!(attrs.get("kernel").map(String::as_str), Some("Linux"));
        assert_eq!(attrs.get("timezone").map(String::as_str), Some("UTC"));
        assert_eq!(host.disks_info().len(), 1);
    }

    #[test]
    fn test_rehydrate_restores_state_and_rows() {
        let (host, store) = host_with_store();
        host.handle_event(&registration(1000)).unwrap();
        host.set_maintenance_state(3, MaintenanceState::On).unwrap();
        host.add_desired_config(3, true, "admin", &ConfigVersion::new("core-site", "v1"))
            .unwrap();

        let loaded = Host::load("h1", HostContext::new(store.clone())).unwrap().unwrap();
        assert_eq!(loaded.state(), HostState::WaitingForHostStatusUpdates);
        assert_eq!(loaded.maintenance_state(3), MaintenanceState::On);
        assert_eq!(loaded.desired_configs(3).get("core-site").map(String::as_str), Some("v1"));
        assert!(loaded.is_persisted());
    }

    #[test]
    fn test_blank_user_rejected_without_mutation() {
        let (host, _) = host_with_store();
        let err = host
            .add_desired_config(1, true, "  ", &ConfigVersion::new("core-site", "v1"))
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidArgument(_)));
        assert!(host.desired_config_mappings(1).is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let (host, _) = host_with_store();
        let before = host.convert_to_snapshot();
        host.write().rack_info = Some("/changed".into());
        assert_eq!(before.rack_info, None);
        assert_eq!(host.convert_to_snapshot().rack_info.as_deref(), Some("/changed"));
    }
}
