/**
 * HOST REGISTRY - Catalogue des hosts vivants du serveur herd
 *
 * RÔLE : Une seule instance `Host` par nom de host, partagée par tous les
 * chemins qui traitent registrations et heartbeats.
 *
 * FONCTIONNEMENT :
 * - REGISTRATION_REQUEST pour un host inconnu => création du host (transient)
 * - REGISTRATION_REQUEST annonçant un FQDN déjà suivi => routé vers ce host
 * - tout autre événement pour un host inconnu => HostError::HostNotFound
 * - handle_batch : un échec par host n'interrompt jamais le reste du lot
 * - load_from_store : réhydrate les hosts persistés au démarrage
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collab::HostContext;
use crate::error::{HostError, HostResult};
use crate::host::{Host, HostEvent, HostEventKind, HostEventPayload, HostState};

pub type SharedHostRegistry = Arc<HostRegistry>;

/// Result of one event of a batch.
#[derive(Debug)]
pub struct EventOutcome {
    pub host_name: String,
    pub event: HostEventKind,
    pub result: HostResult<HostState>,
}

impl EventOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct HostRegistry {
    hosts: RwLock<HashMap<String, Arc<Host>>>,
    ctx: HostContext,
}

impl HostRegistry {
    pub fn new(ctx: HostContext) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            ctx,
        }
    }

    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    /// Rehydrates every host of the store. A record that cannot be decoded is
    /// logged and skipped; returns how many hosts were loaded.
    pub fn load_from_store(&self) -> HostResult<usize> {
        let records = self
            .ctx
            .store
            .find_all()
            .map_err(|e| HostError::persistence("*", e))?;

        let mut loaded = 0;
        for record in records {
            let host_name = record.host_name.clone();
            let mappings = match self.ctx.store.find_config_mappings(&host_name) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(host = %host_name, error = %e, "skipping host: config mappings unreadable");
                    continue;
                }
            };
            match Host::rehydrate(record, mappings, self.ctx.clone()) {
                Ok(host) => {
                    self.hosts.write().insert(host_name, Arc::new(host));
                    loaded += 1;
                }
                Err(e) => warn!(host = %host_name, error = %e, "skipping host: record unreadable"),
            }
        }
        info!(hosts = loaded, "host registry loaded from store");
        Ok(loaded)
    }

    pub fn get(&self, host_name: &str) -> Option<Arc<Host>> {
        self.hosts.read().get(host_name).cloned()
    }

    /// Live host for `host_name`, creating a transient one when absent.
    pub fn get_or_create(&self, host_name: &str) -> Arc<Host> {
        if let Some(host) = self.get(host_name) {
            return host;
        }
        let mut hosts = self.hosts.write();
        hosts
            .entry(host_name.to_string())
            .or_insert_with(|| {
                debug!(host = %host_name, "new transient host");
                Arc::new(Host::new(host_name, self.ctx.clone()))
            })
            .clone()
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().values().cloned().collect()
    }

    pub fn host_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hosts.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    pub fn handle_event(&self, event: &HostEvent) -> HostResult<HostState> {
        if event.kind() != HostEventKind::RegistrationRequest {
            let host = self
                .get(&event.host_name)
                .ok_or_else(|| HostError::HostNotFound(event.host_name.clone()))?;
            return host.handle_event(event);
        }

        if let Some(reported) = reported_host_name(event) {
            if let Some(host) = self.get(reported) {
                debug!(key = %event.host_name, host = %reported, "registration routed to tracked host");
                return host.handle_event(event);
            }
        }

        let host = self.get_or_create(&event.host_name);
        let result = host.handle_event(event);
        self.follow_rename(&event.host_name, &host);
        result
    }

    /// Processes every event independently and reports one outcome each.
    pub fn handle_batch(&self, events: &[HostEvent]) -> Vec<EventOutcome> {
        let outcomes: Vec<EventOutcome> = events
            .iter()
            .map(|event| EventOutcome {
                host_name: event.host_name.clone(),
                event: event.kind(),
                result: self.handle_event(event),
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        if failed > 0 {
            warn!(total = outcomes.len(), failed, "host event batch had failures");
        }
        outcomes
    }

    /// A transient host may take the FQDN reported at registration; keep the
    /// registry keyed by the host's actual name. When another instance got
    /// that name first, the renamed one is evicted.
    fn follow_rename(&self, key: &str, host: &Arc<Host>) {
        let actual = host.host_name();
        if actual == key {
            return;
        }
        let mut hosts = self.hosts.write();
        if !hosts.get(key).is_some_and(|current| Arc::ptr_eq(current, host)) {
            return;
        }
        hosts.remove(key);
        match hosts.get(&actual) {
            Some(tracked) if !Arc::ptr_eq(tracked, host) => {
                warn!(key = %key, host = %actual, "host name already tracked, dropping duplicate instance");
            }
            _ => {
                hosts.insert(actual.clone(), host.clone());
                info!(from = %key, to = %actual, "host re-keyed after registration");
            }
        }
    }
}

/// FQDN carried by a registration when it differs from the event key.
fn reported_host_name(event: &HostEvent) -> Option<&str> {
    let HostEventPayload::RegistrationRequest(req) = &event.payload else {
        return None;
    };
    req.host_info
        .host_name
        .as_deref()
        .filter(|name| !name.is_empty() && *name != event.host_name)
}
