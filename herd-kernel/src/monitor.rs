/**
 * HEARTBEAT MONITOR - Détection des hosts silencieux
 *
 * RÔLE : Tout host qui n'est pas déjà HEARTBEAT_LOST et dont le dernier
 * heartbeat est plus vieux que le timeout reçoit un événement HeartbeatLost.
 *
 * sweep() est synchrone (write-through bloquant) ; spawn() le lance sur un
 * interval tokio via spawn_blocking.
 */

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::host::{now_millis, HostEvent, HostState};
use crate::registry::SharedHostRegistry;

pub struct HeartbeatMonitor {
    registry: SharedHostRegistry,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: SharedHostRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Marks every silent host as lost at time `now` (epoch ms) and returns
    /// the names of the hosts it marked.
    pub fn sweep(&self, now: i64) -> Vec<String> {
        let threshold = now - self.timeout.as_millis() as i64;
        let mut marked = Vec::new();

        for host in self.registry.hosts() {
            // rehydrated hosts carry no heartbeat time until their agent reports
            let last_seen = host.last_heartbeat_time().max(host.last_registration_time());
            if host.state() == HostState::HeartbeatLost || last_seen >= threshold {
                continue;
            }
            let host_name = host.host_name();
            match self.registry.handle_event(&HostEvent::heartbeat_lost(&host_name)) {
                Ok(_) => marked.push(host_name),
                Err(e) => warn!(host = %host_name, error = %e, "failed to mark host as lost"),
            }
        }

        if !marked.is_empty() {
            info!(count = marked.len(), hosts = ?marked, "hosts marked as heartbeat lost");
        }
        marked.sort();
        marked
    }

    pub fn spawn(self, check_interval: Duration) -> JoinHandle<()> {
        info!(
            timeout_secs = self.timeout.as_secs(),
            check_interval_secs = check_interval.as_secs(),
            "starting heartbeat monitor"
        );
        let monitor = std::sync::Arc::new(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;
                let m = monitor.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || m.sweep(now_millis())).await {
                    warn!(error = %e, "heartbeat sweep aborted");
                }
            }
        })
    }
}
