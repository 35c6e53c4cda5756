//! The host lifecycle as data: one arc per valid `(state, event)` pair, each
//! pointing at a plain function over the locked host.
//!
//! Handlers only touch fields. Whatever must happen outside the host lock
//! (durable write of a first registration, sink notifications) is returned
//! as [`Effects`] and carried out by the caller.

use std::sync::LazyLock;
use tracing::{debug, info};

use super::types::{HealthStatus, HostEventKind, HostEventPayload, HostState};
use super::HostInner;
use crate::fsm::TransitionTable;

/// Side effect queued by a handler, dispatched after the host lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    Registered,
    HeartbeatLost,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Effects {
    /// Create the durable record if the host is still transient.
    pub persist: bool,
    pub notifications: Vec<Notification>,
}

impl Effects {
    fn notify(notification: Notification) -> Self {
        Self {
            persist: false,
            notifications: vec![notification],
        }
    }
}

pub(crate) type HostTransitionTable =
    TransitionTable<HostState, HostEventKind, HostInner, HostEventPayload, Effects>;

pub(crate) static HOST_STATE_MACHINE: LazyLock<HostTransitionTable> = LazyLock::new(build);

fn build() -> HostTransitionTable {
    use HostEventKind as E;
    use HostState as S;

    TransitionTable::builder()
        .register(S::Init, E::RegistrationRequest, S::WaitingForHostStatusUpdates, registration_received)
        .register(S::Init, E::HeartbeatLost, S::HeartbeatLost, heartbeat_lost)
        .register(S::WaitingForHostStatusUpdates, E::StatusUpdatesReceived, S::Healthy, status_updates_received)
        .register_noop(S::WaitingForHostStatusUpdates, E::HeartbeatHealthy, S::WaitingForHostStatusUpdates)
        .register(
            S::WaitingForHostStatusUpdates,
            E::HeartbeatUnhealthy,
            S::WaitingForHostStatusUpdates,
            became_unhealthy,
        )
        .register(S::WaitingForHostStatusUpdates, E::HeartbeatLost, S::HeartbeatLost, heartbeat_lost)
        .register(S::Healthy, E::HeartbeatHealthy, S::Healthy, heartbeat_received)
        .register(S::Healthy, E::HeartbeatLost, S::HeartbeatLost, heartbeat_lost)
        .register(S::Healthy, E::HeartbeatUnhealthy, S::Unhealthy, became_unhealthy)
        .register(S::Healthy, E::RegistrationRequest, S::WaitingForHostStatusUpdates, registration_received)
        .register(S::Unhealthy, E::HeartbeatHealthy, S::Healthy, became_healthy)
        .register(S::Unhealthy, E::HeartbeatUnhealthy, S::Unhealthy, heartbeat_received)
        .register(S::Unhealthy, E::HeartbeatLost, S::HeartbeatLost, heartbeat_lost)
        .register(S::Unhealthy, E::RegistrationRequest, S::WaitingForHostStatusUpdates, registration_received)
        .register_noop(S::HeartbeatLost, E::HeartbeatLost, S::HeartbeatLost)
        .register(S::HeartbeatLost, E::RegistrationRequest, S::WaitingForHostStatusUpdates, registration_received)
        .build()
}

/// State a host lands in when `kind` fires at `state`, or `None` when the
/// pair is not a valid transition.
pub fn transition_target(state: HostState, kind: HostEventKind) -> Option<HostState> {
    HOST_STATE_MACHINE.target(state, kind)
}

/// Every `(from, event, to)` arc of the host lifecycle, sorted.
pub fn host_transitions() -> Vec<(HostState, HostEventKind, HostState)> {
    let mut arcs: Vec<_> = HOST_STATE_MACHINE.arcs().collect();
    arcs.sort();
    arcs
}

fn registration_received(host: &mut HostInner, event: &HostEventPayload) -> Effects {
    let HostEventPayload::RegistrationRequest(req) = event else {
        return Effects::default();
    };

    host.import_host_info(&req.host_info);
    host.last_registration_time = req.registration_time;
    host.last_heartbeat_time = req.registration_time;
    host.agent_version = req.agent_version.clone();
    host.last_agent_env = req.agent_env.clone();
    host.public_host_name = req.public_host_name.clone();

    info!(
        host = %host.host_name,
        registration_time = req.registration_time,
        agent_version = ?req.agent_version.as_ref().map(|v| v.version.as_str()),
        "received host registration"
    );

    Effects {
        persist: true,
        notifications: vec![Notification::Registered],
    }
}

fn status_updates_received(host: &mut HostInner, _event: &HostEventPayload) -> Effects {
    host.health_status = host.health_status.with_status(HealthStatus::Healthy);
    debug!(host = %host.host_name, "status updates received");
    Effects::default()
}

fn heartbeat_received(host: &mut HostInner, event: &HostEventPayload) -> Effects {
    match event {
        HostEventPayload::HeartbeatHealthy {
            heartbeat_time,
            agent_env,
            mounts,
        } => {
            host.record_heartbeat(*heartbeat_time);
            if let Some(env) = agent_env {
                host.last_agent_env = Some(env.clone());
            }
            if let Some(mounts) = mounts {
                host.disks_info = mounts.clone();
            }
        }
        HostEventPayload::HeartbeatUnhealthy { heartbeat_time, .. } => {
            host.record_heartbeat(*heartbeat_time);
        }
        _ => {}
    }
    Effects::default()
}

fn became_healthy(host: &mut HostInner, event: &HostEventPayload) -> Effects {
    if let HostEventPayload::HeartbeatHealthy { heartbeat_time, .. } = event {
        host.record_heartbeat(*heartbeat_time);
    }
    host.health_status = host.health_status.with_status(HealthStatus::Healthy);
    info!(host = %host.host_name, "host recovered");
    Effects::default()
}

fn became_unhealthy(host: &mut HostInner, event: &HostEventPayload) -> Effects {
    if let HostEventPayload::HeartbeatUnhealthy {
        heartbeat_time,
        health_status,
    } = event
    {
        host.record_heartbeat(*heartbeat_time);
        host.health_status = health_status.clone();
        info!(
            host = %host.host_name,
            status = ?health_status.status,
            report = %health_status.health_report,
            "host reported unhealthy"
        );
    }
    Effects::default()
}

fn heartbeat_lost(host: &mut HostInner, _event: &HostEventPayload) -> Effects {
    host.health_status = host.health_status.with_status(HealthStatus::Unknown);
    info!(
        host = %host.host_name,
        last_heartbeat = host.last_heartbeat_time,
        "host heartbeat lost"
    );
    Effects::notify(Notification::HeartbeatLost)
}
