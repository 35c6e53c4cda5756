//! Événements concurrents sur un même host : le résultat final doit
//! correspondre à un ordre série de ces mêmes événements.

use herd_devkit::{registration_event, HostHarness};
use herd_kernel::host::{HealthStatus, HostHealthStatus};
use herd_kernel::{Host, HostContext, HostEvent, HostState};
use std::sync::{Arc, Barrier};
use std::thread;

fn heartbeats(host_name: &str, round: usize) -> Vec<HostEvent> {
    (0..6)
        .map(|i| {
            let time = 2000 + (round * 10 + i) as i64;
            if (i + round) % 2 == 0 {
                HostEvent::heartbeat_healthy(host_name, time)
            } else {
                HostEvent::heartbeat_unhealthy(
                    host_name,
                    time,
                    HostHealthStatus::new(HealthStatus::Unhealthy, format!("report-{i}")),
                )
            }
        })
        .collect()
}

fn healthy_host(host_name: &str) -> Host {
    let host = Host::new(host_name, HostContext::in_memory());
    host.handle_event(&registration_event(host_name, 1000)).unwrap();
    host.handle_event(&HostEvent::status_updates_received(host_name, 1005))
        .unwrap();
    host
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for perm in permutations(n - 1) {
        for slot in 0..=perm.len() {
            let mut p = perm.clone();
            p.insert(slot, n - 1);
            out.push(p);
        }
    }
    out
}

/// (state, health) atteignables par un ordre série des événements
fn serial_outcomes(events: &[HostEvent]) -> Vec<(HostState, HostHealthStatus)> {
    permutations(events.len())
        .into_iter()
        .map(|order| {
            let host = healthy_host("serial");
            for i in order {
                let mut event = events[i].clone();
                event.host_name = "serial".into();
                host.handle_event(&event).unwrap();
            }
            (host.state(), host.health_status())
        })
        .collect()
}

#[test]
fn test_concurrent_heartbeats_match_a_serial_order() {
    for round in 0..8 {
        let harness = HostHarness::new();
        let host = harness.drive_to("h1", HostState::Healthy).unwrap();
        let events = heartbeats("h1", round);
        let expected = serial_outcomes(&events);
        let max_time = events.iter().filter_map(HostEvent::timestamp).max().unwrap();

        let barrier = Arc::new(Barrier::new(events.len()));
        thread::scope(|s| {
            for event in &events {
                let barrier = barrier.clone();
                let registry = harness.registry.clone();
                s.spawn(move || {
                    barrier.wait();
                    registry.handle_event(event).unwrap();
                });
            }
        });

        let outcome = (host.state(), host.health_status());
        assert!(
            expected.contains(&outcome),
            "round {round}: {outcome:?} not reachable serially"
        );
        assert_eq!(host.last_heartbeat_time(), max_time);
        assert!(harness.sink.heartbeat_lost_count("h1") == 0);
    }
}

#[test]
fn test_hosts_progress_independently_in_parallel() {
    let harness = HostHarness::new();
    let names: Vec<String> = (0..16).map(|i| format!("node{i}")).collect();

    thread::scope(|s| {
        for name in &names {
            let registry = harness.registry.clone();
            s.spawn(move || {
                registry.handle_event(&registration_event(name, 1000)).unwrap();
                registry
                    .handle_event(&HostEvent::status_updates_received(name.as_str(), 1001))
                    .unwrap();
                for t in 0..50 {
                    registry
                        .handle_event(&HostEvent::heartbeat_healthy(name.as_str(), 1100 + t))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(harness.registry.len(), names.len());
    for name in &names {
        let host = harness.registry.get(name).unwrap();
        assert_eq!(host.state(), HostState::Healthy);
        assert_eq!(host.last_heartbeat_time(), 1149);
        assert_eq!(harness.sink.registered_count(name), 1);
    }
}

#[test]
fn test_concurrent_registrations_create_one_host() {
    let harness = HostHarness::new();
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|s| {
        for _ in 0..8 {
            let barrier = barrier.clone();
            let registry = harness.registry.clone();
            s.spawn(move || {
                barrier.wait();
                // seule la première registration part d'INIT ; les autres
                // trouvent le host en attente et sont rejetées
                let _ = registry.handle_event(&registration_event("h1", 1000));
            });
        }
    });

    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.sink.registered_count("h1"), 1);
    assert_eq!(harness.store.writes_for("h1"), 1);
}
