use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceState {
    #[default]
    Off,
    On,
    /// Inherited from an enclosing object (service or cluster) in maintenance.
    Implied,
}

impl fmt::Display for MaintenanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaintenanceState::Off => "OFF",
            MaintenanceState::On => "ON",
            MaintenanceState::Implied => "IMPLIED",
        };
        f.write_str(s)
    }
}

/// Per-cluster maintenance overrides. Clusters without an entry are OFF;
/// entries only appear once a state has been written for that cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaintenanceOverlay {
    by_cluster: BTreeMap<u64, MaintenanceState>,
}

impl MaintenanceOverlay {
    pub fn get(&self, cluster_id: u64) -> MaintenanceState {
        self.by_cluster
            .get(&cluster_id)
            .copied()
            .unwrap_or_default()
    }

    /// Stores `state` for `cluster_id` and returns the previous effective state.
    pub fn set(&mut self, cluster_id: u64, state: MaintenanceState) -> MaintenanceState {
        self.by_cluster
            .insert(cluster_id, state)
            .unwrap_or_default()
    }

    pub fn is_materialized(&self, cluster_id: u64) -> bool {
        self.by_cluster.contains_key(&cluster_id)
    }

    pub fn entries(&self) -> &BTreeMap<u64, MaintenanceState> {
        &self.by_cluster
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cluster_reads_off_without_materializing() {
        let overlay = MaintenanceOverlay::default();
        assert_eq!(overlay.get(5), MaintenanceState::Off);
        assert_eq!(overlay.get(u64::MAX), MaintenanceState::Off);
        assert!(!overlay.is_materialized(5));
    }

    #[test]
    fn test_set_materializes_and_returns_previous() {
        let mut overlay = MaintenanceOverlay::default();
        assert_eq!(overlay.set(5, MaintenanceState::On), MaintenanceState::Off);
        assert_eq!(overlay.set(5, MaintenanceState::Implied), MaintenanceState::On);
        assert_eq!(overlay.get(5), MaintenanceState::Implied);
        assert_eq!(overlay.get(6), MaintenanceState::Off);
        assert!(overlay.is_materialized(5));
    }

    #[test]
    fn test_json_boundary_keeps_entries() {
        let mut overlay = MaintenanceOverlay::default();
        overlay.set(2, MaintenanceState::On);
        let raw = overlay.to_json().unwrap();
        assert_eq!(raw, r#"{"2":"ON"}"#);
        assert_eq!(MaintenanceOverlay::from_json(&raw).unwrap(), overlay);
    }
}
