//! Desired configuration assignment for one host.
//!
//! A host keeps every `(cluster, config type) -> version tag` row it was ever
//! given; at most one row per `(cluster, config type)` is selected at a time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cluster configuration version: config type (e.g. `core-site`) plus tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub config_type: String,
    pub tag: String,
}

impl ConfigVersion {
    pub fn new(config_type: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            config_type: config_type.into(),
            tag: tag.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfigMapping {
    /// Host-local row id, never reused.
    pub id: u64,
    pub cluster_id: u64,
    pub config_type: String,
    pub version_tag: String,
    pub user: String,
    pub selected: bool,
    pub create_time: i64,
}

/// Host-level view of one config type: the cluster default tag plus the tags
/// pinned by config groups this host belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub default_tag: Option<String>,
    pub config_group_overrides: BTreeMap<u64, String>,
}

/// Rows touched by one `add` call, in the order they must be written.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MappingChange {
    pub deselected: Vec<HostConfigMapping>,
    pub created: Option<HostConfigMapping>,
}

impl MappingChange {
    pub fn is_empty(&self) -> bool {
        self.deselected.is_empty() && self.created.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredConfigMappings {
    rows: Vec<HostConfigMapping>,
    next_id: u64,
}

impl DesiredConfigMappings {
    pub fn from_rows(mut rows: Vec<HostConfigMapping>) -> Self {
        rows.sort_by_key(|row| row.id);
        let next_id = rows.last().map(|row| row.id + 1).unwrap_or(1);
        Self { rows, next_id }
    }

    pub fn rows(&self) -> &[HostConfigMapping] {
        &self.rows
    }

    pub fn selected(&self, cluster_id: u64, config_type: &str) -> Option<&HostConfigMapping> {
        self.rows
            .iter()
            .find(|row| row.selected && row.cluster_id == cluster_id && row.config_type == config_type)
    }

    /// Applies an assignment and reports the rows it changed.
    ///
    /// Returns `(true, change)` when a new selected row was created. Assigning
    /// the already-selected tag creates nothing; with `selected == false` it
    /// deselects that row instead.
    pub(crate) fn add(
        &mut self,
        cluster_id: u64,
        selected: bool,
        user: &str,
        config: &ConfigVersion,
        now: i64,
    ) -> (bool, MappingChange) {
        let mut change = MappingChange::default();

        if let Some(existing) = self
            .rows
            .iter_mut()
            .find(|row| row.selected && row.cluster_id == cluster_id && row.config_type == config.config_type)
        {
            if existing.version_tag == config.tag {
                if !selected {
                    existing.selected = false;
                    change.deselected.push(existing.clone());
                }
                return (false, change);
            }
        }

        for row in self
            .rows
            .iter_mut()
            .filter(|row| row.cluster_id == cluster_id && row.config_type == config.config_type)
        {
            if row.selected {
                row.selected = false;
                change.deselected.push(row.clone());
            }
        }

        let created = HostConfigMapping {
            id: self.next_id,
            cluster_id,
            config_type: config.config_type.clone(),
            version_tag: config.tag.clone(),
            user: user.to_string(),
            selected: true,
            create_time: now,
        };
        self.next_id += 1;
        self.rows.push(created.clone());
        change.created = Some(created);
        (true, change)
    }

    /// Selected tag per config type for one cluster.
    pub fn desired_tags(&self, cluster_id: u64) -> BTreeMap<String, String> {
        self.rows
            .iter()
            .filter(|row| row.selected && row.cluster_id == cluster_id)
            .map(|row| (row.config_type.clone(), row.version_tag.clone()))
            .collect()
    }

    pub fn cluster_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.rows.iter().map(|row| row.cluster_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_site(tag: &str) -> ConfigVersion {
        ConfigVersion::new("core-site", tag)
    }

    #[test]
    fn test_new_tag_deselects_previous() {
        let mut m = DesiredConfigMappings::default();
        let (created, _) = m.add(5, true, "admin", &core_site("v1"), 10);
        assert!(created);
        let (created, change) = m.add(5, true, "admin", &core_site("v2"), 20);
        assert!(created);
        assert_eq!(change.deselected.len(), 1);
        assert_eq!(change.deselected[0].version_tag, "v1");
        assert_eq!(m.desired_tags(5).get("core-site").map(String::as_str), Some("v2"));
        assert_eq!(m.rows().iter().filter(|r| r.selected).count(), 1);
        assert_eq!(m.rows().len(), 2);
    }

    #[test]
    fn test_same_tag_twice_is_noop() {
        let mut m = DesiredConfigMappings::default();
        m.add(5, true, "admin", &core_site("v1"), 10);
        let (created, change) = m.add(5, true, "admin", &core_site("v1"), 11);
        assert!(!created);
        assert!(change.is_empty());
        assert_eq!(m.rows().len(), 1);
    }

    #[test]
    fn test_same_tag_unselected_deselects() {
        let mut m = DesiredConfigMappings::default();
        m.add(5, true, "admin", &core_site("v1"), 10);
        let (created, change) = m.add(5, false, "admin", &core_site("v1"), 11);
        assert!(!created);
        assert_eq!(change.deselected.len(), 1);
        assert!(m.selected(5, "core-site").is_none());
        assert!(m.desired_tags(5).is_empty());
    }

    #[test]
    fn test_clusters_and_types_are_independent() {
        let mut m = DesiredConfigMappings::default();
        m.add(5, true, "admin", &core_site("v1"), 10);
        m.add(6, true, "admin", &core_site("v9"), 10);
        m.add(5, true, "admin", &ConfigVersion::new("hdfs-site", "h1"), 10);
        assert_eq!(m.desired_tags(5).len(), 2);
        assert_eq!(m.desired_tags(6).get("core-site").map(String::as_str), Some("v9"));
        assert_eq!(m.cluster_ids(), vec![5, 6]);
    }

    #[test]
    fn test_reselecting_old_tag_creates_fresh_row() {
        let mut m = DesiredConfigMappings::default();
        m.add(5, true, "admin", &core_site("v1"), 10);
        m.add(5, true, "admin", &core_site("v2"), 20);
        let (created, change) = m.add(5, true, "ops", &core_site("v1"), 30);
        assert!(created);
        let row = change.created.unwrap();
        assert_eq!(row.id, 3);
        assert_eq!(row.user, "ops");
        assert_eq!(m.selected(5, "core-site").unwrap().id, 3);
    }

    #[test]
    fn test_from_rows_continues_ids() {
        let rows = vec![HostConfigMapping {
            id: 7,
            cluster_id: 1,
            config_type: "core-site".into(),
            version_tag: "v1".into(),
            user: "admin".into(),
            selected: true,
            create_time: 0,
        }];
        let mut m = DesiredConfigMappings::from_rows(rows);
        let (_, change) = m.add(1, true, "admin", &core_site("v2"), 1);
        assert_eq!(change.created.unwrap().id, 8);
    }
}
