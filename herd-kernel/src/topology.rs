//! Cluster membership and config lookup backed by the `clusters` section of
//! the kernel configuration.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::collab::{ClusterMembership, ConfigGroup, ConfigLookup};
use crate::config::ClusterConf;
use crate::error::CollaboratorError;
use crate::host::HostSnapshot;

pub struct ConfiguredTopology {
    clusters: BTreeMap<u64, ClusterConf>,
    /// host name -> clusters it was mapped to at its last registration
    mappings: RwLock<HashMap<String, BTreeSet<u64>>>,
}

impl ConfiguredTopology {
    pub fn new(clusters: BTreeMap<u64, ClusterConf>) -> Self {
        Self {
            clusters,
            mappings: RwLock::new(HashMap::new()),
        }
    }

    pub fn clusters_of(&self, host_name: &str) -> BTreeSet<u64> {
        self.clusters
            .iter()
            .filter(|(_, cluster)| cluster.hosts.iter().any(|h| h == host_name))
            .map(|(id, _)| *id)
            .collect()
    }

    fn cluster(&self, cluster_id: u64) -> Result<&ClusterConf, CollaboratorError> {
        self.clusters
            .get(&cluster_id)
            .ok_or_else(|| CollaboratorError::ConfigLookup(format!("unknown cluster {cluster_id}")))
    }
}

impl ClusterMembership for ConfiguredTopology {
    fn update_host_mappings(&self, host: &HostSnapshot) -> Result<(), CollaboratorError> {
        let clusters = self.clusters_of(&host.host_name);
        debug!(host = %host.host_name, clusters = ?clusters, "host mappings updated");
        self.mappings.write().insert(host.host_name.clone(), clusters);
        Ok(())
    }

    fn is_host_mapped_to_cluster(&self, host_name: &str) -> Result<bool, CollaboratorError> {
        Ok(self
            .mappings
            .read()
            .get(host_name)
            .is_some_and(|clusters| !clusters.is_empty()))
    }
}

impl ConfigLookup for ConfiguredTopology {
    fn cluster_desired_tags(&self, cluster_id: u64) -> Result<BTreeMap<String, String>, CollaboratorError> {
        Ok(self.cluster(cluster_id)?.desired_configs.clone())
    }

    fn config_groups_for_host(
        &self,
        cluster_id: u64,
        host_name: &str,
    ) -> Result<Vec<ConfigGroup>, CollaboratorError> {
        Ok(self
            .cluster(cluster_id)?
            .config_groups
            .iter()
            .filter(|group| group.hosts.iter().any(|h| h == host_name))
            .map(|group| ConfigGroup {
                id: group.id,
                name: group.name.clone(),
                configurations: group.configurations.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigGroupConf;
    use crate::host::Host;
    use crate::collab::HostContext;

    fn topology() -> ConfiguredTopology {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            5,
            ClusterConf {
                name: "c1".into(),
                hosts: vec!["h1".into(), "h2".into()],
                desired_configs: BTreeMap::from([("core-site".to_string(), "v1".to_string())]),
                config_groups: vec![ConfigGroupConf {
                    id: 11,
                    name: "g".into(),
                    hosts: vec!["h2".into()],
                    configurations: BTreeMap::from([("core-site".to_string(), "g11".to_string())]),
                }],
            },
        );
        ConfiguredTopology::new(clusters)
    }

    #[test]
    fn test_mapping_is_known_only_after_update() {
        let topo = topology();
        assert!(!topo.is_host_mapped_to_cluster("h1").unwrap());
        let snap = Host::new("h1", HostContext::in_memory()).convert_to_snapshot();
        topo.update_host_mappings(&snap).unwrap();
        assert!(topo.is_host_mapped_to_cluster("h1").unwrap());

        let stray = Host::new("h9", HostContext::in_memory()).convert_to_snapshot();
        topo.update_host_mappings(&stray).unwrap();
        assert!(!topo.is_host_mapped_to_cluster("h9").unwrap());
    }

    #[test]
    fn test_groups_and_unknown_cluster() {
        let topo = topology();
        assert_eq!(topo.config_groups_for_host(5, "h2").unwrap().len(), 1);
        assert!(topo.config_groups_for_host(5, "h1").unwrap().is_empty());
        assert!(matches!(
            topo.cluster_desired_tags(99),
            Err(CollaboratorError::ConfigLookup(_))
        ));
    }
}
