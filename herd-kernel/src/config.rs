/**
 * KERNEL CONFIG - Configuration YAML du kernel herd
 *
 * RÔLE : Broker MQTT, chemin du store, délais heartbeat et topologie des
 * clusters (hosts, configs désirées, config groups).
 *
 * FONCTIONNEMENT : fichier pointé par HERD_KERNEL_CONFIG (défaut kernel.yaml).
 * Fichier absent ou invalide => config par défaut + warning, jamais de panic.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub store: StoreConf,
    pub heartbeat: HeartbeatConf,
    pub clusters: BTreeMap<u64, ClusterConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    pub path: PathBuf,
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/hosts.json"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HeartbeatConf {
    pub timeout_secs: u64,
    pub check_interval_secs: u64,
}

impl Default for HeartbeatConf {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            check_interval_secs: 30,
        }
    }
}

impl HeartbeatConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ClusterConf {
    pub name: String,
    pub hosts: Vec<String>,
    /// config type -> cluster-wide desired tag
    pub desired_configs: BTreeMap<String, String>,
    pub config_groups: Vec<ConfigGroupConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConfigGroupConf {
    pub id: u64,
    pub name: String,
    pub hosts: Vec<String>,
    pub configurations: BTreeMap<String, String>,
}

impl KernelConfig {
    pub fn from_yaml_str(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: KernelConfig = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).await?;
        Self::from_yaml_str(&txt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hb = &self.heartbeat;
        if hb.timeout_secs == 0 || hb.check_interval_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat intervals must be non-zero".into()));
        }
        if hb.check_interval_secs > hb.timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "heartbeat check interval ({}s) exceeds timeout ({}s)",
                hb.check_interval_secs, hb.timeout_secs
            )));
        }
        for (cluster_id, cluster) in &self.clusters {
            for group in &cluster.config_groups {
                if let Some(stray) = group.hosts.iter().find(|h| !cluster.hosts.contains(h)) {
                    return Err(ConfigError::Invalid(format!(
                        "config group {} of cluster {} lists host {} which is not in the cluster",
                        group.id, cluster_id, stray
                    )));
                }
            }
        }
        Ok(())
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("HERD_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let path = Path::new(&path);
    if !path.exists() {
        warn!(path = %path.display(), "no kernel config file, using defaults");
        return KernelConfig::default();
    }
    KernelConfig::from_file(path).await.unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid kernel config, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
mqtt:
  host: broker.lan
  port: 1884
store:
  path: /var/lib/herd/hosts.json
heartbeat:
  timeout_secs: 90
  check_interval_secs: 15
clusters:
  5:
    name: c1
    hosts: [h1, h2]
    desired_configs:
      core-site: v1
    config_groups:
      - id: 11
        name: fast-disks
        hosts: [h2]
        configurations:
          hdfs-site: g11
"#;

    #[test]
    fn test_parse_sample() {
        let cfg = KernelConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.client_id, None);
        assert_eq!(cfg.heartbeat.timeout(), Duration::from_secs(90));
        let c1 = &cfg.clusters[&5];
        assert_eq!(c1.hosts, vec!["h1", "h2"]);
        assert_eq!(c1.config_groups[0].configurations["hdfs-site"], "g11");
    }

    #[test]
    fn test_empty_is_default() {
        assert_eq!(KernelConfig::from_yaml_str("  \n").unwrap(), KernelConfig::default());
        let partial = KernelConfig::from_yaml_str("mqtt:\n  port: 2883\n").unwrap();
        assert_eq!(partial.mqtt.host, "localhost");
        assert_eq!(partial.mqtt.port, 2883);
    }

    #[test]
    fn test_validate_rejects_bad_intervals() {
        let err = KernelConfig::from_yaml_str("heartbeat:\n  timeout_secs: 10\n  check_interval_secs: 20\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = KernelConfig::from_yaml_str("heartbeat:\n  timeout_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_stray_group_host() {
        let yaml = "clusters:\n  1:\n    hosts: [a]\n    config_groups:\n      - id: 2\n        hosts: [b]\n";
        let err = KernelConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("host b"));
    }
}
