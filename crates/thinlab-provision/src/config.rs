use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provisioning configuration, deserialized by the engine's (external)
/// configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisionConfig {
    pub pool: PoolConfig,
    /// Image used for clone service containers
    pub docker_image: String,
    /// Free-form host/resource options applied to service containers;
    /// string values may be human-readable memory quantities
    pub container_conf: HashMap<String, serde_json::Value>,
    /// Suffix marking snapshots taken on a pre-processing dataset
    pub pre_snapshot_suffix: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            docker_image: "postgresai/extended-postgres:13".to_string(),
            container_conf: HashMap::new(),
            pre_snapshot_suffix: "_pre".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_partial_config() {
        let raw = r#"{
            "pool": {"name": "dbpool", "mode": "zfs"},
            "containerConf": {"shm-size": "1gib"}
        }"#;

        let config: ProvisionConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.pool.name, "dbpool");
        assert_eq!(config.pool.mode, "zfs");
        assert_eq!(config.pool.clone_sub_dir, "clones");
        assert_eq!(
            config.container_conf.get("shm-size").and_then(|v| v.as_str()),
            Some("1gib")
        );
        assert_eq!(config.pre_snapshot_suffix, "_pre");
    }
}
