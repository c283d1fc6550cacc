use crate::error::{ProvisionError, Result};
use crate::runtime::{ContainerRuntime, VolumeSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thinlab_core::parse_ram;

use super::mounts::{build_data_volumes, HostTopology};

/// Resource limits applied to a clone container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub cpushares: i64,
    pub cpuperiod: i64,
    pub cpuquota: i64,
    pub nanocpus: i64,
    pub memory: i64,
    pub memoryswap: i64,
    pub memoryreservation: i64,
    pub oomkilldisable: bool,
}

/// Host-level configuration of a clone container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub shmsize: i64,
    #[serde(skip)]
    pub resources: Resources,
    #[serde(skip)]
    pub mounts: Vec<VolumeSpec>,
}

/// Fold a free-form configuration key to its internal form
fn normalize_key(key: &str) -> String {
    key.replace('-', "").to_lowercase()
}

/// Normalize a free-form configuration mapping: fold keys and convert any
/// string value that parses as a human-readable memory quantity to its
/// exact byte count, falling back to the raw value otherwise.
fn normalize_config(container_conf: &HashMap<String, Value>) -> serde_json::Map<String, Value> {
    let mut normalized = serde_json::Map::with_capacity(container_conf.len());

    for (key, value) in container_conf {
        let normalized_value = match value {
            Value::String(s) => match parse_ram(s) {
                Ok(bytes) => Value::from(bytes),
                Err(_) => value.clone(),
            },
            other => other.clone(),
        };

        normalized.insert(normalize_key(key), normalized_value);
    }

    normalized
}

/// Translate a free-form configuration mapping into the runtime's host
/// configuration.
///
/// The mapping is applied twice: once into the host configuration and once
/// into the isolated resource sub-structure, which is then attached.
/// Composite sub-structures do not populate in one pass.
pub fn resource_options(container_conf: &HashMap<String, Value>) -> Result<HostConfig> {
    let normalized = Value::Object(normalize_config(container_conf));

    let mut host_config: HostConfig = serde_json::from_value(normalized.clone()).map_err(|e| {
        ProvisionError::invalid_config(
            format!("failed to interpret container configuration options: {}", e),
            "Check the containerConf keys against the supported host-configuration fields",
        )
    })?;

    let resources: Resources = serde_json::from_value(normalized).map_err(|e| {
        ProvisionError::invalid_config(
            format!("failed to interpret container resource options: {}", e),
            "Check the containerConf keys against the supported resource-limit fields",
        )
    })?;

    host_config.resources = resources;
    Ok(host_config)
}

/// Build the complete host configuration for a service container bound to
/// `data_dir`: resource limits from the configuration mapping plus the
/// topology-appropriate data volumes.
pub async fn build_host_config(
    runtime: &dyn ContainerRuntime,
    topology: &HostTopology,
    data_dir: &str,
    container_conf: &HashMap<String, Value>,
) -> Result<HostConfig> {
    let mut host_config = resource_options(container_conf)?;
    host_config.mounts = build_data_volumes(runtime, topology, data_dir).await?;
    Ok(host_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_folds_case_and_separators() {
        assert_eq!(normalize_key("Memory-Limit"), "memorylimit");
        assert_eq!(normalize_key("memorylimit"), "memorylimit");
        assert_eq!(normalize_key("shm-size"), "shmsize");
        assert_eq!(normalize_key("CPU-Shares"), "cpushares");
    }

    #[test]
    fn test_resource_options_parses_memory_strings() {
        let conf: HashMap<String, Value> = [
            ("memory".to_string(), Value::from("512MiB")),
            ("shm-size".to_string(), Value::from("1gib")),
            ("cpu-shares".to_string(), Value::from(512)),
        ]
        .into_iter()
        .collect();

        let host_config = resource_options(&conf).unwrap();
        assert_eq!(host_config.resources.memory, 536_870_912);
        assert_eq!(host_config.shmsize, 1024 * 1024 * 1024);
        assert_eq!(host_config.resources.cpushares, 512);
    }

    #[test]
    fn test_resource_options_memory_string_equals_byte_count() {
        // "512MiB" and "536870912" produce identical limits
        let human: HashMap<String, Value> =
            [("memory".to_string(), Value::from("512MiB"))].into_iter().collect();
        let raw: HashMap<String, Value> =
            [("memory".to_string(), Value::from(536_870_912i64))].into_iter().collect();

        assert_eq!(
            resource_options(&human).unwrap().resources.memory,
            resource_options(&raw).unwrap().resources.memory
        );
    }

    #[test]
    fn test_resource_options_keeps_unparseable_strings() {
        // A non-quantity string for an unknown key is carried through
        // normalization and ignored by deserialization.
        let conf: HashMap<String, Value> = [
            ("oom-kill-disable".to_string(), Value::from(true)),
            ("some-annotation".to_string(), Value::from("not-a-size")),
        ]
        .into_iter()
        .collect();

        let host_config = resource_options(&conf).unwrap();
        assert!(host_config.resources.oomkilldisable);
    }

    #[test]
    fn test_resources_attached_after_second_pass() {
        let conf: HashMap<String, Value> = [
            ("memory".to_string(), Value::from("2g")),
            ("nano-cpus".to_string(), Value::from(500_000_000i64)),
        ]
        .into_iter()
        .collect();

        let host_config = resource_options(&conf).unwrap();
        assert_eq!(host_config.resources.memory, 2 * 1024 * 1024 * 1024);
        assert_eq!(host_config.resources.nanocpus, 500_000_000);
    }

    #[tokio::test]
    async fn test_build_host_config_host_topology() {
        let runtime = crate::runtime::MockContainerRuntime::new();
        let conf = HashMap::new();

        let host_config = build_host_config(
            &runtime,
            &HostTopology::Host,
            "/var/lib/thinlab/dbpool/data",
            &conf,
        )
        .await
        .unwrap();

        assert_eq!(
            host_config.mounts,
            vec![VolumeSpec::bind(
                "/var/lib/thinlab/dbpool/data",
                "/var/lib/thinlab/dbpool/data"
            )]
        );
    }
}
