use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Name prefix of every clone dataset and container
pub const CLONE_PREFIX: &str = "thinlab_clone_";

/// Derive the canonical clone name for a local port
pub fn clone_name(port: u16) -> String {
    format!("{}{}", CLONE_PREFIX, port)
}

/// Thin-provisioning backend variant of a storage pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    Zfs,
    Lvm,
}

impl PoolMode {
    /// Parse from a configuration string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zfs" => Some(PoolMode::Zfs),
            "lvm" => Some(PoolMode::Lvm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolMode::Zfs => "zfs",
            PoolMode::Lvm => "lvm",
        }
    }
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Construction-time shape of a pool, as found in the engine configuration.
///
/// Sub-directory names default to the standard layout; only `name`, `mode`
/// and `mountDir` normally appear in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    pub name: String,
    pub mode: String,
    pub mount_dir: String,
    /// Directory under `mount_dir` holding this pool (defaults to `name`)
    pub pool_dir_name: String,
    pub clone_sub_dir: String,
    pub data_sub_dir: String,
    pub socket_sub_dir: String,
    pub observer_sub_dir: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mode: String::new(),
            mount_dir: "/var/lib/thinlab".to_string(),
            pool_dir_name: String::new(),
            clone_sub_dir: "clones".to_string(),
            data_sub_dir: "data".to_string(),
            socket_sub_dir: "sockets".to_string(),
            observer_sub_dir: "observer".to_string(),
        }
    }
}

/// Describes one thin-provisioning pool's on-disk layout and mode.
///
/// Read-mostly: all fields except the data-state timestamp are fixed at
/// construction. The timestamp sits behind an `RwLock` so a single writer
/// (the retrieval pipeline) can update it while concurrent readers derive
/// paths and report state without ever observing a torn value.
#[derive(Debug)]
pub struct Pool {
    pub name: String,
    pub mode: Option<PoolMode>,
    pub mount_dir: String,
    pub pool_dir_name: String,
    pub clone_sub_dir: String,
    pub data_sub_dir: String,
    pub socket_sub_dir: String,
    pub observer_sub_dir: String,
    data_state_at: RwLock<Option<DateTime<Utc>>>,
}

impl Pool {
    /// Create a pool with only a name set, standard layout, and no mode
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let defaults = PoolConfig {
            pool_dir_name: name.clone(),
            name,
            ..PoolConfig::default()
        };
        // Mode stays unset; from_config is the only place that assigns one
        Self::with_layout(defaults, None)
    }

    /// Build a pool from its configuration. An unrecognized non-empty mode
    /// is a fatal configuration error.
    pub fn from_config(config: PoolConfig) -> Result<Self> {
        let mode = if config.mode.is_empty() {
            None
        } else {
            Some(
                PoolMode::parse(&config.mode)
                    .ok_or_else(|| ProvisionError::unsupported_pool_mode(&config.mode))?,
            )
        };

        Ok(Self::with_layout(config, mode))
    }

    fn with_layout(config: PoolConfig, mode: Option<PoolMode>) -> Self {
        let pool_dir_name = if config.pool_dir_name.is_empty() {
            config.name.clone()
        } else {
            config.pool_dir_name
        };

        Self {
            name: config.name,
            mode,
            mount_dir: config.mount_dir,
            pool_dir_name,
            clone_sub_dir: config.clone_sub_dir,
            data_sub_dir: config.data_sub_dir,
            socket_sub_dir: config.socket_sub_dir,
            observer_sub_dir: config.observer_sub_dir,
            data_state_at: RwLock::new(None),
        }
    }

    /// A pool is empty iff both name and mode are unset; an empty pool is
    /// not usable for provisioning.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.mode.is_none()
    }

    /// Freshness marker of the pool's base dataset
    pub fn data_state_at(&self) -> Option<DateTime<Utc>> {
        *self.data_state_at.read().expect("data_state_at lock poisoned")
    }

    /// Update the freshness marker. Single writer; readers observe the new
    /// value atomically.
    pub fn set_data_state_at(&self, data_state_at: DateTime<Utc>) {
        *self
            .data_state_at
            .write()
            .expect("data_state_at lock poisoned") = Some(data_state_at);
    }

    /// Path to the data directory of the storage pool
    pub fn data_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.mount_dir, self.pool_dir_name, self.data_sub_dir
        )
    }

    /// Path to the sockets directory of the storage pool
    pub fn socket_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.mount_dir, self.pool_dir_name, self.socket_sub_dir
        )
    }

    /// Path to the clones directory of the storage pool
    pub fn clones_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.mount_dir, self.pool_dir_name, self.clone_sub_dir
        )
    }

    /// Path to an initialized clone's data directory, keyed by port
    pub fn clone_path(&self, port: u16) -> String {
        format!(
            "{}/{}/{}",
            self.clones_dir(),
            clone_name(port),
            self.data_sub_dir
        )
    }

    /// Path to a clone's socket directory, keyed by clone name
    pub fn socket_clone_dir(&self, name: &str) -> String {
        format!("{}/{}", self.socket_dir(), name)
    }

    /// Path to a clone's observer artifacts directory
    pub fn observer_dir(&self, port: u16) -> String {
        format!("{}/{}", self.clone_path(port), self.observer_sub_dir)
    }
}
