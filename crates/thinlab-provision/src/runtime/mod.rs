mod docker;
mod mock;

pub use docker::DockerCli;
pub use mock::{MockContainer, MockContainerRuntime};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Health status strings reported by the container runtime
pub const HEALTH_HEALTHY: &str = "healthy";
pub const HEALTH_UNHEALTHY: &str = "unhealthy";
pub const HEALTH_STARTING: &str = "starting";

/// One volume of a container-start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
    /// Mount propagation mode (e.g. "rshared"); runtime default when unset
    pub propagation: Option<String>,
}

impl VolumeSpec {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
            propagation: None,
        }
    }
}

/// Structured container-start request; no call site assembles CLI strings
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub name: String,
    pub image: String,
    pub detach: bool,
    /// Published TCP port mapping (host, container)
    pub publish: Option<(u16, u16)>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<VolumeSpec>,
    /// Label expressions: bare "key" or "key=value"
    pub labels: Vec<String>,
    /// Arguments passed to the container entrypoint after the image
    pub command_args: Vec<String>,
}

/// A mount point as reported by container inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MountPoint {
    #[serde(rename = "Type")]
    pub mount_type: String,
    pub source: String,
    pub destination: String,
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
    pub propagation: String,
}

impl Default for MountPoint {
    fn default() -> Self {
        Self {
            mount_type: "bind".to_string(),
            source: String::new(),
            destination: String::new(),
            mode: String::new(),
            rw: true,
            propagation: String::new(),
        }
    }
}

/// Identity and labels of a listed container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    /// All name aliases the runtime associates with the container
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Display name for logging: every alias, joined
    pub fn display_name(&self) -> String {
        self.names.join(", ")
    }
}

/// One recorded health-check execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthLogEntry {
    pub exit_code: i64,
    pub output: String,
}

/// Health block of a container inspection; absent when the image defines
/// no health check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthState {
    pub status: String,
    pub failing_streak: i64,
    pub log: Vec<HealthLogEntry>,
}

impl HealthState {
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

/// In-container command execution request
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub user: Option<String>,
    pub command: Vec<String>,
}

/// Captured result of an in-container command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Boundary to the container runtime.
///
/// The production implementation is `DockerCli`, which drives the docker
/// command line through a `Runner`; `MockContainerRuntime` provides an
/// in-memory registry for tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container; returns the runtime's identifier
    async fn run(&self, request: &RunRequest) -> Result<String>;

    /// Gracefully stop a container within the timeout
    async fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Force-remove a container including its anonymous volumes
    async fn remove(&self, id: &str) -> Result<()>;

    /// List container IDs matching every label filter (AND semantics)
    async fn list_ids(&self, label_filters: &[String]) -> Result<Vec<String>>;

    /// List containers with names and labels, same filter semantics
    async fn list_containers(&self, label_filters: &[String]) -> Result<Vec<ContainerSummary>>;

    /// Mount points of a container
    async fn inspect_mounts(&self, id: &str) -> Result<Vec<MountPoint>>;

    /// Health block of a container, if it has a health check
    async fn inspect_health(&self, id: &str) -> Result<Option<HealthState>>;

    /// Execute a command inside a container and capture its streams
    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecResult>;

    /// Fetch container logs since a relative duration (e.g. "10s", "5m")
    async fn logs(&self, id: &str, since: &str) -> Result<String>;

    /// Whether the image is available locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull the image unless it is already available locally
    async fn pull_image(&self, image: &str) -> Result<()>;
}

/// Check a label map against filter expressions ("key" or "key=value"),
/// AND semantics across filters.
pub(crate) fn matches_label_filters(labels: &HashMap<String, String>, filters: &[String]) -> bool {
    filters.iter().all(|filter| match filter.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => labels.contains_key(filter.as_str()),
    })
}
