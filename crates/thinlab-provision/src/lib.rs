//! Thinlab Provision - Thin-clone storage and container lifecycle engine
//!
//! This crate coordinates two independently-failing subsystems behind one
//! lifecycle contract: copy-on-write filesystem backends (ZFS, LVM) that
//! hold clone storage, and the container runtime that exposes each clone
//! as a network-reachable database. Callers create clone storage first,
//! then the container; teardown reverses the order.

pub mod command;
pub mod config;
pub mod error;
pub mod housekeeper;
pub mod orchestrator;
pub mod pool;
pub mod readiness;
pub mod runtime;
pub mod thinclone;

// Re-export primary types
pub use command::{CommandOutput, LocalRunner, MockRunner, Runner};
pub use config::ProvisionConfig;
pub use error::{ProvisionError, Result};
pub use pool::{clone_name, Pool, PoolConfig, PoolMode};

// Re-export the thin-clone manager contract
pub use thinclone::{
    new_manager, Cloner, DiskState, FsManager, ManagerConfig, Pooler, SessionState,
    SnapshotEntry, Snapshotter, StateReporter,
};

// Re-export the container runtime boundary
pub use runtime::{
    ContainerRuntime, ContainerSummary, DockerCli, ExecRequest, ExecResult, HealthState,
    MockContainerRuntime, MountPoint, RunRequest, VolumeSpec,
};

// Re-export orchestration and housekeeping entry points
pub use orchestrator::{AppConfig, HostTopology};
pub use housekeeper::{ReconcileAction, ReconcileOutcome};
