mod lvm;
mod zfs;

pub use lvm::LvmManager;
pub use zfs::ZfsManager;

use crate::command::Runner;
use crate::error::{ProvisionError, Result};
use crate::pool::Pool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Timestamp layout embedded in snapshot names so lexical order equals
/// chronological order.
pub const DATA_STATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// One point-in-time snapshot as known to the storage backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub data_state_at: DateTime<Utc>,
    /// Space consumed by the snapshot itself, in bytes
    pub used: u64,
    /// Logical size of the referenced dataset, in bytes
    pub logical_referenced: u64,
}

/// Per-clone storage usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Bytes diverged from the originating snapshot
    pub clone_diff_size: u64,
    pub logical_referenced: u64,
}

/// Pool-wide storage usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskState {
    pub size: u64,
    pub free: u64,
    pub used: u64,
    pub data_state_at: Option<DateTime<Utc>>,
}

/// Clone management capability
#[async_trait]
pub trait Cloner: Send + Sync {
    /// Materialize a new copy-on-write clone from an existing snapshot.
    /// Fails if the snapshot does not exist or the name is already in use
    /// (backend-enforced).
    async fn create_clone(&self, name: &str, snapshot_id: &str) -> Result<()>;

    /// Remove the clone's storage object. The caller must stop the clone's
    /// container first; a clone still referenced by a running process is
    /// refused by the backend.
    async fn destroy_clone(&self, name: &str) -> Result<()>;

    /// Enumerate clone names currently known to the backend, for drift
    /// detection against the caller's registry.
    async fn list_clones_names(&self) -> Result<Vec<String>>;
}

/// Snapshot management capability
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Take a new point-in-time snapshot of the pool's base dataset and
    /// return the generated snapshot name. The name embeds `data_state_at`.
    async fn create_snapshot(
        &self,
        pool_suffix: &str,
        data_state_at: DateTime<Utc>,
    ) -> Result<String>;

    /// Destroy one snapshot. Fails while clones still depend on it
    /// (backend-enforced; the refusal is surfaced verbatim).
    async fn destroy_snapshot(&self, snapshot_name: &str) -> Result<()>;

    /// Delete the oldest snapshots beyond `retention_limit`, keeping the
    /// most recent ones by data-state time. Returns the deleted names.
    async fn cleanup_snapshots(&self, retention_limit: usize) -> Result<Vec<String>>;

    /// List all snapshots with metadata, newest first
    async fn get_snapshots(&self) -> Result<Vec<SnapshotEntry>>;
}

/// Read-only state reporting capability
#[async_trait]
pub trait StateReporter: Send + Sync {
    /// Per-clone used/logical size
    async fn get_session_state(&self, name: &str) -> Result<SessionState>;

    /// Pool-wide capacity/used/free
    async fn get_disk_state(&self) -> Result<DiskState>;
}

/// Access to the underlying pool descriptor for path derivation
pub trait Pooler {
    fn pool(&self) -> &Arc<Pool>;
}

/// The polymorphic thin-clone manager contract. Callers never branch on
/// backend identity; selection happens once in `new_manager`.
pub trait FsManager: Cloner + Snapshotter + StateReporter + Pooler + Send + Sync {}

impl<T> FsManager for T where T: Cloner + Snapshotter + StateReporter + Pooler + Send + Sync {}

impl std::fmt::Debug for dyn FsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsManager").finish()
    }
}

/// Thin-clone manager construction parameters
#[derive(Clone)]
pub struct ManagerConfig {
    pub pool: Arc<Pool>,
    /// Suffix appended to snapshots taken on a pre-processing dataset
    pub pre_snapshot_suffix: String,
}

/// Select and construct the thin-clone manager for the pool's declared
/// mode. An unset or unrecognized mode is a fatal configuration error.
pub fn new_manager(runner: Arc<dyn Runner>, config: ManagerConfig) -> Result<Arc<dyn FsManager>> {
    let mode = config
        .pool
        .mode
        .ok_or_else(|| ProvisionError::unsupported_pool_mode("<unset>"))?;

    let manager: Arc<dyn FsManager> = match mode {
        crate::pool::PoolMode::Zfs => Arc::new(ZfsManager::new(runner, config)),
        crate::pool::PoolMode::Lvm => Arc::new(LvmManager::new(runner, config)?),
    };

    info!("Using \"{}\" thin-clone manager", mode);

    Ok(manager)
}

/// Parse a data-state timestamp in the snapshot-name layout
pub(crate) fn parse_data_state(raw: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, DATA_STATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pick the snapshots to delete under a retention limit: everything beyond
/// the `retention_limit` most recent by data-state time, returned oldest
/// first so deletion proceeds in chronological order.
pub(crate) fn select_retention_victims(
    mut snapshots: Vec<SnapshotEntry>,
    retention_limit: usize,
) -> Vec<SnapshotEntry> {
    snapshots.sort_by(|a, b| b.data_state_at.cmp(&a.data_state_at));

    if snapshots.len() <= retention_limit {
        return Vec::new();
    }

    let mut victims = snapshots.split_off(retention_limit);
    victims.reverse();
    victims
}
