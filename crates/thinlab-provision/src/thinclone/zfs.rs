use crate::command::Runner;
use crate::error::{ProvisionError, Result};
use crate::pool::{Pool, CLONE_PREFIX};
use crate::thinclone::{
    parse_data_state, Cloner, DiskState, ManagerConfig, Pooler, SessionState, SnapshotEntry,
    Snapshotter, DATA_STATE_FORMAT,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// ZFS-backed thin-clone manager.
///
/// Datasets live under the pool dataset: the base data in the pool itself,
/// each clone as `{pool}/{clone_name}` mounted into the pool's clones
/// directory. Snapshots carry a `snapshot_{timestamp}` tag so their
/// data-state time is recoverable from the name alone.
pub struct ZfsManager {
    runner: Arc<dyn Runner>,
    pool: Arc<Pool>,
    pre_snapshot_suffix: String,
}

impl ZfsManager {
    pub fn new(runner: Arc<dyn Runner>, config: ManagerConfig) -> Self {
        Self {
            runner,
            pool: config.pool,
            pre_snapshot_suffix: config.pre_snapshot_suffix,
        }
    }

    fn clone_dataset(&self, name: &str) -> String {
        format!("{}/{}", self.pool.name, name)
    }

    /// Parse one line of `zfs list -t snapshot -Hp -o
    /// name,creation,used,logicalreferenced` output.
    fn parse_snapshot_line(&self, line: &str) -> Result<SnapshotEntry> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            return Err(ProvisionError::malformed_output(
                "zfs list -t snapshot",
                format!("expected 4 tab-separated fields, got {}: '{}'", fields.len(), line),
            ));
        }

        let id = fields[0].to_string();
        let created_at = fields[1]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| {
                ProvisionError::malformed_output(
                    "zfs list -t snapshot",
                    format!("invalid creation time '{}'", fields[1]),
                )
            })?;

        // Data-state time is embedded in the snapshot tag; creation time is
        // the fallback for snapshots taken outside the engine.
        let data_state_at = id
            .split_once("@snapshot_")
            .and_then(|(_, raw)| parse_data_state(&raw[..raw.len().min(14)]))
            .unwrap_or(created_at);

        let used = fields[2].parse::<u64>().unwrap_or(0);
        let logical_referenced = fields[3].parse::<u64>().unwrap_or(0);

        Ok(SnapshotEntry {
            id,
            created_at,
            data_state_at,
            used,
            logical_referenced,
        })
    }

    /// Fetch named numeric properties of a dataset via `zfs get -Hp`
    async fn get_properties(&self, properties: &str, dataset: &str) -> Result<Vec<(String, u64)>> {
        let cmd = format!(
            "zfs get -Hp -o property,value {} {}",
            properties, dataset
        );
        let out = self.runner.run(&cmd, true).await?;

        let mut values = Vec::new();
        for line in out.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (property, value) = line.split_once('\t').ok_or_else(|| {
                ProvisionError::malformed_output("zfs get", format!("unparseable line '{}'", line))
            })?;
            values.push((property.to_string(), value.trim().parse::<u64>().unwrap_or(0)));
        }

        Ok(values)
    }
}

#[async_trait]
impl Cloner for ZfsManager {
    async fn create_clone(&self, name: &str, snapshot_id: &str) -> Result<()> {
        let dataset = self.clone_dataset(name);
        let mountpoint = format!("{}/{}", self.pool.clones_dir(), name);
        info!("Creating ZFS clone {} from {}", dataset, snapshot_id);

        let cmd = format!(
            "zfs clone -o mountpoint={} {} {}",
            mountpoint, snapshot_id, dataset
        );
        self.runner.run(&cmd, true).await?;

        info!("ZFS clone created: {}", dataset);
        Ok(())
    }

    async fn destroy_clone(&self, name: &str) -> Result<()> {
        let dataset = self.clone_dataset(name);
        info!("Destroying ZFS clone: {}", dataset);

        let cmd = format!("zfs destroy -R {}", dataset);
        self.runner.run(&cmd, true).await?;

        info!("ZFS clone destroyed: {}", dataset);
        Ok(())
    }

    async fn list_clones_names(&self) -> Result<Vec<String>> {
        let cmd = format!("zfs list -t filesystem -H -o name -r {}", self.pool.name);
        let out = self.runner.run(&cmd, true).await?;

        let prefix = format!("{}/", self.pool.name);
        let clones = out
            .lines()
            .filter_map(|line| line.trim().strip_prefix(&prefix))
            .filter(|name| name.starts_with(CLONE_PREFIX))
            .map(|name| name.to_string())
            .collect();

        Ok(clones)
    }
}

#[async_trait]
impl Snapshotter for ZfsManager {
    async fn create_snapshot(
        &self,
        pool_suffix: &str,
        data_state_at: DateTime<Utc>,
    ) -> Result<String> {
        let dataset = format!("{}{}", self.pool.name, pool_suffix);
        let mut tag = format!("snapshot_{}", data_state_at.format(DATA_STATE_FORMAT));

        // Snapshots of the pre-processing dataset are marked so consumers
        // can tell them apart from promoted ones.
        if !pool_suffix.is_empty() {
            tag.push_str(&self.pre_snapshot_suffix);
        }

        let snapshot_name = format!("{}@{}", dataset, tag);
        self.runner
            .run(&format!("zfs snapshot -r {}", snapshot_name), true)
            .await?;

        info!("ZFS snapshot created: {}", snapshot_name);
        Ok(snapshot_name)
    }

    async fn destroy_snapshot(&self, snapshot_name: &str) -> Result<()> {
        // No recursive flag: a snapshot with live clone dependents must be
        // refused by the backend, and the refusal surfaces verbatim.
        self.runner
            .run(&format!("zfs destroy {}", snapshot_name), true)
            .await?;

        info!("ZFS snapshot destroyed: {}", snapshot_name);
        Ok(())
    }

    async fn cleanup_snapshots(&self, retention_limit: usize) -> Result<Vec<String>> {
        let snapshots = self.get_snapshots().await?;

        let mut deleted = Vec::new();
        for snapshot in crate::thinclone::select_retention_victims(snapshots, retention_limit) {
            self.destroy_snapshot(&snapshot.id).await?;
            deleted.push(snapshot.id);
        }

        info!(
            "Snapshot retention cleanup removed {} snapshot(s)",
            deleted.len()
        );
        Ok(deleted)
    }

    async fn get_snapshots(&self) -> Result<Vec<SnapshotEntry>> {
        let cmd = format!(
            "zfs list -t snapshot -Hp -o name,creation,used,logicalreferenced -S creation -r {}",
            self.pool.name
        );
        let out = self.runner.run(&cmd, true).await?;

        let marker = format!("{}@", self.pool.name);
        let mut snapshots = Vec::new();
        for line in out.lines() {
            let line = line.trim();
            if line.is_empty() || !line.starts_with(&marker) {
                continue;
            }
            snapshots.push(self.parse_snapshot_line(line)?);
        }

        Ok(snapshots)
    }
}

#[async_trait]
impl crate::thinclone::StateReporter for ZfsManager {
    async fn get_session_state(&self, name: &str) -> Result<SessionState> {
        let dataset = self.clone_dataset(name);
        let values = self
            .get_properties("used,logicalreferenced", &dataset)
            .await?;

        let mut state = SessionState::default();
        for (property, value) in values {
            match property.as_str() {
                "used" => state.clone_diff_size = value,
                "logicalreferenced" => state.logical_referenced = value,
                _ => {}
            }
        }

        Ok(state)
    }

    async fn get_disk_state(&self) -> Result<DiskState> {
        let values = self.get_properties("available,used", &self.pool.name).await?;

        let mut available = 0;
        let mut used = 0;
        for (property, value) in values {
            match property.as_str() {
                "available" => available = value,
                "used" => used = value,
                _ => {}
            }
        }

        Ok(DiskState {
            size: available + used,
            free: available,
            used,
            data_state_at: self.pool.data_state_at(),
        })
    }
}

impl Pooler for ZfsManager {
    fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}
