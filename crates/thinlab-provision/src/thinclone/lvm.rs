use crate::command::Runner;
use crate::error::{ProvisionError, Result};
use crate::pool::Pool;
use crate::thinclone::{
    parse_data_state, select_retention_victims, Cloner, DiskState, ManagerConfig, Pooler,
    SessionState, SnapshotEntry, Snapshotter, StateReporter, DATA_STATE_FORMAT,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

const SNAPSHOT_TAG: &str = "thinlab_snapshot";
const CLONE_TAG: &str = "thinlab_clone";

const LV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// LVM-backed thin-clone manager.
///
/// The pool name carries the thin volume layout as `{vg}/{lv}`. Snapshots
/// and clones are thin snapshot volumes in the same volume group, told
/// apart by LVM tags; clones are activated and mounted into the pool's
/// clones directory.
pub struct LvmManager {
    runner: Arc<dyn Runner>,
    pool: Arc<Pool>,
    volume_group: String,
    logical_volume: String,
}

impl std::fmt::Debug for LvmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LvmManager")
            .field("pool", &self.pool)
            .field("volume_group", &self.volume_group)
            .field("logical_volume", &self.logical_volume)
            .finish()
    }
}

impl LvmManager {
    pub fn new(runner: Arc<dyn Runner>, config: ManagerConfig) -> Result<Self> {
        let (volume_group, logical_volume) =
            config.pool.name.split_once('/').ok_or_else(|| {
                ProvisionError::invalid_config(
                    format!("LVM pool name '{}' is not of the form vg/lv", config.pool.name),
                    "Set the pool name to \"<volume group>/<thin logical volume>\"",
                )
            })?;

        Ok(Self {
            volume_group: volume_group.to_string(),
            logical_volume: logical_volume.to_string(),
            runner,
            pool: config.pool,
        })
    }

    fn qualified(&self, lv_name: &str) -> String {
        format!("{}/{}", self.volume_group, lv_name)
    }

    fn clone_mount_path(&self, name: &str) -> String {
        format!("{}/{}", self.pool.clones_dir(), name)
    }

    /// Parse one `|`-separated line of
    /// `lvs -o lv_name,lv_time,lv_size,data_percent` output.
    fn parse_snapshot_line(&self, line: &str) -> Result<SnapshotEntry> {
        let fields: Vec<&str> = line.trim().split('|').map(|f| f.trim()).collect();
        if fields.len() < 4 {
            return Err(ProvisionError::malformed_output(
                "lvs",
                format!("expected 4 fields, got {}: '{}'", fields.len(), line),
            ));
        }

        let created_at = DateTime::parse_from_str(fields[1], LV_TIME_FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ProvisionError::malformed_output(
                    "lvs",
                    format!("invalid lv_time '{}': {}", fields[1], e),
                )
            })?;

        let data_state_at = fields[0]
            .rsplit_once("_snap_")
            .and_then(|(_, raw)| parse_data_state(&raw[..raw.len().min(14)]))
            .unwrap_or(created_at);

        let logical_referenced = fields[2].parse::<u64>().unwrap_or(0);
        let data_percent = fields[3].parse::<f64>().unwrap_or(0.0);
        let used = (logical_referenced as f64 * data_percent / 100.0) as u64;

        Ok(SnapshotEntry {
            id: self.qualified(fields[0]),
            created_at,
            data_state_at,
            used,
            logical_referenced,
        })
    }
}

#[async_trait]
impl Cloner for LvmManager {
    async fn create_clone(&self, name: &str, snapshot_id: &str) -> Result<()> {
        info!("Creating LVM clone {} from {}", name, snapshot_id);

        let cmd = format!(
            "lvcreate --snapshot --name {} --setactivationskip n --ignoreactivationskip \
             --activate y --addtag {} {}",
            name, CLONE_TAG, snapshot_id
        );
        self.runner.run(&cmd, true).await?;

        let mount_path = self.clone_mount_path(name);
        self.runner
            .run(&format!("mkdir -p {}", mount_path), true)
            .await?;
        self.runner
            .run(
                &format!("mount /dev/{} {}", self.qualified(name), mount_path),
                true,
            )
            .await?;

        info!("LVM clone created: {}", self.qualified(name));
        Ok(())
    }

    async fn destroy_clone(&self, name: &str) -> Result<()> {
        let mount_path = self.clone_mount_path(name);
        info!("Destroying LVM clone: {}", self.qualified(name));

        // A clone still referenced by a running process fails here and the
        // volume stays intact for the caller to retry.
        self.runner
            .run(&format!("umount {}", mount_path), true)
            .await?;
        self.runner
            .run(
                &format!("lvremove --force --yes {}", self.qualified(name)),
                true,
            )
            .await?;

        if let Err(e) = self.runner.run(&format!("rmdir {}", mount_path), true).await {
            warn!("Failed to remove clone mount directory {}: {}", mount_path, e);
        }

        info!("LVM clone destroyed: {}", self.qualified(name));
        Ok(())
    }

    async fn list_clones_names(&self) -> Result<Vec<String>> {
        let cmd = format!(
            "lvs --noheadings -o lv_name --select lv_tags={} {}",
            CLONE_TAG, self.volume_group
        );
        let out = self.runner.run(&cmd, true).await?;

        Ok(out
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}

#[async_trait]
impl Snapshotter for LvmManager {
    async fn create_snapshot(
        &self,
        pool_suffix: &str,
        data_state_at: DateTime<Utc>,
    ) -> Result<String> {
        let snap_name = format!(
            "{}{}_snap_{}",
            self.logical_volume,
            pool_suffix,
            data_state_at.format(DATA_STATE_FORMAT)
        );

        let cmd = format!(
            "lvcreate --snapshot --name {} --setactivationskip n --addtag {} {}",
            snap_name,
            SNAPSHOT_TAG,
            self.qualified(&self.logical_volume)
        );
        self.runner.run(&cmd, true).await?;

        let snapshot_name = self.qualified(&snap_name);
        info!("LVM snapshot created: {}", snapshot_name);
        Ok(snapshot_name)
    }

    async fn destroy_snapshot(&self, snapshot_name: &str) -> Result<()> {
        self.runner
            .run(&format!("lvremove --force --yes {}", snapshot_name), true)
            .await?;

        info!("LVM snapshot destroyed: {}", snapshot_name);
        Ok(())
    }

    async fn cleanup_snapshots(&self, retention_limit: usize) -> Result<Vec<String>> {
        let snapshots = self.get_snapshots().await?;

        let mut deleted = Vec::new();
        for snapshot in select_retention_victims(snapshots, retention_limit) {
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
            "lvs --noheadings --units b --nosuffix --separator '|' \
             -o lv_name,lv_time,lv_size,data_percent --select lv_tags={} {}",
            SNAPSHOT_TAG, self.volume_group
        );
        let out = self.runner.run(&cmd, true).await?;

        let mut snapshots = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            snapshots.push(self.parse_snapshot_line(line)?);
        }

        snapshots.sort_by(|a, b| b.data_state_at.cmp(&a.data_state_at));
        Ok(snapshots)
    }
}

#[async_trait]
impl StateReporter for LvmManager {
    async fn get_session_state(&self, name: &str) -> Result<SessionState> {
        let cmd = format!(
            "lvs --noheadings --units b --nosuffix --separator '|' -o lv_size,data_percent {}",
            self.qualified(name)
        );
        let out = self.runner.run(&cmd, true).await?;

        let line = out.lines().next().unwrap_or("").trim();
        let (size_raw, percent_raw) = line.split_once('|').ok_or_else(|| {
            ProvisionError::malformed_output("lvs", format!("unparseable line '{}'", line))
        })?;

        let logical_referenced = size_raw.trim().parse::<u64>().unwrap_or(0);
        let data_percent = percent_raw.trim().parse::<f64>().unwrap_or(0.0);

        Ok(SessionState {
            clone_diff_size: (logical_referenced as f64 * data_percent / 100.0) as u64,
            logical_referenced,
        })
    }

    async fn get_disk_state(&self) -> Result<DiskState> {
        let cmd = format!(
            "vgs --noheadings --units b --nosuffix --separator '|' -o vg_size,vg_free {}",
            self.volume_group
        );
        let out = self.runner.run(&cmd, true).await?;

        let line = out.lines().next().unwrap_or("").trim();
        let (size_raw, free_raw) = line.split_once('|').ok_or_else(|| {
            ProvisionError::malformed_output("vgs", format!("unparseable line '{}'", line))
        })?;

        let size = size_raw.trim().parse::<u64>().unwrap_or(0);
        let free = free_raw.trim().parse::<u64>().unwrap_or(0);

        Ok(DiskState {
            size,
            free,
            used: size.saturating_sub(free),
            data_state_at: self.pool.data_state_at(),
        })
    }
}

impl Pooler for LvmManager {
    fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockRunner;
    use crate::pool::PoolConfig;
    use chrono::TimeZone;

    fn make_manager() -> (Arc<MockRunner>, LvmManager) {
        let runner = Arc::new(MockRunner::new());
        let pool = Arc::new(
            Pool::from_config(PoolConfig {
                name: "vg0/data".to_string(),
                mode: "lvm".to_string(),
                pool_dir_name: "vg0".to_string(),
                ..PoolConfig::default()
            })
            .unwrap(),
        );
        let manager = LvmManager::new(
            runner.clone(),
            ManagerConfig {
                pool,
                pre_snapshot_suffix: String::new(),
            },
        )
        .unwrap();
        (runner, manager)
    }

    #[test]
    fn test_new_rejects_malformed_pool_name() {
        let pool = Arc::new(
            Pool::from_config(PoolConfig {
                name: "justavg".to_string(),
                mode: "lvm".to_string(),
                ..PoolConfig::default()
            })
            .unwrap(),
        );
        let err = LvmManager::new(
            Arc::new(MockRunner::new()),
            ManagerConfig {
                pool,
                pre_snapshot_suffix: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_create_clone_activates_and_mounts() {
        let (runner, manager) = make_manager();
        manager
            .create_clone("thinlab_clone_6000", "vg0/data_snap_20210311101229")
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("lvcreate --snapshot --name thinlab_clone_6000"));
        assert!(calls[0].ends_with("vg0/data_snap_20210311101229"));
        assert_eq!(calls[1], "mkdir -p /var/lib/thinlab/vg0/clones/thinlab_clone_6000");
        assert_eq!(
            calls[2],
            "mount /dev/vg0/thinlab_clone_6000 /var/lib/thinlab/vg0/clones/thinlab_clone_6000"
        );
    }

    #[tokio::test]
    async fn test_destroy_clone_unmounts_before_remove() {
        let (runner, manager) = make_manager();
        manager.destroy_clone("thinlab_clone_6000").await.unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0],
            "umount /var/lib/thinlab/vg0/clones/thinlab_clone_6000"
        );
        assert_eq!(calls[1], "lvremove --force --yes vg0/thinlab_clone_6000");
    }

    #[tokio::test]
    async fn test_destroy_clone_in_use_fails() {
        let (runner, manager) = make_manager();
        runner.fail("umount", 32, "target is busy");

        let err = manager.destroy_clone("thinlab_clone_6000").await.unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed { .. }));
        // lvremove must not have been attempted
        assert!(runner.calls().iter().all(|c| !c.starts_with("lvremove")));
    }

    #[tokio::test]
    async fn test_create_snapshot_name_embeds_data_state() {
        let (runner, manager) = make_manager();
        let dsa = Utc.with_ymd_and_hms(2021, 3, 11, 10, 12, 29).unwrap();

        let name = manager.create_snapshot("", dsa).await.unwrap();
        assert_eq!(name, "vg0/data_snap_20210311101229");
        assert!(runner.calls()[0].contains("--addtag thinlab_snapshot vg0/data"));
    }

    fn lvs_fixture() -> String {
        [
            "  data_snap_20210313000000|2021-03-13 00:00:10 +0000|1073741824|1.00",
            "  data_snap_20210312000000|2021-03-12 00:00:10 +0000|1073741824|1.00",
            "  data_snap_20210311000000|2021-03-11 00:00:10 +0000|1073741824|1.00",
        ]
        .join("\n")
    }

    #[tokio::test]
    async fn test_get_snapshots_parses_and_orders() {
        let (runner, manager) = make_manager();
        runner.respond("lvs --noheadings", lvs_fixture());

        let snapshots = manager.get_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].id, "vg0/data_snap_20210313000000");
        assert_eq!(
            snapshots[0].data_state_at,
            Utc.with_ymd_and_hms(2021, 3, 13, 0, 0, 0).unwrap()
        );
        assert_eq!(snapshots[0].logical_referenced, 1073741824);
        assert_eq!(snapshots[0].used, 10737418);
    }

    #[tokio::test]
    async fn test_cleanup_snapshots_retention() {
        let (runner, manager) = make_manager();
        runner.respond("lvs --noheadings", lvs_fixture());

        let deleted = manager.cleanup_snapshots(1).await.unwrap();
        assert_eq!(
            deleted,
            vec![
                "vg0/data_snap_20210311000000".to_string(),
                "vg0/data_snap_20210312000000".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_disk_state() {
        let (runner, manager) = make_manager();
        runner.respond("vgs --noheadings", "  107374182400|53687091200\n");

        let disk = manager.get_disk_state().await.unwrap();
        assert_eq!(disk.size, 107374182400);
        assert_eq!(disk.free, 53687091200);
        assert_eq!(disk.used, 53687091200);
    }
}
