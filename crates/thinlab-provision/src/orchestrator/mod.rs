pub mod mounts;
pub mod resources;

pub use mounts::{rewrite_mounts, socket_mount, HostTopology};
pub use resources::{build_host_config, resource_options, HostConfig, Resources};

use crate::error::{ProvisionError, Result};
use crate::housekeeper::{LABEL_CLONE, STOP_TIMEOUT};
use crate::pool::Pool;
use crate::runtime::{ContainerRuntime, ExecRequest, RunRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use mounts::build_data_volumes;

/// Container-side port the database listens on
const DB_PORT: u16 = 5432;

/// Everything needed to start one clone's service container
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub clone_name: String,
    pub docker_image: String,
    pub pool: Arc<Pool>,
    /// Host port published to the database's native port
    pub port: u16,
    pub unix_socket_clone_dir: String,
    pub container_conf: HashMap<String, Value>,
}

impl AppConfig {
    /// The clone's data directory, derived from the pool layout
    pub fn data_dir(&self) -> String {
        self.pool.clone_path(self.port)
    }
}

/// Recreate a clone's socket directory from scratch with world-accessible
/// permissions, guaranteeing no stale socket files from a prior crashed
/// container persist.
fn prepare_socket_clone_dir(socket_clone_dir: &str) -> Result<()> {
    match std::fs::remove_dir_all(socket_clone_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ProvisionError::filesystem(socket_clone_dir, e.to_string())),
    }

    std::fs::create_dir_all(socket_clone_dir)
        .map_err(|e| ProvisionError::filesystem(socket_clone_dir, e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_clone_dir, std::fs::Permissions::from_mode(0o777))
            .map_err(|e| ProvisionError::filesystem(socket_clone_dir, e.to_string()))?;
    }

    Ok(())
}

/// Start the service container exposing a clone's database.
///
/// Storage for the clone must already exist; the container binds the
/// clone's data directory, publishes the requested port, and is tagged
/// with the clone label and the pool identity for later reconciliation.
pub async fn run_container(
    runtime: &dyn ContainerRuntime,
    topology: &HostTopology,
    app: &AppConfig,
) -> Result<String> {
    let data_dir = app.data_dir();
    let mut volumes = build_data_volumes(runtime, topology, &data_dir).await?;

    // In the guest role the socket directory rides on the rewritten data
    // mount; its host-side path is recovered from that mount's source.
    if topology.is_guest() && app.unix_socket_clone_dir.starts_with(&app.pool.mount_dir) {
        if let Some(data_mount) = volumes.iter().find(|volume| volume.target == data_dir) {
            volumes.push(socket_mount(
                &app.pool.mount_dir,
                &data_dir,
                &app.unix_socket_clone_dir,
                &data_mount.source,
            ));
        }
    }

    prepare_socket_clone_dir(&app.unix_socket_clone_dir)?;

    let request = RunRequest {
        name: app.clone_name.clone(),
        image: app.docker_image.clone(),
        detach: true,
        publish: Some((app.port, DB_PORT)),
        env: vec![("PGDATA".to_string(), data_dir)],
        volumes,
        labels: vec![LABEL_CLONE.to_string(), app.pool.name.clone()],
        command_args: vec!["-k".to_string(), app.unix_socket_clone_dir.clone()],
    };

    info!("Running container: {}", app.clone_name);
    runtime.run(&request).await
}

/// Gracefully stop a clone's container within the standard timeout
pub async fn stop_container(runtime: &dyn ContainerRuntime, app: &AppConfig) -> Result<()> {
    info!("Stopping container: {}", app.clone_name);
    runtime.stop(&app.clone_name, STOP_TIMEOUT).await
}

/// Stop and force-remove a clone's container including anonymous volumes.
///
/// Removal is always attempted, even when the stop attempt fails or times
/// out; both outcomes are logged.
pub async fn remove_container(runtime: &dyn ContainerRuntime, app: &AppConfig) -> Result<()> {
    if let Err(e) = runtime.stop(&app.clone_name, STOP_TIMEOUT).await {
        warn!("Failed to stop container '{}': {}", app.clone_name, e);
    } else {
        info!("Container \"{}\" has been stopped", app.clone_name);
    }

    match runtime.remove(&app.clone_name).await {
        Ok(()) => {
            info!("Container \"{}\" has been removed", app.clone_name);
            Ok(())
        }
        Err(e) => {
            warn!("Failed to remove container '{}': {}", app.clone_name, e);
            Err(e)
        }
    }
}

/// List clone container IDs belonging to one pool (clone label AND pool
/// label, identifiers only)
pub async fn list_containers(
    runtime: &dyn ContainerRuntime,
    pool_name: &str,
) -> Result<Vec<String>> {
    runtime
        .list_ids(&[LABEL_CLONE.to_string(), pool_name.to_string()])
        .await
}

/// Execute one command inside a clone's container and return its trimmed
/// stdout; a non-zero exit is an error carrying the code.
pub async fn exec(
    runtime: &dyn ContainerRuntime,
    app: &AppConfig,
    command: Vec<String>,
) -> Result<String> {
    let result = runtime
        .exec(&app.clone_name, &ExecRequest { user: None, command })
        .await?;

    if result.exit_code != 0 {
        return Err(ProvisionError::exec_failed(&app.clone_name, result.exit_code));
    }

    Ok(result.stdout.trim().to_string())
}

/// Tail a clone container's logs over the trailing interval, in minutes
pub async fn get_logs(
    runtime: &dyn ContainerRuntime,
    app: &AppConfig,
    since_rel_mins: u64,
) -> Result<String> {
    runtime
        .logs(&app.clone_name, &format!("{}m", since_rel_mins))
        .await
}
