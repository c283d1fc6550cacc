use crate::error::Result;
use crate::runtime::{ContainerRuntime, MountPoint, VolumeSpec};
use std::path::Path;

/// Where the engine's own process runs relative to the container runtime.
///
/// On a bare host the clone's data directory can be bind-mounted directly.
/// When the engine itself runs inside a container (guest role) that path is
/// only meaningful inside the current mount namespace, so volume sources
/// must be rebuilt from the engine container's own mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTopology {
    Host,
    Guest {
        /// The engine's own container identifier (hostname inside Docker)
        container_id: String,
    },
}

impl HostTopology {
    /// Detect the topology from container markers on the local filesystem
    pub fn detect() -> Self {
        if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
            return Self::Guest {
                container_id: own_container_id(),
            };
        }

        if let Ok(cgroup) = std::fs::read_to_string("/proc/1/cgroup") {
            if ["docker", "containerd", "kubepods"]
                .iter()
                .any(|marker| cgroup.contains(marker))
            {
                return Self::Guest {
                    container_id: own_container_id(),
                };
            }
        }

        Self::Host
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest { .. })
    }
}

/// Inside a container the hostname doubles as the container identifier
fn own_container_id() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default()
}

/// Join a path suffix onto a base, tolerating either side's slashes
fn join_path(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        suffix.trim_start_matches('/')
    )
}

/// Rebuild volume sources from an existing mount table.
///
/// Every mount whose destination is a prefix of `data_dir` is rewritten:
/// the remaining path suffix is appended to the mount's host-side source
/// and the destination is pinned to `data_dir` exactly. Other mounts pass
/// through unchanged. This is what makes the clone's data directory
/// reachable from a sibling container when the engine runs as a guest.
pub fn rewrite_mounts(data_dir: &str, mount_points: Vec<MountPoint>) -> Vec<VolumeSpec> {
    let mut volumes = Vec::with_capacity(mount_points.len());

    for mount_point in mount_points {
        let (source, destination) = if data_dir.starts_with(&mount_point.destination) {
            let suffix = &data_dir[mount_point.destination.len()..];
            (
                join_path(&mount_point.source, suffix),
                data_dir.to_string(),
            )
        } else {
            (mount_point.source, mount_point.destination)
        };

        volumes.push(VolumeSpec {
            source,
            target: destination,
            read_only: !mount_point.rw,
            propagation: if mount_point.propagation.is_empty() {
                None
            } else {
                Some(mount_point.propagation)
            },
        });
    }

    volumes
}

/// Build the socket-directory mount for a clone container, relying on the
/// rewritten data-directory mount.
///
/// The socket directory must be shared (not private) so sockets created
/// inside the clone container are visible to clients outside it.
pub fn socket_mount(
    mount_dir: &str,
    data_dir: &str,
    socket_clone_dir: &str,
    host_data_dir: &str,
) -> VolumeSpec {
    let socket_path = socket_clone_dir.strip_prefix(mount_dir).unwrap_or(socket_clone_dir);
    let data_path = data_dir.strip_prefix(mount_dir).unwrap_or(data_dir);
    let external_mount = host_data_dir.strip_suffix(data_path).unwrap_or(host_data_dir);

    VolumeSpec {
        source: join_path(external_mount, socket_path),
        target: socket_clone_dir.to_string(),
        read_only: false,
        propagation: Some("rshared".to_string()),
    }
}

/// Resolve the volumes for a new clone container according to topology:
/// a direct bind on a bare host, rewritten mounts when running as a guest.
pub async fn build_data_volumes(
    runtime: &dyn ContainerRuntime,
    topology: &HostTopology,
    data_dir: &str,
) -> Result<Vec<VolumeSpec>> {
    match topology {
        HostTopology::Host => Ok(vec![VolumeSpec::bind(data_dir, data_dir)]),
        HostTopology::Guest { container_id } => {
            let mount_points = runtime.inspect_mounts(container_id).await?;
            Ok(rewrite_mounts(data_dir, mount_points))
        }
    }
}
