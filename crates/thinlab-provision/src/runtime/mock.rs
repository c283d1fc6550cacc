use crate::error::{ProvisionError, Result};
use crate::runtime::{
    matches_label_filters, ContainerRuntime, ContainerSummary, ExecRequest, ExecResult,
    HealthState, MountPoint, RunRequest,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory container used by `MockContainerRuntime`
#[derive(Debug, Clone, Default)]
pub struct MockContainer {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountPoint>,
}

impl MockContainer {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            names: vec![id.clone()],
            id,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: MountPoint) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }
}

/// Mock container runtime for testing orchestration logic.
///
/// Maintains an in-memory container registry, scripted health sequences
/// and exec results, and records every mutating operation so tests can
/// assert ordering (stop before remove, graceful stop before reclaim).
#[derive(Default)]
pub struct MockContainerRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    health_scripts: RwLock<HashMap<String, VecDeque<HealthState>>>,
    exec_results: RwLock<HashMap<String, ExecResult>>,
    logs: RwLock<HashMap<String, String>>,
    images: RwLock<HashSet<String>>,
    fail_stop: RwLock<HashSet<String>>,
    fail_remove: RwLock<HashSet<String>>,
    operations: RwLock<Vec<String>>,
}

impl MockContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_container(&self, container: MockContainer) {
        self.containers
            .write()
            .await
            .insert(container.id.clone(), container);
    }

    /// Script the health states returned by successive `inspect_health`
    /// calls; the last state repeats once the sequence is exhausted.
    pub async fn set_health_sequence(&self, id: &str, states: Vec<HealthState>) {
        self.health_scripts
            .write()
            .await
            .insert(id.to_string(), states.into());
    }

    pub async fn set_exec_result(&self, id: &str, result: ExecResult) {
        self.exec_results.write().await.insert(id.to_string(), result);
    }

    pub async fn set_logs(&self, id: &str, logs: impl Into<String>) {
        self.logs.write().await.insert(id.to_string(), logs.into());
    }

    pub async fn fail_stop_for(&self, id: &str) {
        self.fail_stop.write().await.insert(id.to_string());
    }

    pub async fn fail_remove_for(&self, id: &str) {
        self.fail_remove.write().await.insert(id.to_string());
    }

    /// Mutating operations in call order, e.g. `"stop c1"`, `"remove c1"`
    pub async fn operations(&self) -> Vec<String> {
        self.operations.read().await.clone()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.containers.read().await.contains_key(id)
    }

    async fn record(&self, operation: String) {
        debug!("Mock runtime: {}", operation);
        self.operations.write().await.push(operation);
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    async fn run(&self, request: &RunRequest) -> Result<String> {
        self.record(format!("run {}", request.name)).await;

        let mut labels = HashMap::new();
        for label in &request.labels {
            match label.split_once('=') {
                Some((key, value)) => labels.insert(key.to_string(), value.to_string()),
                None => labels.insert(label.clone(), String::new()),
            };
        }

        let container = MockContainer {
            id: request.name.clone(),
            names: vec![request.name.clone()],
            labels,
            mounts: request
                .volumes
                .iter()
                .map(|volume| MountPoint {
                    source: volume.source.clone(),
                    destination: volume.target.clone(),
                    rw: !volume.read_only,
                    propagation: volume.propagation.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
        };

        self.add_container(container).await;
        Ok(request.name.clone())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        self.record(format!("stop {} timeout={}", id, timeout.as_secs()))
            .await;

        if self.fail_stop.read().await.contains(id) {
            return Err(ProvisionError::container_operation_failed(
                id,
                "scripted stop failure",
            ));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record(format!("remove {}", id)).await;

        if self.fail_remove.read().await.contains(id) {
            return Err(ProvisionError::container_operation_failed(
                id,
                "scripted remove failure",
            ));
        }

        self.containers.write().await.remove(id);
        Ok(())
    }

    async fn list_ids(&self, label_filters: &[String]) -> Result<Vec<String>> {
        Ok(self
            .list_containers(label_filters)
            .await?
            .into_iter()
            .map(|summary| summary.id)
            .collect())
    }

    async fn list_containers(&self, label_filters: &[String]) -> Result<Vec<ContainerSummary>> {
        let containers = self.containers.read().await;
        let mut summaries: Vec<ContainerSummary> = containers
            .values()
            .filter(|container| matches_label_filters(&container.labels, label_filters))
            .map(|container| ContainerSummary {
                id: container.id.clone(),
                names: container.names.clone(),
                labels: container.labels.clone(),
            })
            .collect();

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn inspect_mounts(&self, id: &str) -> Result<Vec<MountPoint>> {
        let containers = self.containers.read().await;
        let container = containers.get(id).ok_or_else(|| {
            ProvisionError::container_operation_failed(id, "no such container")
        })?;
        Ok(container.mounts.clone())
    }

    async fn inspect_health(&self, id: &str) -> Result<Option<HealthState>> {
        let mut scripts = self.health_scripts.write().await;
        Ok(scripts.get_mut(id).and_then(|sequence| {
            if sequence.len() > 1 {
                sequence.pop_front()
            } else {
                sequence.front().cloned()
            }
        }))
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecResult> {
        self.record(format!("exec {} {}", id, request.command.join(" ")))
            .await;

        Ok(self
            .exec_results
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn logs(&self, id: &str, since: &str) -> Result<String> {
        self.record(format!("logs {} since={}", id, since)).await;
        Ok(self.logs.read().await.get(id).cloned().unwrap_or_default())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.read().await.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image)).await;
        self.images.write().await.insert(image.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_registers_container_with_labels() {
        let runtime = MockContainerRuntime::new();
        let request = RunRequest {
            name: "thinlab_clone_6000".to_string(),
            labels: vec!["thinlab_clone".to_string(), "dbpool".to_string()],
            ..RunRequest::default()
        };

        let id = runtime.run(&request).await.unwrap();
        assert_eq!(id, "thinlab_clone_6000");

        let listed = runtime
            .list_ids(&["thinlab_clone".to_string(), "dbpool".to_string()])
            .await
            .unwrap();
        assert_eq!(listed, vec!["thinlab_clone_6000"]);
    }

    #[tokio::test]
    async fn test_health_sequence_repeats_last_state() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_health_sequence(
                "c1",
                vec![
                    HealthState::with_status("starting"),
                    HealthState::with_status("healthy"),
                ],
            )
            .await;

        assert_eq!(
            runtime.inspect_health("c1").await.unwrap().unwrap().status,
            "starting"
        );
        assert_eq!(
            runtime.inspect_health("c1").await.unwrap().unwrap().status,
            "healthy"
        );
        assert_eq!(
            runtime.inspect_health("c1").await.unwrap().unwrap().status,
            "healthy"
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_container() {
        let runtime = MockContainerRuntime::new();
        runtime.add_container(MockContainer::new("c1")).await;

        runtime.remove("c1").await.unwrap();
        assert!(!runtime.contains("c1").await);
        assert_eq!(runtime.operations().await, vec!["remove c1"]);
    }

    #[tokio::test]
    async fn test_scripted_stop_failure() {
        let runtime = MockContainerRuntime::new();
        runtime.add_container(MockContainer::new("c1")).await;
        runtime.fail_stop_for("c1").await;

        let err = runtime.stop("c1", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ContainerOperationFailed { .. }
        ));
    }
}
