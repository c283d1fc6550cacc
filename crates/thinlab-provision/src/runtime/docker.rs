use crate::command::Runner;
use crate::error::{ProvisionError, Result};
use crate::runtime::{
    ContainerRuntime, ContainerSummary, ExecRequest, ExecResult, HealthState, MountPoint,
    RunRequest,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Docker client driving the `docker` command line through a `Runner`.
///
/// Every invocation is assembled by a `build_*` function from a structured
/// request, so command construction is unit-testable without string
/// parsing at call sites.
pub struct DockerCli {
    runner: Arc<dyn Runner>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }
}

/// Quote one shell argument when it needs it
fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,{}".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn build_run_command(request: &RunRequest) -> String {
    let mut parts = vec!["docker run".to_string(), "--name".to_string(), quote(&request.name)];

    if request.detach {
        parts.push("--detach".to_string());
    }

    if let Some((host, container)) = request.publish {
        parts.push("--publish".to_string());
        parts.push(format!("{}:{}", host, container));
    }

    for (key, value) in &request.env {
        parts.push("--env".to_string());
        parts.push(quote(&format!("{}={}", key, value)));
    }

    for volume in &request.volumes {
        let mut options = Vec::new();
        if volume.read_only {
            options.push("ro".to_string());
        }
        if let Some(ref propagation) = volume.propagation {
            options.push(propagation.clone());
        }

        let spec = if options.is_empty() {
            format!("{}:{}", volume.source, volume.target)
        } else {
            format!("{}:{}:{}", volume.source, volume.target, options.join(","))
        };

        parts.push("--volume".to_string());
        parts.push(quote(&spec));
    }

    for label in &request.labels {
        parts.push("--label".to_string());
        parts.push(quote(label));
    }

    parts.push(quote(&request.image));
    parts.extend(request.command_args.iter().map(|arg| quote(arg)));

    parts.join(" ")
}

fn build_list_command(label_filters: &[String], format: Option<&str>) -> String {
    let mut parts = vec!["docker container ls --all".to_string()];

    match format {
        Some(format) => parts.push(format!("--format '{}'", format)),
        None => parts.push("--quiet".to_string()),
    }

    for filter in label_filters {
        parts.push(format!("--filter {}", quote(&format!("label={}", filter))));
    }

    parts.join(" ")
}

fn build_exec_command(id: &str, request: &ExecRequest) -> String {
    let mut parts = vec!["docker exec".to_string()];

    if let Some(ref user) = request.user {
        parts.push("--user".to_string());
        parts.push(quote(user));
    }

    parts.push(quote(id));
    parts.extend(request.command.iter().map(|arg| quote(arg)));

    parts.join(" ")
}

/// Parse one line of `docker container ls --format
/// '{{.ID}}\t{{.Names}}\t{{.Labels}}'` output.
fn parse_container_line(line: &str) -> Result<ContainerSummary> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 3 {
        return Err(ProvisionError::malformed_output(
            "docker container ls",
            format!("expected 3 tab-separated fields: '{}'", line),
        ));
    }

    let names = fields[1]
        .split(',')
        .map(|name| name.trim().trim_start_matches('/').to_string())
        .filter(|name| !name.is_empty())
        .collect();

    let mut labels = HashMap::new();
    for label in fields[2].split(',') {
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        match label.split_once('=') {
            Some((key, value)) => labels.insert(key.to_string(), value.to_string()),
            None => labels.insert(label.to_string(), String::new()),
        };
    }

    Ok(ContainerSummary {
        id: fields[0].to_string(),
        names,
        labels,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, request: &RunRequest) -> Result<String> {
        self.runner.run(&build_run_command(request), true).await
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let cmd = format!(
            "docker container stop --time {} {}",
            timeout.as_secs(),
            quote(id)
        );
        self.runner.run(&cmd, true).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let cmd = format!("docker container rm --force --volumes {}", quote(id));
        self.runner.run(&cmd, true).await?;
        Ok(())
    }

    async fn list_ids(&self, label_filters: &[String]) -> Result<Vec<String>> {
        let out = self
            .runner
            .run(&build_list_command(label_filters, None), true)
            .await?;

        Ok(out
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn list_containers(&self, label_filters: &[String]) -> Result<Vec<ContainerSummary>> {
        let format = r"{{.ID}}\t{{.Names}}\t{{.Labels}}";
        let out = self
            .runner
            .run(&build_list_command(label_filters, Some(format)), true)
            .await?;

        let mut containers = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            containers.push(parse_container_line(line)?);
        }

        Ok(containers)
    }

    async fn inspect_mounts(&self, id: &str) -> Result<Vec<MountPoint>> {
        let cmd = format!(
            "docker container inspect --format '{{{{json .Mounts}}}}' {}",
            quote(id)
        );
        let out = self.runner.run(&cmd, true).await?;

        if out.trim() == "null" {
            return Ok(Vec::new());
        }

        serde_json::from_str(out.trim()).map_err(|e| {
            ProvisionError::malformed_output("docker container inspect", e.to_string())
        })
    }

    async fn inspect_health(&self, id: &str) -> Result<Option<HealthState>> {
        let cmd = format!(
            "docker container inspect --format '{{{{json .State.Health}}}}' {}",
            quote(id)
        );
        let out = self.runner.run(&cmd, true).await?;

        serde_json::from_str(out.trim()).map_err(|e| {
            ProvisionError::malformed_output("docker container inspect", e.to_string())
        })
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecResult> {
        let output = self
            .runner
            .run_raw(&build_exec_command(id, request), true)
            .await?;

        Ok(ExecResult {
            exit_code: output.exit_code as i64,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn logs(&self, id: &str, since: &str) -> Result<String> {
        let cmd = format!("docker logs {} --since {} --timestamps", quote(id), since);
        self.runner.run(&cmd, true).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let cmd = format!("docker images {} --quiet", quote(image));
        let out = self.runner.run(&cmd, true).await?;
        Ok(!out.trim().is_empty())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            info!("Docker image \"{}\" already exists locally", image);
            return Ok(());
        }

        self.runner
            .run(&format!("docker pull {}", quote(image)), true)
            .await?;

        info!("Docker image \"{}\" pulled", image);
        Ok(())
    }
}
