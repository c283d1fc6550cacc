use crate::error::{ProvisionError, Result};
use crate::runtime::{
    ContainerRuntime, ExecRequest, HEALTH_HEALTHY, HEALTH_UNHEALTHY,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout, in seconds, for a graceful in-container database stop
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// OS user the database runs as inside service containers
pub const POSTGRES_USER: &str = "postgres";

/// Trailing log interval dumped when a container misbehaves
const ESSENTIAL_LOGS_INTERVAL: &str = "10s";

/// Poll a container's health status to a terminal outcome.
///
/// Checks once per second: a healthy status succeeds, an unhealthy status
/// or a logged health-check exit code greater than one fails, and
/// `starting` (or no health information yet) keeps polling. There is no
/// internal retry cap: the caller MUST bound the wait through the
/// cancellation token, which surfaces as `Cancelled` rather than a
/// generic timeout.
pub async fn check_container_readiness(
    runtime: &dyn ContainerRuntime,
    token: &CancellationToken,
    container_id: &str,
) -> Result<()> {
    info!("Checking container readiness: {}", container_id);

    loop {
        if token.is_cancelled() {
            return Err(ProvisionError::cancelled("container readiness check"));
        }

        let health = runtime.inspect_health(container_id).await.map_err(|e| {
            warn!("Failed to inspect container {}: {}", container_id, e);
            e
        })?;

        if let Some(health) = health {
            match health.status.as_str() {
                HEALTH_HEALTHY => return Ok(()),
                HEALTH_UNHEALTHY => {
                    return Err(ProvisionError::health_check_failed(
                        container_id,
                        "container health check failed",
                    ))
                }
                _ => {}
            }

            if let Some(last_check) = health.log.last() {
                if last_check.exit_code > 1 {
                    return Err(ProvisionError::health_check_failed(
                        container_id,
                        format!(
                            "health check failed. Code: {}, Output: {}",
                            last_check.exit_code, last_check.output
                        ),
                    ));
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                return Err(ProvisionError::cancelled("container readiness check"));
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// Run a command inside a container, checking only the exit code
pub async fn exec_command(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    request: ExecRequest,
) -> Result<()> {
    let result = runtime.exec(container_id, &request).await?;

    if result.exit_code != 0 {
        return Err(ProvisionError::exec_failed(container_id, result.exit_code));
    }

    Ok(())
}

/// Run a command inside a container and capture its output.
///
/// The capture runs on a spawned worker raced against the cancellation
/// token. Non-empty stderr becomes the error even on a clean exit;
/// otherwise the trimmed stdout is returned.
pub async fn exec_command_with_output(
    runtime: Arc<dyn ContainerRuntime>,
    token: &CancellationToken,
    container_id: &str,
    request: ExecRequest,
) -> Result<String> {
    let id = container_id.to_string();
    let worker = tokio::spawn(async move { runtime.exec(&id, &request).await });

    let result = tokio::select! {
        joined = worker => joined
            .map_err(|e| ProvisionError::internal(format!("exec worker failed: {}", e)))??,
        _ = token.cancelled() => {
            return Err(ProvisionError::cancelled("in-container command output capture"));
        }
    };

    if !result.stderr.trim().is_empty() {
        return Err(ProvisionError::exec_output(
            container_id,
            result.stderr.trim().to_string(),
        ));
    }

    Ok(result.stdout.trim().to_string())
}

/// Read the database's on-disk version from the data directory's version
/// marker. Unreadable or unparsable markers are fatal; there is no
/// version-inference fallback.
pub async fn detect_pg_version(data_dir: &str) -> Result<f64> {
    let marker_path = format!("{}/PG_VERSION", data_dir);

    let raw = tokio::fs::read_to_string(&marker_path)
        .await
        .map_err(|e| ProvisionError::version_detection(data_dir, e.to_string()))?;

    raw.trim().parse::<f64>().map_err(|e| {
        ProvisionError::version_detection(
            data_dir,
            format!("failed to parse version marker '{}': {}", raw.trim(), e),
        )
    })
}

/// Render a version the way the on-disk binary layout spells it:
/// "9.6" stays fractional, modern major versions drop the decimal.
fn format_pg_version(version: f64) -> String {
    if version.fract() == 0.0 {
        format!("{:.0}", version)
    } else {
        format!("{}", version)
    }
}

/// Gracefully stop the database inside a container, using the
/// version-appropriate binary path and a bounded wait.
pub async fn stop_postgres(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    data_dir: &str,
    timeout_secs: u64,
) -> Result<()> {
    let version = detect_pg_version(data_dir).await?;

    let stop_command = vec![
        format!("/usr/lib/postgresql/{}/bin/pg_ctl", format_pg_version(version)),
        "-D".to_string(),
        data_dir.to_string(),
        "-w".to_string(),
        "--timeout".to_string(),
        timeout_secs.to_string(),
        "stop".to_string(),
    ];

    info!("Stopping PostgreSQL instance: {:?}", stop_command);

    exec_command(
        runtime,
        container_id,
        ExecRequest {
            user: Some(POSTGRES_USER.to_string()),
            command: stop_command,
        },
    )
    .await
}

/// Dump a container's recent output at warn level. Best-effort: a failure
/// to fetch logs is itself only logged.
pub async fn dump_container_logs(runtime: &dyn ContainerRuntime, container_id: &str) {
    match runtime.logs(container_id, ESSENTIAL_LOGS_INTERVAL).await {
        Ok(logs) => warn!("Container logs:\n{}", logs),
        Err(e) => warn!("Failed to get logs from container {}: {}", container_id, e),
    }
}

/// Dump the tail of the database's own log file from inside a container.
/// Best-effort, like `dump_container_logs`.
pub async fn dump_postgres_logs(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    clone_path: &str,
) {
    let command = vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("tail -n 20 $(ls -t {}/log/*.csv | tail -n 1)", clone_path),
    ];

    match runtime
        .exec(container_id, &ExecRequest { user: None, command })
        .await
    {
        Ok(result) => warn!("Postgres logs: {}", result.stdout.trim()),
        Err(e) => warn!("Failed to read Postgres logs: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ExecResult, HealthLogEntry, HealthState, MockContainerRuntime};

    #[tokio::test(start_paused = true)]
    async fn test_readiness_waits_for_healthy() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_health_sequence(
                "c1",
                vec![
                    HealthState::with_status("starting"),
                    HealthState::with_status("starting"),
                    HealthState::with_status("healthy"),
                ],
            )
            .await;

        let token = CancellationToken::new();
        check_container_readiness(&runtime, &token, "c1")
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_unhealthy_is_failure() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_health_sequence(
                "c1",
                vec![
                    HealthState::with_status("starting"),
                    HealthState::with_status("unhealthy"),
                ],
            )
            .await;

        let token = CancellationToken::new();
        let err = check_container_readiness(&runtime, &token, "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::HealthCheckFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_exit_code_above_one_is_failure() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_health_sequence(
                "c1",
                vec![HealthState {
                    status: "starting".to_string(),
                    failing_streak: 1,
                    log: vec![HealthLogEntry {
                        exit_code: 2,
                        output: "connection refused".to_string(),
                    }],
                }],
            )
            .await;

        let token = CancellationToken::new();
        let err = check_container_readiness(&runtime, &token, "c1")
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ProvisionError::HealthCheckFailed { .. }));
        assert!(message.contains("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_cancellation_is_distinct() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_health_sequence("c1", vec![HealthState::with_status("starting")])
            .await;

        let token = CancellationToken::new();
        token.cancel();

        let err = check_container_readiness(&runtime, &token, "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_exec_command_checks_exit_code() {
        let runtime = MockContainerRuntime::new();
        runtime
            .set_exec_result(
                "c1",
                ExecResult {
                    exit_code: 3,
                    stdout: String::new(),
                    stderr: String::new(),
                },
            )
            .await;

        let err = exec_command(
            &runtime,
            "c1",
            ExecRequest {
                user: None,
                command: vec!["true".to_string()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::ExecFailed { exit_code: 3, .. }));
    }

    #[tokio::test]
    async fn test_exec_with_output_returns_trimmed_stdout() {
        let runtime = Arc::new(MockContainerRuntime::new());
        runtime
            .set_exec_result(
                "c1",
                ExecResult {
                    exit_code: 0,
                    stdout: "  13\n".to_string(),
                    stderr: String::new(),
                },
            )
            .await;

        let token = CancellationToken::new();
        let out = exec_command_with_output(
            runtime,
            &token,
            "c1",
            ExecRequest {
                user: None,
                command: vec!["cat".to_string()],
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "13");
    }

    #[tokio::test]
    async fn test_exec_with_output_stderr_becomes_error() {
        let runtime = Arc::new(MockContainerRuntime::new());
        runtime
            .set_exec_result(
                "c1",
                ExecResult {
                    exit_code: 0,
                    stdout: "partial".to_string(),
                    stderr: "permission denied".to_string(),
                },
            )
            .await;

        let token = CancellationToken::new();
        let err = exec_command_with_output(
            runtime,
            &token,
            "c1",
            ExecRequest {
                user: None,
                command: vec!["cat".to_string()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::ExecOutput { .. }));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_detect_pg_version() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_str().unwrap();

        std::fs::write(tmp.path().join("PG_VERSION"), "13\n").unwrap();
        assert_eq!(detect_pg_version(data_dir).await.unwrap(), 13.0);

        std::fs::write(tmp.path().join("PG_VERSION"), "9.6\n").unwrap();
        assert_eq!(detect_pg_version(data_dir).await.unwrap(), 9.6);
    }

    #[tokio::test]
    async fn test_detect_pg_version_missing_marker_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = detect_pg_version(tmp.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::VersionDetection { .. }));
    }

    #[tokio::test]
    async fn test_detect_pg_version_garbage_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("PG_VERSION"), "not-a-version\n").unwrap();

        let err = detect_pg_version(tmp.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::VersionDetection { .. }));
    }

    #[tokio::test]
    async fn test_stop_postgres_uses_versioned_binary() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("PG_VERSION"), "13\n").unwrap();
        let data_dir = tmp.path().to_str().unwrap();

        let runtime = MockContainerRuntime::new();
        stop_postgres(&runtime, "c1", data_dir, 60).await.unwrap();

        let operations = runtime.operations().await;
        assert_eq!(operations.len(), 1);
        assert!(operations[0].starts_with("exec c1 /usr/lib/postgresql/13/bin/pg_ctl -D"));
        assert!(operations[0].ends_with("-w --timeout 60 stop"));
    }

    #[test]
    fn test_format_pg_version() {
        assert_eq!(format_pg_version(13.0), "13");
        assert_eq!(format_pg_version(9.6), "9.6");
    }
}
