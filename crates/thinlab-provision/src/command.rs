use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

/// Output from a command execution, captured regardless of exit status
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// The sole boundary between the engine and the operating system.
///
/// Storage backends and the Docker CLI client translate their operations
/// into command lines and hand them to a `Runner`. `run` is the checked
/// form (non-zero exit is an error); `run_raw` returns the captured
/// output regardless of exit status for callers that demultiplex streams
/// or interpret exit codes themselves.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute a command line and return stdout trimmed of trailing
    /// whitespace. A non-zero exit yields `CommandFailed`.
    async fn run(&self, command: &str, use_sudo: bool) -> Result<String>;

    /// Execute a command line and return the full captured output
    /// regardless of exit code.
    async fn run_raw(&self, command: &str, use_sudo: bool) -> Result<CommandOutput>;
}

/// Runs command lines on the local host through `sh -c`
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    fn command_line(command: &str, use_sudo: bool) -> String {
        if use_sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(&self, command: &str, use_sudo: bool) -> Result<String> {
        let output = self.run_raw(command, use_sudo).await?;

        if output.exit_code != 0 {
            return Err(ProvisionError::command_failed(
                Self::command_line(command, use_sudo),
                output.exit_code,
                output.stderr,
            ));
        }

        Ok(output.stdout.trim_end().to_string())
    }

    async fn run_raw(&self, command: &str, use_sudo: bool) -> Result<CommandOutput> {
        let command_line = Self::command_line(command, use_sudo);
        debug!("Executing: {}", command_line);

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .output()
            .await
            .map_err(|e| ProvisionError::command_failed(&command_line, -1, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        debug!("Command exited with code {}: {}", exit_code, command_line);

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Scripted response for `MockRunner`
#[derive(Debug, Clone)]
enum MockResponse {
    Output(String),
    Failure { exit_code: i32, stderr: String },
}

/// In-memory runner for testing backend command vocabularies.
///
/// Responses are matched by substring against the incoming command line,
/// first match wins. Unmatched commands succeed with empty output so
/// tests only script the calls they assert on. Every invocation is
/// recorded and can be inspected with `calls()`.
pub struct MockRunner {
    responses: Mutex<Vec<(String, MockResponse)>>,
    calls: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script successful output for commands containing `pattern`
    pub fn respond(&self, pattern: impl Into<String>, output: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.into(), MockResponse::Output(output.into())));
    }

    /// Script a failure for commands containing `pattern`
    pub fn fail(&self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) {
        self.responses.lock().unwrap().push((
            pattern.into(),
            MockResponse::Failure {
                exit_code,
                stderr: stderr.into(),
            },
        ));
    }

    /// All command lines this runner has executed, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, command: &str) -> Option<MockResponse> {
        self.responses
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn run(&self, command: &str, use_sudo: bool) -> Result<String> {
        let output = self.run_raw(command, use_sudo).await?;

        if output.exit_code != 0 {
            return Err(ProvisionError::command_failed(
                command,
                output.exit_code,
                output.stderr,
            ));
        }

        Ok(output.stdout.trim_end().to_string())
    }

    async fn run_raw(&self, command: &str, _use_sudo: bool) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());

        Ok(match self.lookup(command) {
            Some(MockResponse::Output(stdout)) => CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
            },
            Some(MockResponse::Failure { exit_code, stderr }) => CommandOutput {
                stdout: String::new(),
                stderr,
                exit_code,
            },
            None => CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_runner_captures_stdout() {
        let runner = LocalRunner::new();
        let out = runner.run("echo hello", false).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_local_runner_trims_trailing_whitespace() {
        let runner = LocalRunner::new();
        let out = runner.run("printf 'value\\n\\n'", false).await.unwrap();
        assert_eq!(out, "value");
    }

    #[tokio::test]
    async fn test_local_runner_nonzero_exit_is_error() {
        let runner = LocalRunner::new();
        let err = runner.run("exit 3", false).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::CommandFailed { exit_code: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_local_runner_raw_reports_streams() {
        let runner = LocalRunner::new();
        let out = runner
            .run_raw("echo out; echo err >&2; exit 1", false)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_mock_runner_scripted_response() {
        let runner = MockRunner::new();
        runner.respond("zfs list", "pool@snapshot_1\n");

        let out = runner.run("zfs list -t snapshot", true).await.unwrap();
        assert_eq!(out, "pool@snapshot_1");
        assert_eq!(runner.calls(), vec!["zfs list -t snapshot".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_runner_scripted_failure() {
        let runner = MockRunner::new();
        runner.fail("zfs destroy", 1, "dataset is busy");

        let err = runner.run("zfs destroy pool@snap", true).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::CommandFailed { exit_code: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_mock_runner_unmatched_commands_succeed() {
        let runner = MockRunner::new();
        let out = runner.run("docker pull image", true).await.unwrap();
        assert!(out.is_empty());
    }
}
