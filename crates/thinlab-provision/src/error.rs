// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for thin-clone storage and container lifecycle operations
#[derive(Error, Debug, Diagnostic)]
pub enum ProvisionError {
    /// Command execution failed
    #[error("Command '{command}' failed with exit code {exit_code}")]
    #[diagnostic(code(thinlab::provision::command_failed), help("stderr: {stderr}"))]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        stderr: String,
    },

    /// Unsupported thin-clone manager mode
    #[error("Unsupported thin-clone manager specified: \"{mode}\"")]
    #[diagnostic(
        code(thinlab::provision::unsupported_pool_mode),
        help("Supported pool modes are \"zfs\" and \"lvm\". Check the pool configuration")
    )]
    UnsupportedPoolMode {
        #[allow(unused)]
        mode: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(thinlab::provision::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Local filesystem operation failed
    #[error("Filesystem operation failed for '{path}': {message}")]
    #[diagnostic(
        code(thinlab::provision::filesystem_failed),
        help("Verify the path exists and the engine has permission to modify it")
    )]
    Filesystem {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Container operation failed
    #[error("Container operation failed for '{container}': {message}")]
    #[diagnostic(
        code(thinlab::provision::container_operation_failed),
        help("Inspect the container with `docker inspect` to see its current state")
    )]
    ContainerOperationFailed {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        message: String,
    },

    /// Container health check reached a terminal failure
    #[error("Health check failed for container '{container}': {message}")]
    #[diagnostic(
        code(thinlab::provision::health_check_failed),
        help("Check the database logs inside the container. The clone data may be inconsistent")
    )]
    HealthCheckFailed {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        message: String,
    },

    /// In-container command exited non-zero
    #[error("Command in container '{container}' exited with code {exit_code}")]
    #[diagnostic(code(thinlab::provision::exec_failed), help("Check the container logs for details"))]
    ExecFailed {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        exit_code: i64,
    },

    /// In-container command produced error output
    #[error("Command in container '{container}' reported errors: {stderr}")]
    #[diagnostic(
        code(thinlab::provision::exec_output),
        help("The command completed but wrote to stderr; treat the output as a failure")
    )]
    ExecOutput {
        #[allow(unused)]
        container: String,
        #[allow(unused)]
        stderr: String,
    },

    /// Database version marker could not be read or parsed
    #[error("Failed to detect database version in '{data_dir}': {message}")]
    #[diagnostic(
        code(thinlab::provision::version_detection_failed),
        help("The data directory must contain a readable PG_VERSION file")
    )]
    VersionDetection {
        #[allow(unused)]
        data_dir: String,
        #[allow(unused)]
        message: String,
    },

    /// Backend tooling produced output the engine could not interpret
    #[error("Malformed output from '{command}': {message}")]
    #[diagnostic(
        code(thinlab::provision::malformed_output),
        help("The backend tool version may be incompatible. Run the command manually to compare")
    )]
    MalformedOutput {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Operation was cancelled by the caller's context
    #[error("Operation cancelled: {operation}")]
    #[diagnostic(
        code(thinlab::provision::cancelled),
        help("The caller's deadline or cancellation token fired before the operation completed")
    )]
    Cancelled {
        #[allow(unused)]
        operation: String,
    },

    /// Internal error
    #[error("Internal provision error: {message}")]
    #[diagnostic(
        code(thinlab::provision::internal_error),
        help("This is likely a bug in thinlab-provision. Please report it with the full error details")
    )]
    Internal {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for provision operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn unsupported_pool_mode(mode: impl Into<String>) -> Self {
        Self::UnsupportedPoolMode { mode: mode.into() }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn filesystem(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn container_operation_failed(
        container: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ContainerOperationFailed {
            container: container.into(),
            message: message.into(),
        }
    }

    pub fn health_check_failed(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HealthCheckFailed {
            container: container.into(),
            message: message.into(),
        }
    }

    pub fn exec_failed(container: impl Into<String>, exit_code: i64) -> Self {
        Self::ExecFailed {
            container: container.into(),
            exit_code,
        }
    }

    pub fn exec_output(container: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExecOutput {
            container: container.into(),
            stderr: stderr.into(),
        }
    }

    pub fn version_detection(data_dir: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VersionDetection {
            data_dir: data_dir.into(),
            message: message.into(),
        }
    }

    pub fn malformed_output(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
