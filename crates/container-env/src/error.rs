//! Error types for container-env

use thiserror::Error;

/// Errors that can occur while driving the container runtime
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Runtime binary not found
    #[error("Container runtime `{0}` is not installed or not in PATH")]
    RuntimeNotFound(String),

    /// Runtime command exited non-zero
    #[error("`{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Runtime command exceeded its ceiling
    #[error("`{command}` timed out after {timeout_secs} seconds")]
    Timeout { command: String, timeout_secs: u64 },

    /// Malformed request (e.g. empty command)
    #[error("Invalid container command: {0}")]
    InvalidCommand(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ContainerError::CommandFailed {
            command: "docker rm -f x".to_string(),
            exit_code: 1,
            stderr: "No such container: x".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("No such container"));
    }

    #[test]
    fn test_timeout_display() {
        let err = ContainerError::Timeout {
            command: "docker exec c1 apt-get update".to_string(),
            timeout_secs: 5,
        };
        assert_eq!(
            err.to_string(),
            "`docker exec c1 apt-get update` timed out after 5 seconds"
        );
    }
}
