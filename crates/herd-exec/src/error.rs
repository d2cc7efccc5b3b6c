//! Error types for herd-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while operating on one remote host
#[derive(Error, Debug)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Remote host key was not trusted
    #[error("host key rejected: {0}")]
    HostKeyRejected(String),

    /// Channel or session setup failed
    #[error("session error: {0}")]
    Session(String),

    /// Remote command exited unsuccessfully
    #[error("command exited with status {status}")]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// stdout captured before the failure
        stdout: String,
    },

    /// Operation timed out
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Source or destination path rejected
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Local copy helper missing or not executable
    #[error("copy helper unusable: {0}")]
    CopyHelper(String),

    /// Directory given without the recursive flag
    #[error("not a regular file: {0} (specify recursive)")]
    NotRegularFile(String),

    /// Local I/O error during transfer
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// File shrank while being sent
    #[error("short read from {path}: expected {expected} bytes, got {actual}")]
    ShortRead {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Remote sink reported failure
    #[error("remote copy exited with status {status}: {stderr}")]
    RemoteSink {
        /// Exit status of the remote sink
        status: u32,
        /// Diagnostics the sink wrote to stderr
        stderr: String,
    },
}

impl ExecError {
    /// Wrap an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::Io {
            context: context.into(),
            source,
        }
    }

    /// Output the host produced before failing, if any
    #[must_use]
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ExecError::CommandFailed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}
