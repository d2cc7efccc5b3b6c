//! Remote copy over an `scp -t` sink

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::ExecError;
use crate::result::ConnectionInfo;
use crate::sink::{SinkWriter, base_name};
use crate::ssh::{ChannelOutput, SshConnector, collect_output};

/// Default path to the scp binary, locally and on the remote side
pub const DEFAULT_COPY_HELPER: &str = "/usr/bin/scp";

/// How long to wait for the remote sink's last words after a failed send
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What to copy and how
#[derive(Debug, Clone)]
pub struct CopyRequest {
    /// Local file or directory
    pub source: PathBuf,
    /// Remote destination
    pub destination: PathBuf,
    /// Allow directory sources
    pub recursive: bool,
    /// scp binary checked locally and started remotely
    pub helper: PathBuf,
    /// Echo local errors to stderr
    pub verbose: bool,
}

/// Reject paths that climb out through a `..` component
///
/// # Errors
/// Returns `ExecError::InvalidPath` if any component is `..`
pub fn validate_path(path: &Path) -> Result<(), ExecError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ExecError::InvalidPath(format!(
            "path traversal detected: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Reject sources such as `.` or `/` that have no name to send
///
/// # Errors
/// Returns `ExecError::InvalidPath` if the path has no final component
pub fn validate_source_name(path: &Path) -> Result<(), ExecError> {
    base_name(path).map(drop)
}

/// Check that the copy helper exists and is executable
///
/// # Errors
/// Returns `ExecError::CopyHelper` if the binary is missing or has no execute bit
pub fn validate_helper(path: &Path) -> Result<(), ExecError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ExecError::CopyHelper(format!("{} not found: {e}", path.display())))?;

    if !is_executable(&metadata) {
        return Err(ExecError::CopyHelper(format!(
            "{} is not executable",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &Metadata) -> bool {
    metadata.is_file()
}

/// Directory the remote sink is started in
///
/// A single file lands in the destination's parent; a tree lands in the destination itself.
#[must_use]
pub fn remote_target(source: &Metadata, destination: &Path) -> PathBuf {
    if source.is_file() {
        match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    } else {
        destination.to_path_buf()
    }
}

/// Copy a file or directory tree to one host
///
/// Paths and the helper binary are validated before any connection is made.
/// A failure part way through leaves whatever was already sent on the remote side.
///
/// # Errors
/// Returns the first validation, transport, or transfer error
#[instrument(skip(connector, request), fields(host = %conn_info.host, source = %request.source.display()))]
pub async fn copy_to_host(
    connector: &SshConnector,
    conn_info: &ConnectionInfo,
    request: &CopyRequest,
) -> Result<(), ExecError> {
    validate_path(&request.source)?;
    validate_path(&request.destination)?;
    validate_source_name(&request.source)?;
    validate_helper(&request.helper)?;

    let metadata = tokio::fs::metadata(&request.source).await.map_err(|e| {
        eprintln!("Could not stat source file {}", request.source.display());
        ExecError::io(
            format!("could not stat source file {}", request.source.display()),
            e,
        )
    })?;

    if metadata.is_dir() && !request.recursive {
        eprintln!(
            "Not a regular file: {} specify recursive",
            request.source.display()
        );
        return Err(ExecError::NotRegularFile(
            request.source.display().to_string(),
        ));
    }

    let target = remote_target(&metadata, &request.destination);
    let session = connector.connect(conn_info).await?;

    let command = format!("{} -qrt {}", request.helper.display(), target.display());
    let channel = match session.exec(&command).await {
        Ok(channel) => channel,
        Err(e) => {
            session.disconnect().await.ok();
            return Err(e);
        }
    };

    let writer = channel.make_writer();
    let mut drain = tokio::spawn(collect_output(channel));

    let mut sink = SinkWriter::new(writer).verbose(request.verbose);
    let sent = if metadata.is_dir() {
        sink.send_tree(&request.source).await
    } else {
        sink.send_file(&request.source, &metadata).await
    };
    let sent = match sent {
        Ok(()) => sink.finish().await.map(drop),
        Err(e) => Err(e),
    };

    if let Err(e) = sent {
        session.disconnect().await.ok();
        // a sink that quit early explains the failed write better than the write error does
        let remote = match timeout(DRAIN_GRACE, &mut drain).await {
            Ok(Ok(output)) => sink_failure(&output),
            _ => None,
        };
        drain.abort();
        return Err(remote.unwrap_or(e));
    }

    let output = drain
        .await
        .map_err(|e| ExecError::Session(format!("copy stream reader failed: {e}")));
    session.disconnect().await.ok();
    let output = output?;

    check_sink_exit(&output)?;
    info!(target = %target.display(), "copy finished");
    Ok(())
}

/// The remote sink's own failure, if it exited with a non-zero status
fn sink_failure(output: &ChannelOutput) -> Option<ExecError> {
    let status = output.exit_status.filter(|&status| status != 0)?;
    Some(ExecError::RemoteSink {
        status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// A copy succeeds only when the remote sink reports exit status 0
fn check_sink_exit(output: &ChannelOutput) -> Result<(), ExecError> {
    if !output.stderr.is_empty() {
        debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "remote sink diagnostics");
    }
    if let Some(e) = sink_failure(output) {
        return Err(e);
    }
    if output.exit_status.is_none() {
        return Err(ExecError::Session(
            "remote copy ended without an exit status".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path(Path::new("/etc/motd")).is_ok());
        assert!(validate_path(Path::new("relative/dir")).is_ok());
        assert!(validate_path(Path::new("release..notes")).is_ok());
        assert!(validate_path(Path::new("../etc/passwd")).is_err());
        assert!(validate_path(Path::new("/srv/app/../../etc")).is_err());
    }

    #[test]
    fn test_validate_source_name() {
        assert!(validate_source_name(Path::new("site")).is_ok());
        assert!(validate_source_name(Path::new("/srv/site")).is_ok());
        assert!(matches!(
            validate_source_name(Path::new(".")),
            Err(ExecError::InvalidPath(_))
        ));
        assert!(validate_source_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_sink_exit_status() {
        let ok = ChannelOutput {
            exit_status: Some(0),
            ..Default::default()
        };
        assert!(check_sink_exit(&ok).is_ok());
        assert!(sink_failure(&ok).is_none());

        let missing = ChannelOutput::default();
        assert!(matches!(
            check_sink_exit(&missing),
            Err(ExecError::Session(_))
        ));
        assert!(sink_failure(&missing).is_none());
    }

    #[test]
    fn test_sink_failure_keeps_remote_stderr() {
        let output = ChannelOutput {
            exit_status: Some(1),
            stdout: Vec::new(),
            stderr: b"scp: /srv/site: No such file or directory\n".to_vec(),
        };

        match sink_failure(&output) {
            Some(ExecError::RemoteSink { status, stderr }) => {
                assert_eq!(status, 1);
                assert_eq!(stderr, "scp: /srv/site: No such file or directory");
            }
            other => panic!("expected remote sink failure, got {other:?}"),
        }
        assert!(check_sink_exit(&output).is_err());
    }

    #[test]
    fn test_validate_helper() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("scp");
        std::fs::write(&helper, b"#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            validate_helper(&helper),
            Err(ExecError::CopyHelper(_))
        ));

        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(validate_helper(&helper).is_ok());

        assert!(validate_helper(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_remote_target() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.conf");
        std::fs::write(&file, b"x").unwrap();

        let file_meta = std::fs::metadata(&file).unwrap();
        let dir_meta = std::fs::metadata(dir.path()).unwrap();

        assert_eq!(
            remote_target(&file_meta, Path::new("/etc/app/app.conf")),
            PathBuf::from("/etc/app")
        );
        assert_eq!(
            remote_target(&file_meta, Path::new("app.conf")),
            PathBuf::from(".")
        );
        assert_eq!(
            remote_target(&dir_meta, Path::new("/srv/site")),
            PathBuf::from("/srv/site")
        );
    }
}
