//! Remote command execution

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::{CommandResult, ConnectionInfo};
use crate::ssh::{SshConnector, collect_output};

/// Run one command on one host and capture its stdout
///
/// `command_timeout` bounds the command itself; connection setup is bounded by the connector.
/// A non-zero exit status is returned as `ExecError::CommandFailed`, which keeps the
/// stdout collected so far.
///
/// # Errors
/// Returns the first failure of dial, authentication, session setup, or the command itself
#[instrument(skip(connector, cmd), fields(host = %conn_info.host))]
pub async fn run_command(
    connector: &SshConnector,
    conn_info: &ConnectionInfo,
    cmd: &str,
    command_timeout: Option<Duration>,
) -> Result<CommandResult, ExecError> {
    let session = connector.connect(conn_info).await?;

    let start = Instant::now();
    let exec = async {
        let channel = session.exec(cmd).await?;
        Ok::<_, ExecError>(collect_output(channel).await)
    };

    let output = match command_timeout {
        Some(limit) => match timeout(limit, exec).await {
            Ok(result) => result,
            Err(_) => {
                error!(command = %cmd, timeout = ?limit, "command timed out");
                Err(ExecError::Timeout { timeout: limit })
            }
        },
        None => exec.await,
    };

    if let Err(e) = session.disconnect().await {
        debug!(error = %e, "disconnect failed");
    }

    let output = output?;
    let duration = start.elapsed();

    let result = CommandResult {
        status: output.exit_status.map_or(-1, |s| s.cast_signed()),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    debug!(
        command = %cmd,
        status = result.status,
        duration = ?duration,
        "remote command completed"
    );
    if !result.stderr.is_empty() {
        debug!(stderr = %result.stderr, "remote stderr");
    }

    if result.success() {
        Ok(result)
    } else {
        Err(ExecError::CommandFailed {
            status: result.status,
            stdout: result.stdout,
        })
    }
}
