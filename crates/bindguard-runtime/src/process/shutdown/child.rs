//! Termination of verification workers we hold a `tokio::process::Child` for.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use tracing::debug;

/// Force-kill a worker and reap it.
///
/// Workers are disposable, so there is no SIGTERM phase: `Child::kill`
/// sends SIGKILL on Unix and calls `TerminateProcess` on Windows. A worker
/// that has already exited is simply reaped.
pub async fn kill_child(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    match child.kill().await {
        Ok(()) => {}
        // Exited between try_wait and kill
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
        Err(e) => return Err(e),
    }
    child.wait().await
}

/// Wait up to `grace` for a worker that was told to exit, then kill it.
pub async fn finish_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    match timeout(grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            debug!(pid = ?child.id(), "Worker ignored exit request, killing");
            kill_child(child).await
        }
    }
}
