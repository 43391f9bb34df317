//! Kill workers by PID when no `Child` handle is at hand.

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(unix)]
fn nix_pid(pid: u32) -> io::Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))
}

/// Send SIGKILL to `pid` without reaping it.
///
/// The owner of the `Child` (or init, for orphans) reaps the process.
/// A PID that is already gone is not an error.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> io::Result<()> {
    match signal::kill(nix_pid(pid)?, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(not(unix))]
pub fn kill_pid(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    // taskkill exits 128 when the process is already gone
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill failed for pid {pid}")))
    }
}

/// Check if a PID exists, using the null signal.
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    let Ok(pid) = nix_pid(pid) else {
        return false;
    };
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // Exists but we lack permission
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn pid_exists(pid: u32) -> bool {
    let filter = format!("PID eq {pid}");
    std::process::Command::new("tasklist")
        .args(["/FI", filter.as_str(), "/NH", "/FO", "CSV"])
        .stderr(std::process::Stdio::null())
        .output()
        .is_ok_and(|output| {
            // CSV rows quote the PID: "worker.exe","1234",...
            String::from_utf8_lossy(&output.stdout).contains(&format!("\"{pid}\""))
        })
}
