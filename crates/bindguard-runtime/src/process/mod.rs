//! Worker process termination.
//!
//! Two strategies:
//! - `finish_child` / `kill_child`: for workers we still hold a `Child` handle to (includes reaping)
//! - `kill_pid`: for workers known only by PID, used by the host-exit hook (no reaping)

mod shutdown;

pub use shutdown::{finish_child, kill_child, kill_pid, pid_exists};
