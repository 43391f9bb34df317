//! Registry of live verification workers.
//!
//! Every spawned worker registers its PID for as long as the supervisor owns
//! it, so the host can kill stragglers on exit.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::process::kill_pid;

/// Global worker registry
static WORKER_REGISTRY: LazyLock<Arc<WorkerRegistry>> =
    LazyLock::new(|| Arc::new(WorkerRegistry::new()));

/// Get the global worker registry
pub fn get_worker_registry() -> Arc<WorkerRegistry> {
    WORKER_REGISTRY.clone()
}

/// Kill every worker still registered in the global registry.
///
/// Host-exit hook: call it before the process exits (for example on
/// Ctrl-C). Returns how many workers were signalled.
pub fn terminate_all_workers() -> usize {
    WORKER_REGISTRY.terminate_all()
}

/// Set of live worker PIDs.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    pids: Mutex<HashSet<u32>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn pids(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.pids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `pid` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, pid: u32) -> WorkerGuard {
        self.pids().insert(pid);
        debug!(pid, "Worker registered");
        WorkerGuard {
            registry: Arc::clone(self),
            pid,
        }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids().contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids().is_empty()
    }

    /// Kill every registered worker.
    pub fn terminate_all(&self) -> usize {
        let pids: Vec<u32> = self.pids().drain().collect();
        for pid in &pids {
            match kill_pid(*pid) {
                Ok(()) => debug!(pid, "Worker killed on host exit"),
                Err(e) => warn!(pid, error = %e, "Failed to kill worker on host exit"),
            }
        }
        pids.len()
    }

    fn unregister(&self, pid: u32) {
        self.pids().remove(&pid);
    }
}

/// Removes its PID from the registry when dropped.
#[derive(Debug)]
pub struct WorkerGuard {
    registry: Arc<WorkerRegistry>,
    pid: u32,
}

impl WorkerGuard {
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
    }
}
