//! Process role selection.
//!
//! The same executable runs either as a normal host or as a verification
//! worker. The supervisor sets [`WORKER_ROLE_ENV`] on the child it spawns;
//! `main` reads it exactly once and dispatches.

use std::ffi::OsStr;

/// Environment flag marking a process as a verification worker.
pub const WORKER_ROLE_ENV: &str = "BINDGUARD_VERIFY_WORKER";

/// Which entry point this process should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Normal execution.
    Default,
    /// Isolated child driven by a verification supervisor.
    VerificationWorker,
}

impl ProcessRole {
    /// Read the role flag from the process environment.
    pub fn from_env() -> Self {
        Self::from_flag(std::env::var_os(WORKER_ROLE_ENV).as_deref())
    }

    /// Interpret a raw flag value. Absence means the default role.
    pub fn from_flag(value: Option<&OsStr>) -> Self {
        match value.and_then(OsStr::to_str).map(str::trim) {
            Some("1" | "true" | "yes") => Self::VerificationWorker,
            _ => Self::Default,
        }
    }

    pub const fn is_worker(self) -> bool {
        matches!(self, Self::VerificationWorker)
    }
}
