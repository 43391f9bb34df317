//! Verification request and result types.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Backend initialization can be slow, so the default deadline is long.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A request to verify one candidate binary for one backend.
///
/// Fields are private; build the request fully before submitting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    binary_path: PathBuf,
    backend_kind: Option<BackendKind>,
    timeout: Duration,
}

impl VerificationRequest {
    /// Create a request with the default timeout.
    ///
    /// `backend_kind` of `None` means the binary is expected to run with no
    /// GPU backend at all.
    pub fn new(binary_path: impl Into<PathBuf>, backend_kind: Option<BackendKind>) -> Self {
        Self {
            binary_path: binary_path.into(),
            backend_kind,
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_timeout_millis(self, millis: u64) -> Self {
        self.with_timeout(Duration::from_millis(millis))
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub const fn backend_kind(&self) -> Option<BackendKind> {
        self.backend_kind
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Classified outcome of one verification. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum VerificationResult {
    /// The worker loaded the binary and completed the functional test.
    Passed,
    /// The worker is alive but the binary is unusable (wrong backend, init failure).
    Failed(String),
    /// The deadline elapsed before the handshake completed.
    TimedOut,
    /// The worker could not start, or exited before finishing the handshake.
    /// `None` when no exit code is available (spawn failure, killed by signal).
    Crashed(Option<i32>),
}

impl VerificationResult {
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Crashed(Some(code)) => write!(f, "crashed (exit code {code})"),
            Self::Crashed(None) => write!(f, "crashed"),
        }
    }
}
