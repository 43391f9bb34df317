//! Hardware enumeration port.
//!
//! The detector needs the raw output of one OS-specific device listing
//! command. Implementations live in the runtime crate; tests substitute
//! canned output.

use thiserror::Error;

use crate::backend::Platform;

/// Errors that can occur while enumerating hardware.
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// No enumeration command exists for this platform.
    #[error("Hardware enumeration is not available on {0}")]
    Unsupported(Platform),

    /// The command could not be started.
    #[error("Failed to run {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    /// The command ran but reported failure.
    #[error("{command} exited with status {code:?}")]
    NonZeroExit { command: String, code: Option<i32> },
}

/// Port for listing PCI display devices.
pub trait HardwareEnumerator: Send + Sync {
    /// Return the raw stdout of the platform's device listing command.
    fn enumerate(&self, platform: Platform) -> Result<String, EnumerationError>;
}
