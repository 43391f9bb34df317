//! CLI error types and exit code mapping.

use bindguard_core::{SettingsError, VerificationResult};
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument error not caught by clap.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// Environment configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while writing output.
    #[error("IO error: {0}")]
    Io(String),

    /// Verification completed with an outcome other than `passed`.
    #[error("Verification {0}")]
    NotVerified(VerificationResult),
}

impl CliError {
    /// Map error to an exit code.
    ///
    /// A binary that did not verify exits 1 so scripts can branch on it;
    /// the remaining codes follow sysexits.h.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::NotVerified(_) => 1,
            Self::Arguments(_) => 2, // EX_USAGE
            Self::Io(_) => 74,       // EX_IOERR
            Self::Config(_) => 78,   // EX_CONFIG
        }
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("failed to encode JSON: {err}"))
    }
}
