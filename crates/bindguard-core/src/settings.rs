//! Verifier settings and validation.
//!
//! Pure configuration types; the CLI loads `.env` before calling
//! [`VerifierSettings::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default verification deadline in milliseconds (five minutes).
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 300_000;

/// How long a worker gets to exit on its own after `Exit`.
pub const DEFAULT_EXIT_GRACE_MS: u64 = 2_000;

/// Environment variable overriding the verification deadline.
pub const TIMEOUT_ENV: &str = "BINDGUARD_VERIFY_TIMEOUT_MS";

/// Environment variable controlling the optimistic pass.
pub const OPTIMISTIC_PASS_ENV: &str = "BINDGUARD_OPTIMISTIC_PASS";

/// Settings for the binding verification supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierSettings {
    /// Deadline used when a request does not carry its own.
    pub default_timeout_ms: u64,

    /// Report `Passed` when the worker executable cannot be resolved.
    ///
    /// This weakens the safety guarantee; deployments that must never load
    /// an unverified binary should turn it off.
    pub optimistic_when_unverifiable: bool,

    /// Grace period for the worker to exit after `Exit` before it is killed.
    pub exit_grace_ms: u64,
}

impl VerifierSettings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            default_timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
            optimistic_when_unverifiable: true,
            exit_grace_ms: DEFAULT_EXIT_GRACE_MS,
        }
    }

    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = Self::with_defaults();

        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::InvalidNumber {
                    key: TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
            debug!(timeout_ms = millis, "Verification timeout overridden from environment");
            settings.default_timeout_ms = millis;
        }

        if let Some(raw) = lookup(OPTIMISTIC_PASS_ENV) {
            settings.optimistic_when_unverifiable = parse_bool(&raw).ok_or_else(|| {
                SettingsError::InvalidBool {
                    key: OPTIMISTIC_PASS_ENV,
                    value: raw.clone(),
                }
            })?;
        }

        validate_settings(&settings)?;
        Ok(settings)
    }

    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub const fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Verification timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{key} must be a whole number of milliseconds, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be true or false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },
}

/// Validate settings values.
pub fn validate_settings(settings: &VerifierSettings) -> Result<(), SettingsError> {
    if settings.default_timeout_ms == 0 {
        return Err(SettingsError::ZeroTimeout);
    }
    Ok(())
}
