//! Native binding port.
//!
//! The acceleration engine is opaque to bindguard. A candidate binary is only
//! ever touched through this trait, and only inside a verification worker
//! process.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors reported by a native binding.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The shared library could not be opened.
    #[error("Failed to load {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    /// A required exported function is absent.
    #[error("Required function not exported: {0}")]
    MissingSymbol(String),

    /// A native call returned a nonzero status.
    #[error("{function} returned status {code}")]
    CallFailed { function: &'static str, code: i32 },

    /// A native call returned a string that is not valid UTF-8.
    #[error("{function} returned an invalid string")]
    InvalidString { function: &'static str },

    /// The blocking initialization task was lost.
    #[error("Initialization task aborted: {0}")]
    TaskAborted(String),
}

/// Device memory figures reported by the binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Log verbosity levels understood by native bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVerbosity {
    Disabled,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogVerbosity {
    /// Integer level passed across the C ABI.
    pub const fn as_level(self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Error => 1,
            Self::Warn => 2,
            Self::Info => 3,
            Self::Debug => 4,
        }
    }
}

/// Capability functions exported by a loaded candidate binary.
///
/// Every method maps to one native function. Implementations must never be
/// used in a process whose survival matters.
#[async_trait]
pub trait NativeBinding: Send + Sync {
    /// Check that every required function is exported.
    fn check_symbols(&self) -> Result<(), BindingError>;

    /// Discover backend plugins, optionally inside `directory_hint`.
    fn load_backends(&self, directory_hint: Option<PathBuf>) -> Result<(), BindingError>;

    /// Identifier of the active backend, `None` when there is none.
    fn backend_kind(&self) -> Result<Option<String>, BindingError>;

    /// Functional initialization. May block for a long time.
    async fn initialize(&self) -> Result<(), BindingError>;

    fn memory_info(&self) -> Result<MemoryInfo, BindingError>;

    fn device_names(&self) -> Result<Vec<String>, BindingError>;

    /// Fails when the active device is not supported by the binary.
    fn assert_device_supported(&self) -> Result<(), BindingError>;

    fn set_log_verbosity(&self, level: LogVerbosity) -> Result<(), BindingError>;
}

/// Opens candidate binaries.
pub trait BindingLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeBinding>, BindingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-memory binding.
    struct StaticBinding {
        backend: Option<&'static str>,
    }

    #[async_trait]
    impl NativeBinding for StaticBinding {
        fn check_symbols(&self) -> Result<(), BindingError> {
            Ok(())
        }

        fn load_backends(&self, _directory_hint: Option<PathBuf>) -> Result<(), BindingError> {
            Ok(())
        }

        fn backend_kind(&self) -> Result<Option<String>, BindingError> {
            Ok(self.backend.map(str::to_string))
        }

        async fn initialize(&self) -> Result<(), BindingError> {
            Ok(())
        }

        fn memory_info(&self) -> Result<MemoryInfo, BindingError> {
            Ok(MemoryInfo {
                total_bytes: 8 << 30,
                used_bytes: 1 << 30,
            })
        }

        fn device_names(&self) -> Result<Vec<String>, BindingError> {
            Ok(vec!["Test Device".to_string()])
        }

        fn assert_device_supported(&self) -> Result<(), BindingError> {
            Ok(())
        }

        fn set_log_verbosity(&self, _level: LogVerbosity) -> Result<(), BindingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_binding_is_object_safe() {
        let binding: Box<dyn NativeBinding> = Box::new(StaticBinding {
            backend: Some("metal"),
        });

        binding.initialize().await.unwrap();
        assert_eq!(binding.backend_kind().unwrap().as_deref(), Some("metal"));
        assert_eq!(binding.memory_info().unwrap().used_bytes, 1 << 30);
    }

    #[test]
    fn test_log_levels_are_ordered() {
        assert!(LogVerbosity::Error.as_level() < LogVerbosity::Debug.as_level());
        assert_eq!(LogVerbosity::Disabled.as_level(), 0);
    }

    #[test]
    fn test_binding_error_display() {
        let err = BindingError::CallFailed {
            function: "bindguard_initialize",
            code: -2,
        };
        assert_eq!(err.to_string(), "bindguard_initialize returned status -2");
    }
}
