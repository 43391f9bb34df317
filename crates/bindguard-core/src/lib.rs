//! Core domain types and port definitions for bindguard.
//!
//! This crate is pure: it owns the capability model, the verification
//! request/result types, the worker wire protocol and the traits that the
//! runtime crate implements. It performs no probing and spawns no processes.

#![deny(unused_crate_dependencies)]

pub mod backend;
pub mod capabilities;
pub mod ports;
pub mod protocol;
pub mod role;
pub mod settings;
pub mod verification;

// Silence unused dev-dependency warnings for crates only used by some tests
#[cfg(test)]
use tokio as _;

// Re-export commonly used types for convenience
pub use backend::{BackendKind, ParseBackendError, Platform};
pub use capabilities::{CapabilityMap, CudaCapability, DiscreteGpu};
pub use ports::{
    BindingError, BindingLoader, EnumerationError, HardwareEnumerator, LogVerbosity, MemoryInfo,
    NativeBinding,
};
pub use protocol::{FailureStage, ProtocolError, SupervisorMessage, WorkerMessage};
pub use role::{ProcessRole, WORKER_ROLE_ENV};
pub use settings::{SettingsError, VerifierSettings};
pub use verification::{DEFAULT_VERIFY_TIMEOUT, VerificationRequest, VerificationResult};
