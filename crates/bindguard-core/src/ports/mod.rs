//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core domain expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `libloading` or `std::process` types in any signature
//! - The native binding port mirrors the capability functions a candidate
//!   binary exports, one method per function
//! - Hardware enumeration returns raw command output; parsing lives in the runtime

pub mod binding;
pub mod hardware;

pub use binding::{BindingError, BindingLoader, LogVerbosity, MemoryInfo, NativeBinding};
pub use hardware::{EnumerationError, HardwareEnumerator};
