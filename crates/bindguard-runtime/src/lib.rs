//! Runtime side of bindguard.
//!
//! - [`detect`]: compute layer detection from files and one hardware listing
//! - [`verify`]: the supervisor that verifies a binary in a worker process
//! - [`worker`]: the code that runs inside that worker process
//! - [`binding`]: the `libloading` adapter for the native binding ABI
//!
//! Only `binding` contains `unsafe` code.

#![deny(unsafe_code)]

pub mod binding;
pub mod detect;
pub mod process;
pub mod verify;
pub mod worker;

pub use binding::{LibraryBinding, LibraryLoader};
pub use detect::{CommandEnumerator, ComputeLayerDetector, DetectorEnv, SearchLayout};
pub use verify::{
    BindingVerifier, SupervisorState, VerificationReport, WorkerCommand, WorkerRegistry,
    terminate_all_workers,
};
pub use worker::{VerificationWorker, install_panic_exit_hook};
