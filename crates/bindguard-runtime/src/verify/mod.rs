//! Binding verification supervisor.

mod registry;
mod state;
mod supervisor;

pub use registry::{WorkerGuard, WorkerRegistry, get_worker_registry, terminate_all_workers};
pub use state::{SupervisorEvent, SupervisorState, advance};
pub use supervisor::{BindingVerifier, VerificationReport, WORKER_ARG, WorkerCommand};
