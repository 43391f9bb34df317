//! Command-line adapter for bindguard.
//!
//! The binary has two entry points selected by process role: the normal CLI
//! (`detect`, `verify`) and the verification worker the `verify` supervisor
//! spawns from the same executable.

#![deny(unused_crate_dependencies)]

pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;

// Used by the binary target only
use dotenvy as _;
use tokio as _;
use tracing_subscriber as _;

#[cfg(test)]
use tempfile as _;

pub use commands::{Commands, ExpectedBackend, VerifyArgs};
pub use error::CliError;
pub use parser::Cli;
