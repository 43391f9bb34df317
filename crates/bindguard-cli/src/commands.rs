//! Subcommand definitions.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Subcommand};

use bindguard_core::{BackendKind, ParseBackendError};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report which GPU compute layers look usable on this machine
    Detect {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a native binding binary in an isolated worker process
    Verify(VerifyArgs),

    /// Worker entry point, spawned by `verify`
    #[command(name = "__verify-worker", hide = true)]
    VerifyWorker,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Path to the binding binary
    pub binary: PathBuf,

    /// Backend the binary must report (cuda, vulkan, metal, sycl or none)
    #[arg(long)]
    pub backend: ExpectedBackend,

    /// Override the verification deadline in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Backend a binary is expected to report; `None` means CPU only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedBackend(pub Option<BackendKind>);

impl FromStr for ExpectedBackend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::parse_expected(s).map(Self)
    }
}
