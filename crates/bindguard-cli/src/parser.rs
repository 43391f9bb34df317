//! Root CLI parser and global options.

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for probing compute layers and verifying native
/// binding binaries.
#[derive(Parser, Debug)]
#[command(name = "bindguard")]
#[command(about = "Detect GPU compute layers and verify native binding binaries")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
