use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use bindguard_cli::{Cli, CliError, Commands, handlers};
use bindguard_core::{Platform, ProcessRole, VerifierSettings};
use bindguard_runtime::{
    ComputeLayerDetector, LibraryLoader, VerificationWorker, install_panic_exit_hook,
    terminate_all_workers,
};

/// Exit code when the worker cannot build its runtime.
const WORKER_SETUP_FAILURE: i32 = 1;
/// Conventional exit code after SIGINT.
const INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    if ProcessRole::from_env().is_worker() {
        run_worker();
    }

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            // The verify handler already printed the outcome.
            if !matches!(e.downcast_ref::<CliError>(), Some(CliError::NotVerified(_))) {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Detect { json } => {
            handlers::detect::execute(&ComputeLayerDetector::new(), Platform::current(), json)
        }
        Commands::Verify(args) => {
            let settings = VerifierSettings::from_env().map_err(CliError::from)?;
            tokio::spawn(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let killed = terminate_all_workers();
                    warn!(killed, "Interrupted, terminated verification workers");
                    std::process::exit(INTERRUPTED);
                }
            });
            handlers::verify::execute(settings, &args).await
        }
        Commands::VerifyWorker => Err(CliError::Arguments(
            "__verify-worker is started by `bindguard verify`, not directly".to_string(),
        )
        .into()),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Worker role: stdout carries the protocol, so logs go to stderr where the
/// supervisor collects them.
fn run_worker() -> ! {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    install_panic_exit_hook();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Worker failed to start async runtime");
            std::process::exit(WORKER_SETUP_FAILURE);
        }
    };

    let worker = VerificationWorker::new(Arc::new(LibraryLoader));
    let code = runtime.block_on(worker.run_stdio());
    std::process::exit(code);
}
