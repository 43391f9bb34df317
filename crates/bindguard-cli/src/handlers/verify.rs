//! Verify command handler.

use std::fmt::Write as _;

use anyhow::Result;
use tracing::debug;

use bindguard_core::{VerificationRequest, VerifierSettings};
use bindguard_runtime::{BindingVerifier, VerificationReport};

use crate::commands::VerifyArgs;
use crate::error::CliError;

/// Build the request from arguments, falling back to the configured timeout.
pub fn build_request(settings: &VerifierSettings, args: &VerifyArgs) -> VerificationRequest {
    let timeout = args
        .timeout_ms
        .map_or_else(|| settings.default_timeout(), std::time::Duration::from_millis);
    VerificationRequest::new(&args.binary, args.backend.0).with_timeout(timeout)
}

/// Plain-text rendering.
pub fn render(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Result:     {}", report.result);
    if let Some(pid) = report.worker_pid {
        let _ = writeln!(out, "Worker pid: {pid}");
    }
    let _ = writeln!(out, "Last state: {}", report.last_state);
    let _ = writeln!(out, "Elapsed:    {} ms", report.elapsed.as_millis());

    if !report.result.is_passed() && !report.stderr_tail.is_empty() {
        let _ = writeln!(out, "\nWorker stderr:");
        for line in &report.stderr_tail {
            let _ = writeln!(out, "  {line}");
        }
    }
    out
}

/// Execute the verify command.
///
/// Fails with [`CliError::NotVerified`] unless the binary passed.
pub async fn execute(settings: VerifierSettings, args: &VerifyArgs) -> Result<()> {
    let request = build_request(&settings, args);
    debug!(binary = %request.binary_path().display(), timeout = ?request.timeout(), "Verifying");

    let report = BindingVerifier::new(settings)
        .verify_detailed(&request)
        .await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(CliError::from)?
        );
    } else {
        print!("{}", render(&report));
    }

    if report.result.is_passed() {
        Ok(())
    } else {
        Err(CliError::NotVerified(report.result).into())
    }
}
