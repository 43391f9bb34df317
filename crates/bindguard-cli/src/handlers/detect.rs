//! Detect command handler.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use bindguard_core::{BackendKind, CapabilityMap, DiscreteGpu, Platform};
use bindguard_runtime::ComputeLayerDetector;

/// Everything `detect` reports.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    pub platform: Platform,
    pub capabilities: CapabilityMap,
    pub plausible_backends: Vec<BackendKind>,
    pub discrete_gpus: Vec<DiscreteGpu>,
    pub cuda_install_paths: Vec<PathBuf>,
}

impl DetectionReport {
    pub fn collect(detector: &ComputeLayerDetector, platform: Platform) -> Self {
        let capabilities = detector.detect(platform);
        Self {
            platform,
            plausible_backends: capabilities.plausible_backends(),
            capabilities,
            discrete_gpus: detector.discrete_gpus(platform),
            cuda_install_paths: detector.cuda_install_paths(platform),
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Plain-text rendering.
pub fn render(report: &DetectionReport) -> String {
    let caps = &report.capabilities;
    let mut out = String::new();

    let _ = writeln!(out, "Platform: {}", report.platform);
    let _ = writeln!(
        out,
        "CUDA:     {} (driver: {}, runtime: {})",
        yes_no(caps.cuda.is_usable()),
        yes_no(caps.cuda.has_driver),
        yes_no(caps.cuda.has_runtime)
    );
    let _ = writeln!(out, "Vulkan:   {}", yes_no(caps.vulkan));
    let _ = writeln!(out, "Metal:    {}", yes_no(caps.metal));
    let _ = writeln!(out, "SYCL:     {}", yes_no(caps.sycl));

    if report.plausible_backends.is_empty() {
        let _ = writeln!(out, "\nNo GPU backend detected, CPU only.");
    } else {
        let names: Vec<_> = report
            .plausible_backends
            .iter()
            .map(|kind| kind.display_name())
            .collect();
        let _ = writeln!(out, "\nPlausible backends: {}", names.join(", "));
    }

    if !report.discrete_gpus.is_empty() {
        let _ = writeln!(out, "\nDiscrete GPUs:");
        for gpu in &report.discrete_gpus {
            let _ = writeln!(
                out,
                "  {} [{:04x}:{:04x}]",
                gpu.name, gpu.vendor_id, gpu.device_id
            );
        }
    }

    if !report.cuda_install_paths.is_empty() {
        let _ = writeln!(out, "\nCUDA installations:");
        for path in &report.cuda_install_paths {
            let _ = writeln!(out, "  {}", path.display());
        }
    }

    out
}

/// Execute the detect command.
pub fn execute(detector: &ComputeLayerDetector, platform: Platform, json: bool) -> Result<()> {
    let report = DetectionReport::collect(detector, platform);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}
