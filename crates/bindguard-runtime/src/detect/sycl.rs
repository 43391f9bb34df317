//! SYCL-class discrete GPU detection.
//!
//! The platform's device listing command is run once and every PCI
//! vendor/device pair in its output is matched against a fixed list of
//! Intel discrete GPUs. Only the device half of a pair is compared.

use std::process::Command;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use bindguard_core::{DiscreteGpu, EnumerationError, HardwareEnumerator, Platform};

/// Intel discrete device ids with their marketing names.
pub const DISCRETE_DEVICE_IDS: &[(u16, &str)] = &[
    (0x56a0, "Intel Arc A770"),
    (0x56a1, "Intel Arc A750"),
    (0x56a2, "Intel Arc A580"),
    (0x5690, "Intel Arc A770M"),
    (0x5691, "Intel Arc A730M"),
    (0x5692, "Intel Arc A550M"),
    (0x5693, "Intel Arc A370M"),
    (0x5694, "Intel Arc A350M"),
    (0x5695, "Intel Arc A200M"),
    (0x56a5, "Intel Arc A380"),
    (0x56a6, "Intel Arc A310"),
    (0x56b0, "Intel Arc Pro A30M"),
    (0x56b1, "Intel Arc Pro A40/A50"),
    (0x56b2, "Intel Arc Pro A60M"),
    (0x56b3, "Intel Arc Pro A60"),
    (0x56c0, "Intel Data Center GPU Flex 170"),
    (0x56c1, "Intel Data Center GPU Flex 140"),
    (0xe20b, "Intel Arc B580"),
    (0xe20c, "Intel Arc B570"),
];

/// Runs the real platform listing command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandEnumerator;

impl CommandEnumerator {
    fn command_for(platform: Platform) -> Option<(&'static str, &'static [&'static str])> {
        match platform {
            Platform::Linux => Some(("lspci", &["-nn"])),
            Platform::Windows => Some((
                "wmic",
                &["path", "win32_VideoController", "get", "PNPDeviceID"],
            )),
            Platform::MacOs | Platform::Other => None,
        }
    }
}

impl HardwareEnumerator for CommandEnumerator {
    fn enumerate(&self, platform: Platform) -> Result<String, EnumerationError> {
        let (program, args) =
            Self::command_for(platform).ok_or(EnumerationError::Unsupported(platform))?;

        let output = Command::new(program).args(args).output().map_err(|e| {
            EnumerationError::CommandFailed {
                command: program.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !output.status.success() {
            return Err(EnumerationError::NonZeroExit {
                command: program.to_string(),
                code: output.status.code(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn id_pattern(platform: Platform) -> Result<Option<Regex>> {
    let pattern = match platform {
        Platform::Linux => r"\[([0-9a-fA-F]{4}):([0-9a-fA-F]{4})\]",
        Platform::Windows => r"VEN_([0-9A-Fa-f]{4})&DEV_([0-9A-Fa-f]{4})",
        Platform::MacOs | Platform::Other => return Ok(None),
    };
    Regex::new(pattern)
        .map(Some)
        .context("Invalid device id pattern")
}

/// Every `(vendor, device)` pair in the enumeration output.
pub fn extract_ids(platform: Platform, listing: &str) -> Result<Vec<(u16, u16)>> {
    let Some(pattern) = id_pattern(platform)? else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::new();
    for captures in pattern.captures_iter(listing) {
        let (_, [vendor, device]) = captures.extract();
        let vendor = u16::from_str_radix(vendor, 16)
            .with_context(|| format!("Invalid vendor id {vendor}"))?;
        let device = u16::from_str_radix(device, 16)
            .with_context(|| format!("Invalid device id {device}"))?;
        ids.push((vendor, device));
    }
    Ok(ids)
}

/// Marketing name for an allow-listed device id.
pub fn discrete_name(device_id: u16) -> Option<&'static str> {
    DISCRETE_DEVICE_IDS
        .iter()
        .find(|(id, _)| *id == device_id)
        .map(|(_, name)| *name)
}

/// Allow-listed discrete GPUs reported by `enumerator`.
pub fn discrete_gpus(
    enumerator: &dyn HardwareEnumerator,
    platform: Platform,
) -> Result<Vec<DiscreteGpu>> {
    let listing = enumerator.enumerate(platform)?;

    let gpus: Vec<DiscreteGpu> = extract_ids(platform, &listing)?
        .into_iter()
        .filter_map(|(vendor_id, device_id)| {
            discrete_name(device_id).map(|name| DiscreteGpu {
                vendor_id,
                device_id,
                name: name.to_string(),
            })
        })
        .collect();

    debug!(count = gpus.len(), "Discrete GPU scan complete");
    Ok(gpus)
}
