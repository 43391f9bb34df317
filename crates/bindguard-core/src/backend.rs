//! Backend kinds and platform families.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GPU compute technology a candidate binary may be built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// NVIDIA CUDA
    Cuda,
    /// Vulkan compute
    Vulkan,
    /// Apple Metal
    Metal,
    /// SYCL on Intel discrete GPUs
    Sycl,
}

impl BackendKind {
    /// Every backend kind, in preference order.
    pub const ALL: [Self; 4] = [Self::Metal, Self::Cuda, Self::Vulkan, Self::Sycl];

    /// Identifier reported by native bindings for this backend.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Vulkan => "vulkan",
            Self::Metal => "metal",
            Self::Sycl => "sycl",
        }
    }

    /// Human-readable name.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Cuda => "CUDA",
            Self::Vulkan => "Vulkan",
            Self::Metal => "Metal",
            Self::Sycl => "SYCL",
        }
    }

    /// Parse an expected backend where `none`, `cpu` and `false` select the
    /// "no backend" sentinel.
    pub fn parse_expected(value: &str) -> Result<Option<Self>, ParseBackendError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "cpu" | "false" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown backend identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown backend kind: {0} (expected cuda, vulkan, metal, sycl or none)")]
pub struct ParseBackendError(pub String);

impl FromStr for BackendKind {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "vulkan" => Ok(Self::Vulkan),
            "metal" => Ok(Self::Metal),
            "sycl" => Ok(Self::Sycl),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

/// Operating system family used to pick probe locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    /// Anything else; every probe reports unsupported.
    Other,
}

impl Platform {
    /// Platform this process was compiled for.
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}
