//! Capability map produced by compute layer detection.
//!
//! Every field defaults to the conservative "unsupported" value so a probe
//! that fails can simply leave its entry untouched.

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// CUDA needs both a driver and a runtime to be usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CudaCapability {
    /// The NVIDIA driver management library was found.
    pub has_driver: bool,
    /// cudart, cuBLAS and cuBLASLt were all found under an installation path.
    pub has_runtime: bool,
}

impl CudaCapability {
    pub const fn is_usable(&self) -> bool {
        self.has_driver && self.has_runtime
    }
}

/// Per-backend plausibility of local support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMap {
    pub cuda: CudaCapability,
    pub vulkan: bool,
    pub metal: bool,
    pub sycl: bool,
}

impl CapabilityMap {
    /// Map with every backend unsupported.
    pub const fn unsupported() -> Self {
        Self {
            cuda: CudaCapability {
                has_driver: false,
                has_runtime: false,
            },
            vulkan: false,
            metal: false,
            sycl: false,
        }
    }

    /// Whether `kind` looks usable on this machine.
    pub const fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Cuda => self.cuda.is_usable(),
            BackendKind::Vulkan => self.vulkan,
            BackendKind::Metal => self.metal,
            BackendKind::Sycl => self.sycl,
        }
    }

    /// Backends worth verifying, most preferred first.
    pub fn plausible_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}

/// A discrete GPU matched against the known device allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteGpu {
    pub vendor_id: u16,
    pub device_id: u16,
    /// Marketing name from the allow-list.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_matches_default() {
        assert_eq!(CapabilityMap::unsupported(), CapabilityMap::default());
        assert!(CapabilityMap::unsupported().plausible_backends().is_empty());
    }

    #[test]
    fn test_cuda_requires_driver_and_runtime() {
        let driver_only = CudaCapability {
            has_driver: true,
            has_runtime: false,
        };
        assert!(!driver_only.is_usable());

        let both = CudaCapability {
            has_driver: true,
            has_runtime: true,
        };
        assert!(both.is_usable());
    }

    #[test]
    fn test_plausible_backends_preference_order() {
        let map = CapabilityMap {
            cuda: CudaCapability {
                has_driver: true,
                has_runtime: true,
            },
            vulkan: true,
            metal: false,
            sycl: true,
        };

        assert_eq!(
            map.plausible_backends(),
            vec![BackendKind::Cuda, BackendKind::Vulkan, BackendKind::Sycl]
        );
    }

    #[test]
    fn test_capability_map_serializes_nested_cuda_record() {
        let json = serde_json::to_value(CapabilityMap::unsupported()).unwrap();
        assert_eq!(json["cuda"]["has_driver"], false);
        assert_eq!(json["vulkan"], false);
    }
}
