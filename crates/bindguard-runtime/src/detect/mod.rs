//! Compute layer detection.
//!
//! Answers "which GPU backends plausibly work on this machine?" without ever
//! loading a GPU library. Probes only look for files in well-known folders and
//! run one hardware listing command. Each probe is isolated: an error or a
//! panic in one leaves its entry `false` and does not affect the others.

mod cuda;
mod layout;
mod path_probe;
mod sycl;
mod version;
mod vulkan;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use bindguard_core::{CapabilityMap, CudaCapability, DiscreteGpu, HardwareEnumerator, Platform};

pub use layout::{DetectorEnv, InstallParent, LibraryNames, SearchLayout};
pub use path_probe::PathProbe;
pub use sycl::{CommandEnumerator, DISCRETE_DEVICE_IDS, discrete_name, extract_ids};
pub use version::{VersionKey, compare_descending, rank_by_version};

/// Detects which compute layers are plausibly available.
#[derive(Clone)]
pub struct ComputeLayerDetector {
    env: DetectorEnv,
    layout: Option<SearchLayout>,
    enumerator: Arc<dyn HardwareEnumerator>,
}

impl Default for ComputeLayerDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ComputeLayerDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeLayerDetector")
            .field("env", &self.env)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl ComputeLayerDetector {
    /// Detector reading the current process environment and running real
    /// enumeration commands.
    pub fn new() -> Self {
        Self {
            env: DetectorEnv::from_process(),
            layout: None,
            enumerator: Arc::new(CommandEnumerator),
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: DetectorEnv) -> Self {
        self.env = env;
        self
    }

    /// Replace the platform's standard directory layout.
    #[must_use]
    pub fn with_layout(mut self, layout: SearchLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    #[must_use]
    pub fn with_enumerator(mut self, enumerator: Arc<dyn HardwareEnumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    fn layout_for(&self, platform: Platform) -> SearchLayout {
        self.layout
            .clone()
            .unwrap_or_else(|| SearchLayout::for_platform(platform, &self.env))
    }

    /// Probe every backend for `platform`. Never fails.
    pub fn detect(&self, platform: Platform) -> CapabilityMap {
        let layout = self.layout_for(platform);
        let names = LibraryNames::for_platform(platform);
        let probe = PathProbe::new(layout.default_dirs.clone());

        let cuda_supported = platform != Platform::MacOs;
        let cuda = CudaCapability {
            has_driver: cuda_supported
                && guarded("cuda driver", || {
                    Ok(cuda::has_driver(&probe, &layout, &names))
                }),
            has_runtime: cuda_supported
                && guarded("cuda runtime", || Ok(cuda::has_runtime(&layout, &names))),
        };

        let map = CapabilityMap {
            cuda,
            vulkan: guarded("vulkan", || Ok(vulkan::has_loader(&probe, &layout, &names))),
            metal: platform == Platform::MacOs,
            sycl: guarded("sycl", || {
                Ok(!sycl::discrete_gpus(self.enumerator.as_ref(), platform)?.is_empty())
            }),
        };

        debug!(%platform, ?map, "Compute layer detection complete");
        map
    }

    /// Allow-listed discrete GPUs. Empty when enumeration fails.
    pub fn discrete_gpus(&self, platform: Platform) -> Vec<DiscreteGpu> {
        guarded_or_default("discrete gpus", || {
            sycl::discrete_gpus(self.enumerator.as_ref(), platform)
        })
    }

    /// Ranked CUDA installation roots, `CUDA_PATH` first.
    pub fn cuda_install_paths(&self, platform: Platform) -> Vec<PathBuf> {
        let layout = self.layout_for(platform);
        guarded_or_default("cuda install paths", || Ok(cuda::install_paths(&layout)))
    }
}

/// Run one probe, turning errors and panics into `false`.
fn guarded(name: &str, probe: impl FnOnce() -> anyhow::Result<bool>) -> bool {
    guarded_or_default(name, probe)
}

fn guarded_or_default<T: Default>(name: &str, probe: impl FnOnce() -> anyhow::Result<T>) -> T {
    match catch_unwind(AssertUnwindSafe(probe)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            debug!(probe = name, error = %e, "Probe failed");
            T::default()
        }
        Err(_) => {
            debug!(probe = name, "Probe panicked");
            T::default()
        }
    }
}
