//! Where each platform keeps GPU runtimes, and what their libraries are called.

use std::collections::HashMap;
use std::path::PathBuf;

use bindguard_core::Platform;

/// Environment variables the detector reads.
const CAPTURED_VARS: &[&str] = &[
    "CUDA_PATH",
    "PREFIX",
    "SystemRoot",
    "ProgramFiles",
    "ProgramFiles(x86)",
    "PATH",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
];

/// Snapshot of the environment variables relevant to detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorEnv {
    vars: HashMap<String, String>,
}

impl DetectorEnv {
    /// Capture the relevant variables from the current process.
    pub fn from_process() -> Self {
        let vars = CAPTURED_VARS
            .iter()
            .filter_map(|key| {
                std::env::var(key)
                    .ok()
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| ((*key).to_string(), value))
            })
            .collect();
        Self { vars }
    }

    #[must_use]
    pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn split_paths(&self, key: &str, platform: Platform) -> Vec<PathBuf> {
        let separator = if platform == Platform::Windows { ';' } else { ':' };
        self.get(key)
            .map(|value| {
                value
                    .split(separator)
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A folder scanned for versioned CUDA installations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallParent {
    pub dir: PathBuf,
    /// Only subfolders whose name starts with this are considered.
    pub prefix: String,
}

impl InstallParent {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }
}

/// Directories probed on one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLayout {
    /// Dynamic loader search path.
    pub default_dirs: Vec<PathBuf>,
    /// Explicit CUDA installation, ranked ahead of everything scanned.
    pub cuda_override: Option<PathBuf>,
    pub cuda_parents: Vec<InstallParent>,
    /// Library folders relative to a CUDA installation root.
    pub cuda_lib_subdirs: Vec<PathBuf>,
    /// Fixed system folders holding the NVIDIA driver library.
    pub driver_dirs: Vec<PathBuf>,
    /// Fixed system folders holding the Vulkan loader.
    pub vulkan_dirs: Vec<PathBuf>,
}

impl SearchLayout {
    /// Standard layout for `platform`, resolved against `env`.
    pub fn for_platform(platform: Platform, env: &DetectorEnv) -> Self {
        match platform {
            Platform::Windows => Self::windows(env),
            Platform::Linux => Self::linux(env),
            Platform::MacOs => Self::macos(env),
            Platform::Other => Self::default(),
        }
    }

    fn windows(env: &DetectorEnv) -> Self {
        let system_root = env.get("SystemRoot").unwrap_or("C:\\Windows");
        let system32 = PathBuf::from(system_root).join("System32");

        let cuda_parents = ["ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|key| env.get(key))
            .map(|program_files| {
                InstallParent::new(
                    PathBuf::from(program_files)
                        .join("NVIDIA GPU Computing Toolkit")
                        .join("CUDA"),
                    "v",
                )
            })
            .collect();

        Self {
            default_dirs: env.split_paths("PATH", Platform::Windows),
            cuda_override: env.get("CUDA_PATH").map(PathBuf::from),
            cuda_parents,
            cuda_lib_subdirs: vec![PathBuf::from("bin"), PathBuf::from("bin").join("x64")],
            driver_dirs: vec![system32.clone()],
            vulkan_dirs: vec![system32],
        }
    }

    fn linux(env: &DetectorEnv) -> Self {
        let mut vulkan_dirs: Vec<PathBuf> = [
            "/usr/lib",
            "/usr/lib64",
            "/usr/lib/x86_64-linux-gnu",
            "/usr/lib/aarch64-linux-gnu",
            "/usr/local/lib",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        if let Some(prefix) = env.get("PREFIX") {
            vulkan_dirs.push(PathBuf::from(prefix).join("lib"));
        }

        Self {
            default_dirs: env.split_paths("LD_LIBRARY_PATH", Platform::Linux),
            cuda_override: env.get("CUDA_PATH").map(PathBuf::from),
            cuda_parents: vec![
                InstallParent::new("/usr/local", "cuda"),
                InstallParent::new("/opt", "cuda"),
            ],
            cuda_lib_subdirs: vec![
                PathBuf::from("lib64"),
                PathBuf::from("lib"),
                PathBuf::from("targets/x86_64-linux/lib"),
                PathBuf::from("targets/sbsa-linux/lib"),
            ],
            driver_dirs: [
                "/usr/lib/x86_64-linux-gnu",
                "/usr/lib/aarch64-linux-gnu",
                "/usr/lib64",
                "/usr/lib",
                "/usr/lib/wsl/lib",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            vulkan_dirs,
        }
    }

    fn macos(env: &DetectorEnv) -> Self {
        Self {
            default_dirs: env.split_paths("DYLD_LIBRARY_PATH", Platform::MacOs),
            vulkan_dirs: vec![
                PathBuf::from("/usr/local/lib"),
                PathBuf::from("/opt/homebrew/lib"),
            ],
            ..Self::default()
        }
    }
}

/// Accepted file names for each library class on one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryNames {
    pub cuda_driver: &'static [&'static str],
    pub cuda_runtime: &'static [&'static str],
    pub cublas: &'static [&'static str],
    pub cublas_lt: &'static [&'static str],
    pub vulkan: &'static [&'static str],
}

impl LibraryNames {
    pub const fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self {
                cuda_driver: &["nvml.dll"],
                cuda_runtime: &["cudart64_110.dll", "cudart64_12.dll", "cudart64_13.dll"],
                cublas: &["cublas64_11.dll", "cublas64_12.dll", "cublas64_13.dll"],
                cublas_lt: &["cublasLt64_11.dll", "cublasLt64_12.dll", "cublasLt64_13.dll"],
                vulkan: &["vulkan-1.dll"],
            },
            Platform::Linux => Self {
                cuda_driver: &["libnvidia-ml.so", "libnvidia-ml.so.1"],
                cuda_runtime: &[
                    "libcudart.so",
                    "libcudart.so.11.0",
                    "libcudart.so.12",
                    "libcudart.so.13",
                ],
                cublas: &["libcublas.so", "libcublas.so.11", "libcublas.so.12", "libcublas.so.13"],
                cublas_lt: &[
                    "libcublasLt.so",
                    "libcublasLt.so.11",
                    "libcublasLt.so.12",
                    "libcublasLt.so.13",
                ],
                vulkan: &["libvulkan.so", "libvulkan.so.1"],
            },
            Platform::MacOs => Self {
                cuda_driver: &[],
                cuda_runtime: &[],
                cublas: &[],
                cublas_lt: &[],
                vulkan: &["libvulkan.dylib", "libvulkan.1.dylib"],
            },
            Platform::Other => Self {
                cuda_driver: &[],
                cuda_runtime: &[],
                cublas: &[],
                cublas_lt: &[],
                vulkan: &[],
            },
        }
    }
}
