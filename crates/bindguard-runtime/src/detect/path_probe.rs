//! Shared library lookup across candidate directories.

use std::path::{Path, PathBuf};

/// Looks for shared library files by name.
///
/// Explicit candidate directories are searched first, then the default
/// search locations the probe was built with (typically the dynamic loader
/// path variable). Nothing is ever loaded.
#[derive(Debug, Clone, Default)]
pub struct PathProbe {
    default_dirs: Vec<PathBuf>,
}

impl PathProbe {
    pub const fn new(default_dirs: Vec<PathBuf>) -> Self {
        Self { default_dirs }
    }

    /// First match for any of `names` in `dirs`, then in the default locations.
    pub fn find(&self, names: &[&str], dirs: &[PathBuf]) -> Option<PathBuf> {
        find_in(names, dirs).or_else(|| find_in(names, &self.default_dirs))
    }
}

/// First existing file named any of `names` inside `dirs`, without default locations.
pub fn find_in(names: &[&str], dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| is_library_file(candidate))
}

fn is_library_file(path: &Path) -> bool {
    // Follows symlinks, so versioned `.so` links count.
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_find_in_explicit_dirs() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let lib = touch(b.path(), "libvulkan.so.1");

        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        assert_eq!(find_in(&["libvulkan.so", "libvulkan.so.1"], &dirs), Some(lib));
    }

    #[test]
    fn test_find_falls_back_to_default_dirs() {
        let defaults = TempDir::new().unwrap();
        let lib = touch(defaults.path(), "nvml.dll");
        let probe = PathProbe::new(vec![defaults.path().to_path_buf()]);

        assert_eq!(probe.find(&["nvml.dll"], &[]), Some(lib));
        assert!(find_in(&["nvml.dll"], &[]).is_none());
    }

    #[test]
    fn test_explicit_dirs_win_over_defaults() {
        let explicit = TempDir::new().unwrap();
        let defaults = TempDir::new().unwrap();
        let preferred = touch(explicit.path(), "libcudart.so.12");
        touch(defaults.path(), "libcudart.so.12");

        let probe = PathProbe::new(vec![defaults.path().to_path_buf()]);
        assert_eq!(
            probe.find(&["libcudart.so.12"], &[explicit.path().to_path_buf()]),
            Some(preferred)
        );
    }

    #[test]
    fn test_directories_do_not_count_as_libraries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("libvulkan.so")).unwrap();

        assert!(
            PathProbe::default()
                .find(&["libvulkan.so"], &[dir.path().to_path_buf()])
                .is_none()
        );
    }

    #[test]
    fn test_missing_dirs_are_not_errors() {
        let probe = PathProbe::new(vec![PathBuf::from("/definitely/not/here")]);
        assert!(
            probe
                .find(&["libvulkan.so"], &[PathBuf::from("/nor/here")])
                .is_none()
        );
    }
}
