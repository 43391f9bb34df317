//! CUDA driver and runtime probes.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::layout::{InstallParent, LibraryNames, SearchLayout};
use super::path_probe::{PathProbe, find_in};
use super::version::rank_by_version;

/// CUDA installation roots, best candidate first.
///
/// `cuda_override` (from `CUDA_PATH`) always leads. Scanned folders follow,
/// newest version first. A parent that cannot be listed is skipped.
pub fn install_paths(layout: &SearchLayout) -> Vec<PathBuf> {
    let mut scanned = Vec::new();
    for parent in &layout.cuda_parents {
        match scan_parent(parent) {
            Ok(found) => scanned.extend(found),
            Err(e) => {
                debug!(dir = %parent.dir.display(), error = %e, "Skipping unreadable CUDA parent");
            }
        }
    }

    let ranked = rank_by_version(scanned, |(name, _)| name.as_str());

    let mut paths: Vec<PathBuf> = layout.cuda_override.iter().cloned().collect();
    for (_, path) in ranked {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Subfolders of `parent.dir` whose name starts with the parent's prefix.
///
/// A missing parent has no installs.
fn scan_parent(parent: &InstallParent) -> io::Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(&parent.dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with(&parent.prefix)
                .then(|| (name, entry.path()))
        })
        .collect();

    // read_dir order is unspecified; listing order is by name
    found.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(found)
}

/// Driver-management library present in the default search or a system folder.
pub fn has_driver(probe: &PathProbe, layout: &SearchLayout, names: &LibraryNames) -> bool {
    let found = probe.find(names.cuda_driver, &layout.driver_dirs);
    if let Some(path) = &found {
        debug!(path = %path.display(), "CUDA driver library found");
    }
    found.is_some()
}

/// Runtime, cuBLAS and cuBLASLt each present under some install path.
pub fn has_runtime(layout: &SearchLayout, names: &LibraryNames) -> bool {
    let lib_dirs: Vec<PathBuf> = install_paths(layout)
        .iter()
        .flat_map(|root| {
            std::iter::once(root.clone())
                .chain(layout.cuda_lib_subdirs.iter().map(|sub| root.join(sub)))
        })
        .collect();

    if lib_dirs.is_empty() {
        return false;
    }

    let classes = [
        ("cudart", names.cuda_runtime),
        ("cublas", names.cublas),
        ("cublasLt", names.cublas_lt),
    ];
    for (class, accepted) in classes {
        if accepted.is_empty() {
            return false;
        }
        match find_in(accepted, &lib_dirs) {
            Some(path) => debug!(class, path = %path.display(), "CUDA library found"),
            None => {
                debug!(class, "CUDA library missing");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindguard_core::Platform;
    use std::path::Path;
    use tempfile::TempDir;

    fn linux_layout(root: &Path) -> SearchLayout {
        SearchLayout {
            cuda_parents: vec![InstallParent::new(root.join("usr/local"), "cuda")],
            cuda_lib_subdirs: vec![PathBuf::from("lib64")],
            driver_dirs: vec![root.join("usr/lib64")],
            ..SearchLayout::default()
        }
    }

    fn install(root: &Path, name: &str, libs: &[&str]) -> PathBuf {
        let dir = root.join("usr/local").join(name);
        fs::create_dir_all(dir.join("lib64")).unwrap();
        for lib in libs {
            fs::write(dir.join("lib64").join(lib), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_install_paths_ranked_with_override_first() {
        let tmp = TempDir::new().unwrap();
        let nine = install(tmp.path(), "cuda-9", &[]);
        let bogus = install(tmp.path(), "cuda-bogus", &[]);
        let ten = install(tmp.path(), "cuda-10", &[]);
        fs::create_dir_all(tmp.path().join("usr/local/share")).unwrap();

        let mut layout = linux_layout(tmp.path());
        layout.cuda_override = Some(PathBuf::from("/custom/cuda"));

        assert_eq!(
            install_paths(&layout),
            vec![PathBuf::from("/custom/cuda"), ten, nine, bogus]
        );
    }

    #[test]
    fn test_override_is_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let twelve = install(tmp.path(), "cuda-12.4", &[]);
        let mut layout = linux_layout(tmp.path());
        layout.cuda_override = Some(twelve.clone());

        assert_eq!(install_paths(&layout), vec![twelve]);
    }

    #[test]
    fn test_runtime_requires_all_three_classes() {
        let tmp = TempDir::new().unwrap();
        install(tmp.path(), "cuda-12.4", &["libcudart.so.12", "libcublas.so.12"]);
        let layout = linux_layout(tmp.path());
        let names = LibraryNames::for_platform(Platform::Linux);

        assert!(!has_runtime(&layout, &names));

        fs::write(
            tmp.path().join("usr/local/cuda-12.4/lib64/libcublasLt.so.12"),
            b"",
        )
        .unwrap();
        assert!(has_runtime(&layout, &names));
    }

    #[test]
    fn test_runtime_classes_may_come_from_different_installs() {
        let tmp = TempDir::new().unwrap();
        install(tmp.path(), "cuda-11.8", &["libcudart.so.11.0"]);
        install(tmp.path(), "cuda-12.4", &["libcublas.so.12", "libcublasLt.so.12"]);
        let layout = linux_layout(tmp.path());

        assert!(has_runtime(&layout, &LibraryNames::for_platform(Platform::Linux)));
    }

    #[test]
    fn test_driver_found_in_system_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = linux_layout(tmp.path());
        let names = LibraryNames::for_platform(Platform::Linux);
        let probe = PathProbe::default();

        assert!(!has_driver(&probe, &layout, &names));

        fs::create_dir_all(tmp.path().join("usr/lib64")).unwrap();
        fs::write(tmp.path().join("usr/lib64/libnvidia-ml.so.1"), b"").unwrap();
        assert!(has_driver(&probe, &layout, &names));
    }

    #[test]
    fn test_unlistable_parent_keeps_override_and_other_parents() {
        let tmp = TempDir::new().unwrap();
        let twelve = install(tmp.path(), "cuda-12.4", &[
            "libcudart.so.12",
            "libcublas.so.12",
            "libcublasLt.so.12",
        ]);
        // read_dir on a regular file fails with something other than NotFound
        let not_a_dir = tmp.path().join("opt");
        fs::write(&not_a_dir, b"").unwrap();

        let mut layout = linux_layout(tmp.path());
        layout.cuda_parents.insert(0, InstallParent::new(not_a_dir, "cuda"));
        layout.cuda_override = Some(PathBuf::from("/custom/cuda"));

        assert_eq!(
            install_paths(&layout),
            vec![PathBuf::from("/custom/cuda"), twelve]
        );
        assert!(has_runtime(&layout, &LibraryNames::for_platform(Platform::Linux)));
    }

    #[test]
    fn test_missing_parents_give_no_paths() {
        let tmp = TempDir::new().unwrap();
        let layout = linux_layout(&tmp.path().join("absent"));

        assert!(install_paths(&layout).is_empty());
        assert!(!has_runtime(&layout, &LibraryNames::for_platform(Platform::Linux)));
    }
}
