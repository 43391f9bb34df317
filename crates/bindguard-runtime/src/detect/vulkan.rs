//! Vulkan loader probe.

use tracing::debug;

use super::layout::{LibraryNames, SearchLayout};
use super::path_probe::PathProbe;

/// Vulkan loader library present in the default search or a system folder.
pub fn has_loader(probe: &PathProbe, layout: &SearchLayout, names: &LibraryNames) -> bool {
    match probe.find(names.vulkan, &layout.vulkan_dirs) {
        Some(path) => {
            debug!(path = %path.display(), "Vulkan loader found");
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindguard_core::Platform;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_loader_found_in_prefix_lib() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("lib")).unwrap();
        fs::write(tmp.path().join("lib/libvulkan.so.1"), b"").unwrap();

        let layout = SearchLayout {
            vulkan_dirs: vec![tmp.path().join("lib")],
            ..SearchLayout::default()
        };
        let names = LibraryNames::for_platform(Platform::Linux);

        assert!(has_loader(&PathProbe::default(), &layout, &names));
    }

    #[test]
    fn test_loader_found_through_default_search() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("libvulkan.1.dylib"), b"").unwrap();

        let probe = PathProbe::new(vec![tmp.path().to_path_buf()]);
        let names = LibraryNames::for_platform(Platform::MacOs);

        assert!(has_loader(&probe, &SearchLayout::default(), &names));
    }

    #[test]
    fn test_wrong_platform_name_is_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("vulkan-1.dll"), b"").unwrap();

        let probe = PathProbe::new(vec![tmp.path().to_path_buf()]);
        let names = LibraryNames::for_platform(Platform::Linux);

        assert!(!has_loader(&probe, &SearchLayout::default(), &names));
    }
}
