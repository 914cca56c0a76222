//! Bundle registries: where `nativeRequire` finds module source.
//!
//! A module is addressed by `(bundle id, module id)`. Bundle `0` is the main
//! bundle; `nativeRequire(moduleId)` without a bundle id addresses it.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Id of the main bundle
pub const MAIN_BUNDLE_ID: u32 = 0;

/// Directory holding one file per module in an unbundled layout
pub const JS_MODULES_DIR: &str = "js-modules";

/// One module's source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleModule {
    /// Identifying name, used as the source URL in errors
    pub name: String,
    /// Script source
    pub code: String,
}

impl BundleModule {
    /// Create a module
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// Lookup of module source by `(bundle id, module id)`
pub trait BundleRegistry: Send + Sync {
    /// Find a module. `None` when the bundle or the module is unknown.
    fn get_module(&self, bundle_id: u32, module_id: u32) -> Option<BundleModule>;
}

/// In-memory registry holding any number of bundles
#[derive(Default)]
pub struct RamBundleRegistry {
    bundles: DashMap<u32, HashMap<u32, BundleModule>>,
}

impl RamBundleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry whose main bundle holds `modules`
    pub fn with_main_bundle(modules: impl IntoIterator<Item = (u32, BundleModule)>) -> Self {
        let registry = Self::new();
        registry.register_bundle(MAIN_BUNDLE_ID, modules);
        registry
    }

    /// Add or replace a whole bundle
    pub fn register_bundle(&self, bundle_id: u32, modules: impl IntoIterator<Item = (u32, BundleModule)>) {
        self.bundles.insert(bundle_id, modules.into_iter().collect());
    }

    /// Add or replace one module
    pub fn insert(&self, bundle_id: u32, module_id: u32, module: BundleModule) {
        self.bundles
            .entry(bundle_id)
            .or_default()
            .insert(module_id, module);
    }

    /// Whether a bundle is registered
    pub fn has_bundle(&self, bundle_id: u32) -> bool {
        self.bundles.contains_key(&bundle_id)
    }
}

impl BundleRegistry for RamBundleRegistry {
    fn get_module(&self, bundle_id: u32, module_id: u32) -> Option<BundleModule> {
        self.bundles.get(&bundle_id)?.get(&module_id).cloned()
    }
}

/// Unbundled layout on disk: `<root>/js-modules/<moduleId>.js`.
///
/// Only serves the main bundle.
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    root: PathBuf,
}

impl DirectoryBundle {
    /// Open a bundle rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether `root` has the unbundled layout
    pub fn is_unbundle(root: impl AsRef<Path>) -> bool {
        root.as_ref().join(JS_MODULES_DIR).is_dir()
    }

    /// Path of a module's source file
    pub fn module_path(&self, module_id: u32) -> PathBuf {
        self.root.join(JS_MODULES_DIR).join(format!("{}.js", module_id))
    }
}

impl BundleRegistry for DirectoryBundle {
    fn get_module(&self, bundle_id: u32, module_id: u32) -> Option<BundleModule> {
        if bundle_id != MAIN_BUNDLE_ID {
            return None;
        }

        let path = self.module_path(module_id);
        match std::fs::read_to_string(&path) {
            Ok(code) => Some(BundleModule::new(format!("{}.js", module_id), code)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read module");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_registry_lookup() {
        let registry = RamBundleRegistry::with_main_bundle([(1, BundleModule::new("one.js", "1"))]);
        registry.insert(7, 3, BundleModule::new("seven-three.js", "73"));

        assert_eq!(registry.get_module(MAIN_BUNDLE_ID, 1).unwrap().code, "1");
        assert_eq!(registry.get_module(7, 3).unwrap().name, "seven-three.js");
        assert!(registry.get_module(MAIN_BUNDLE_ID, 42).is_none());
        assert!(registry.get_module(9, 1).is_none());
        assert!(registry.has_bundle(7));
    }

    #[test]
    fn test_register_bundle_replaces() {
        let registry = RamBundleRegistry::new();
        registry.register_bundle(2, [(1, BundleModule::new("a.js", "a"))]);
        registry.register_bundle(2, [(2, BundleModule::new("b.js", "b"))]);
        assert!(registry.get_module(2, 1).is_none());
        assert!(registry.get_module(2, 2).is_some());
    }

    #[test]
    fn test_directory_bundle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!DirectoryBundle::is_unbundle(dir.path()));

        std::fs::create_dir(dir.path().join(JS_MODULES_DIR)).unwrap();
        std::fs::write(dir.path().join(JS_MODULES_DIR).join("5.js"), "var five = 5;").unwrap();
        assert!(DirectoryBundle::is_unbundle(dir.path()));

        let bundle = DirectoryBundle::new(dir.path());
        let module = bundle.get_module(MAIN_BUNDLE_ID, 5).unwrap();
        assert_eq!(module.name, "5.js");
        assert_eq!(module.code, "var five = 5;");

        assert!(bundle.get_module(MAIN_BUNDLE_ID, 6).is_none());
        assert!(bundle.get_module(1, 5).is_none());
    }
}
