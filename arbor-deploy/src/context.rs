// Module-load contexts

use crate::descriptor::BundleDescriptor;
use arbor_core::{NodeRef, OwnerKey, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Libraries and settings every bundle can see
#[derive(Debug, Clone, Default)]
pub struct BaseContext {
    libraries: Vec<PathBuf>,
    settings: toml::Table,
}

impl BaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.libraries.push(path.into());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn libraries(&self) -> &[PathBuf] {
        &self.libraries
    }

    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }
}

/// Isolated load context of one deployed bundle.
///
/// Sees the bundle's own library directory first, then the shared
/// [`BaseContext`]. A context is live from deployment until it is retired by
/// undeploy; registrations through a retired context are refused.
#[derive(Debug)]
pub struct ModuleContext {
    owner: OwnerKey,
    bundle_dir: PathBuf,
    descriptor: BundleDescriptor,
    libraries: Vec<PathBuf>,
    base: Arc<BaseContext>,
    live: RwLock<bool>,
    // intermediate composites the bundle's registrations created
    created: Mutex<Vec<NodeRef>>,
}

impl ModuleContext {
    /// Build the context for `bundle_dir`, listing files of its `library_dir`
    pub fn load(
        bundle_dir: &Path,
        descriptor: BundleDescriptor,
        library_dir: &str,
        base: Arc<BaseContext>,
    ) -> Result<Self> {
        let libraries = list_libraries(&bundle_dir.join(library_dir))?;
        Ok(Self::new(bundle_dir, descriptor, libraries, base))
    }

    pub fn new(
        bundle_dir: &Path,
        descriptor: BundleDescriptor,
        libraries: Vec<PathBuf>,
        base: Arc<BaseContext>,
    ) -> Self {
        Self {
            owner: OwnerKey::from_path(bundle_dir),
            bundle_dir: bundle_dir.to_path_buf(),
            descriptor,
            libraries,
            base,
            live: RwLock::new(true),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    pub fn descriptor(&self) -> &BundleDescriptor {
        &self.descriptor
    }

    /// Bundle-local libraries only
    pub fn libraries(&self) -> &[PathBuf] {
        &self.libraries
    }

    pub fn base(&self) -> &BaseContext {
        &self.base
    }

    /// Resolve a library by file name, bundle first, then base
    pub fn find_library(&self, file_name: &str) -> Option<&Path> {
        self.libraries
            .iter()
            .chain(self.base.libraries.iter())
            .find(|path| path.file_name().is_some_and(|name| name == file_name))
            .map(PathBuf::as_path)
    }

    /// Descriptor setting, falling back to the base context
    pub fn setting(&self, key: &str) -> Option<&toml::Value> {
        self.descriptor
            .settings
            .get(key)
            .or_else(|| self.base.settings.get(key))
    }

    pub fn is_live(&self) -> bool {
        *self.live.read()
    }

    /// Hold the context live for the duration of a registration
    pub(crate) fn live_guard(&self) -> RwLockReadGuard<'_, bool> {
        self.live.read()
    }

    /// Refuse further registrations; waits for in-flight ones to finish
    pub(crate) fn retire(&self) {
        *self.live.write() = false;
    }

    pub(crate) fn record_created(&self, nodes: Vec<NodeRef>) {
        self.created.lock().extend(nodes);
    }

    /// Composites created on the bundle's behalf, outermost first
    pub(crate) fn take_created(&self) -> Vec<NodeRef> {
        std::mem::take(&mut *self.created.lock())
    }
}

fn list_libraries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut libraries = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            libraries.push(path);
        }
    }
    libraries.sort();
    Ok(libraries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> BundleDescriptor {
        BundleDescriptor::parse(
            r#"
            initializer = "x"
            [settings]
            mount = "/bundle"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_library_lookup_prefers_bundle() {
        let base = Arc::new(
            BaseContext::new()
                .library("/shared/common.lib")
                .library("/shared/util.lib"),
        );
        let ctx = ModuleContext::new(
            Path::new("/bundles/reports"),
            descriptor(),
            vec![PathBuf::from("/bundles/reports/lib/util.lib")],
            base,
        );

        assert_eq!(
            ctx.find_library("util.lib"),
            Some(Path::new("/bundles/reports/lib/util.lib"))
        );
        assert_eq!(
            ctx.find_library("common.lib"),
            Some(Path::new("/shared/common.lib"))
        );
        assert_eq!(ctx.find_library("missing.lib"), None);
        assert_eq!(ctx.owner().as_str(), "/bundles/reports");
    }

    #[test]
    fn test_settings_fall_back_to_base() {
        let base = Arc::new(
            BaseContext::new()
                .setting("mount", "/base")
                .setting("region", "eu"),
        );
        let ctx = ModuleContext::new(Path::new("/b"), descriptor(), Vec::new(), base);

        assert_eq!(ctx.setting("mount").and_then(|v| v.as_str()), Some("/bundle"));
        assert_eq!(ctx.setting("region").and_then(|v| v.as_str()), Some("eu"));
        assert!(ctx.setting("other").is_none());
    }

    #[test]
    fn test_retire() {
        let ctx = ModuleContext::new(
            Path::new("/b"),
            descriptor(),
            Vec::new(),
            Arc::new(BaseContext::new()),
        );
        assert!(ctx.is_live());
        ctx.retire();
        assert!(!ctx.is_live());
    }

    #[test]
    fn test_missing_library_dir_is_empty() {
        let ctx = ModuleContext::load(
            &std::env::temp_dir().join("arbor-no-such-bundle"),
            descriptor(),
            "lib",
            Arc::new(BaseContext::new()),
        )
        .unwrap();
        assert!(ctx.libraries().is_empty());
    }
}
