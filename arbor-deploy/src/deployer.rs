// Bundle deployer
//
// Deploy: descriptor -> module context -> owner mapping -> initializer on a
// blocking thread. Undeploy: retire the context, sweep the owner's nodes out
// of the registry, release the mapping last.

use crate::catalog::ModuleLoader;
use crate::context::{BaseContext, ModuleContext};
use crate::descriptor::BundleDescriptor;
use crate::owners::OwnerMap;
use crate::registrar::BundleRegistrar;
use crate::sweep::{SweepReport, sweep};
use crate::watcher::{self, WatchHandle};
use arbor_core::{Error, OwnerKey, Registry, Result, codes};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Deployer settings
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    /// Directory whose subdirectories are bundles
    pub root: PathBuf,
    /// Descriptor file name inside a bundle
    pub descriptor: String,
    /// Bundle-local library directory
    pub library_dir: String,
    /// Quiet period after a file system event before reconciling
    pub debounce: Duration,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("bundles"),
            descriptor: "bundle.toml".to_string(),
            library_dir: "lib".to_string(),
            debounce: Duration::from_millis(250),
        }
    }
}

impl DeployerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn descriptor(mut self, file_name: impl Into<String>) -> Self {
        self.descriptor = file_name.into();
        self
    }

    pub fn library_dir(mut self, dir: impl Into<String>) -> Self {
        self.library_dir = dir.into();
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// A bundle whose initializer has been started
pub struct Deployment {
    owner: OwnerKey,
    task: JoinHandle<Result<usize>>,
}

impl Deployment {
    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the initializer; yields the number of handlers it added
    pub async fn finished(self) -> Result<usize> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::new(
                codes::INITIALIZER_FAILED,
                format!("initializer task for `{}` was lost: {}", self.owner, e),
            )
            .with_data("bundle", self.owner.as_str())),
        }
    }
}

/// Hot deployment of handler bundles into a shared [`Registry`]
pub struct Deployer {
    registry: Arc<Registry>,
    loader: Arc<dyn ModuleLoader>,
    owners: Arc<OwnerMap>,
    base: Arc<BaseContext>,
    config: DeployerConfig,
}

impl Deployer {
    pub fn new(
        registry: Arc<Registry>,
        loader: Arc<dyn ModuleLoader>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            registry,
            loader,
            owners: Arc::new(OwnerMap::new()),
            base: Arc::new(BaseContext::new()),
            config,
        }
    }

    /// Shared context visible to every bundle
    pub fn with_base(mut self, base: BaseContext) -> Self {
        self.base = Arc::new(base);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Deploy the bundle in `dir`.
    ///
    /// A single relative component names a bundle under the root. Returns once
    /// the owner mapping is in place; the initializer runs in the background.
    /// Must be called within a tokio runtime.
    pub fn deploy(&self, dir: impl AsRef<Path>) -> Result<Deployment> {
        let dir = self.bundle_path(dir.as_ref());
        let owner = OwnerKey::from_path(&dir);
        if self.owners.contains(&owner) {
            return Err(Error::new(
                codes::ALREADY_DEPLOYED,
                format!("bundle `{}` is already deployed", owner),
            )
            .with_data("bundle", owner.as_str()));
        }

        let descriptor = BundleDescriptor::load(&dir, &self.config.descriptor)?;
        let context = Arc::new(ModuleContext::load(
            &dir,
            descriptor,
            &self.config.library_dir,
            self.base.clone(),
        )?);
        self.owners.insert(context.clone())?;

        tracing::info!(
            bundle = %owner,
            initializer = %context.descriptor().initializer,
            libraries = context.libraries().len(),
            "deploying bundle"
        );

        let registrar = BundleRegistrar::new(
            self.registry.clone(),
            self.owners.clone(),
            context.clone(),
        );
        let task = tokio::spawn(run_initializer(
            self.loader.clone(),
            self.registry.clone(),
            self.owners.clone(),
            registrar,
        ));

        Ok(Deployment { owner, task })
    }

    /// Remove every handler the bundle in `dir` registered.
    ///
    /// Returns `None` if the bundle was not deployed.
    pub fn undeploy(&self, dir: impl AsRef<Path>) -> Option<SweepReport> {
        let dir = self.bundle_path(dir.as_ref());
        let owner = OwnerKey::from_path(&dir);
        let context = self.owners.get(&owner)?;

        let report = release(&self.registry, &self.owners, &context);
        tracing::info!(
            bundle = %owner,
            detached = report.detached,
            orphaned = report.orphaned,
            "bundle undeployed"
        );
        Some(report)
    }

    /// Undeploy (if deployed), then deploy again
    pub fn redeploy(&self, dir: impl AsRef<Path>) -> Result<Deployment> {
        let dir = dir.as_ref();
        self.undeploy(dir);
        self.deploy(dir)
    }

    pub fn is_deployed(&self, dir: impl AsRef<Path>) -> bool {
        let dir = self.bundle_path(dir.as_ref());
        self.owners.contains(&OwnerKey::from_path(&dir))
    }

    /// Live context of a deployed bundle
    pub fn context(&self, dir: impl AsRef<Path>) -> Option<Arc<ModuleContext>> {
        let dir = self.bundle_path(dir.as_ref());
        self.owners.get(&OwnerKey::from_path(&dir))
    }

    /// Owner keys of all deployed bundles, sorted
    pub fn bundles(&self) -> Vec<OwnerKey> {
        self.owners.keys()
    }

    /// Deploy every bundle directory under the root that is not deployed yet.
    ///
    /// Bundles that fail to deploy are logged and skipped.
    pub fn scan(&self) -> Result<Vec<Deployment>> {
        let entries = match fs::read_dir(&self.config.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(root = %self.config.root.display(), "bundle root does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() && !is_hidden(&path) {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut deployments = Vec::new();
        for dir in dirs {
            if self.is_deployed(&dir) {
                continue;
            }
            match self.deploy(&dir) {
                Ok(deployment) => deployments.push(deployment),
                Err(err) => {
                    tracing::warn!(bundle = %dir.display(), error = %err, "bundle skipped");
                }
            }
        }
        Ok(deployments)
    }

    /// Bring one bundle in line with the file system.
    ///
    /// Present and unknown deploys, present and known redeploys, gone and
    /// known undeploys.
    pub fn reconcile(&self, dir: impl AsRef<Path>) -> Result<Option<Deployment>> {
        let dir = self.bundle_path(dir.as_ref());
        match (dir.is_dir(), self.is_deployed(&dir)) {
            (true, false) => self.deploy(&dir).map(Some),
            (true, true) => self.redeploy(&dir).map(Some),
            (false, true) => {
                self.undeploy(&dir);
                Ok(None)
            }
            (false, false) => Ok(None),
        }
    }

    /// Start the background watch loop over the bundle root
    pub fn watch(self: &Arc<Self>) -> Result<WatchHandle> {
        watcher::spawn(self.clone())
    }

    fn bundle_path(&self, dir: &Path) -> PathBuf {
        let dir = if dir.is_relative() && dir.components().count() == 1 {
            self.config.root.join(dir)
        } else {
            dir.to_path_buf()
        };
        normalize(&dir)
    }
}

/// Canonical form of `dir`; a deleted bundle resolves through its parent
fn normalize(dir: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(dir) {
        return canonical;
    }
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| dir.to_path_buf()),
        _ => dir.to_path_buf(),
    }
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn release(registry: &Registry, owners: &OwnerMap, context: &Arc<ModuleContext>) -> SweepReport {
    context.retire();
    let report = sweep(registry, context.owner(), &context.take_created());
    owners.remove_if_current(context);
    report
}

async fn run_initializer(
    loader: Arc<dyn ModuleLoader>,
    registry: Arc<Registry>,
    owners: Arc<OwnerMap>,
    registrar: BundleRegistrar,
) -> Result<usize> {
    let owner = registrar.owner().clone();
    let name = registrar.context().descriptor().initializer.clone();

    let blocking = registrar.clone();
    let joined = tokio::task::spawn_blocking(move || initialize(loader.as_ref(), &blocking)).await;
    let result = joined.unwrap_or_else(|e| {
        Err(Error::new(
            codes::INITIALIZER_FAILED,
            format!("initializer `{}` panicked: {}", name, e),
        )
        .with_data("initializer", name.as_str()))
    });

    match result {
        Ok(()) => {
            tracing::info!(bundle = %owner, handlers = registrar.added(), "bundle deployed");
            Ok(registrar.added())
        }
        Err(err) => {
            tracing::error!(bundle = %owner, initializer = %name, error = %err, "bundle initializer failed");
            let context = registrar_context(&owners, &registrar);
            if let Some(context) = context {
                let report = release(&registry, &owners, &context);
                tracing::debug!(bundle = %owner, detached = report.detached, "partial deployment rolled back");
            }
            Err(err)
        }
    }
}

// The registrar's context, if it is still the live mapping
fn registrar_context(owners: &OwnerMap, registrar: &BundleRegistrar) -> Option<Arc<ModuleContext>> {
    owners
        .get(registrar.owner())
        .filter(|live| std::ptr::eq(live.as_ref(), registrar.context()))
}

fn initialize(loader: &dyn ModuleLoader, registrar: &BundleRegistrar) -> Result<()> {
    let name = &registrar.context().descriptor().initializer;
    let mut initializer = loader.instantiate(name, registrar.context())?;
    initializer.initialize(registrar).map_err(|err| {
        if err.code() == codes::STALE_BUNDLE {
            return err;
        }
        Error::new(
            codes::INITIALIZER_FAILED,
            format!("initializer `{}` failed: {}", name, err.message()),
        )
        .with_data("initializer", name.as_str())
        .with_data("bundle", registrar.owner().as_str())
        .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DeployerConfig::new("/srv/bundles")
            .descriptor("bundle.json")
            .library_dir("libs")
            .debounce(Duration::from_millis(10));

        assert_eq!(config.root, PathBuf::from("/srv/bundles"));
        assert_eq!(config.descriptor, "bundle.json");
        assert_eq!(config.library_dir, "libs");
        assert_eq!(config.debounce, Duration::from_millis(10));
    }

    #[test]
    fn test_normalize_missing_path_keeps_name() {
        let base = fs::canonicalize(std::env::temp_dir()).unwrap();
        let missing = base.join("arbor-normalize-missing");
        assert_eq!(normalize(&missing), missing);
    }

    #[test]
    fn test_hidden_entries() {
        assert!(is_hidden(Path::new("/b/.staging")));
        assert!(!is_hidden(Path::new("/b/reports")));
    }
}
