// Engine composition root
//
// Owns the process-wide Registry and wires it into the Router and the
// Deployer. Nothing else in the workspace holds a global registry.

use arbor_config::{EngineConfig, Validate};
use arbor_core::logging::WorkerGuard;
use arbor_core::{
    Authorizer, DenyAll, Error, Outcome, Registry, RequestContext, Result, Router,
};
use arbor_deploy::{
    BaseContext, Deployer, DeployerConfig, InitializerCatalog, ModuleLoader, WatchHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<Registry>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    loader: Option<Arc<dyn ModuleLoader>>,
    base: BaseContext,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            authorizer: None,
            loader: None,
            base: BaseContext::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from a registry that already holds static handlers
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Authorization collaborator; defaults to [`DenyAll`]
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    pub fn shared_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Module-loading collaborator; defaults to the compile-time catalog
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn catalog(self, catalog: InitializerCatalog) -> Self {
        self.loader(Arc::new(catalog))
    }

    /// Context shared by every bundle
    pub fn base_context(mut self, base: BaseContext) -> Self {
        self.base = base;
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate().map_err(Error::from)?;

        let registry = self.registry.unwrap_or_else(|| Arc::new(Registry::new()));
        let authorizer: Arc<dyn Authorizer> =
            self.authorizer.unwrap_or_else(|| Arc::new(DenyAll));
        let loader: Arc<dyn ModuleLoader> = self
            .loader
            .unwrap_or_else(|| Arc::new(InitializerCatalog::new()));

        let router = Router::new(registry.clone(), authorizer)
            .with_help_keyword(self.config.router.help_keyword.as_str())
            .with_max_forwards(self.config.router.max_forwards);

        let deploy = &self.config.deploy;
        let deployer_config = DeployerConfig::new(deploy.root.clone())
            .descriptor(deploy.descriptor.as_str())
            .library_dir(deploy.library_dir.as_str())
            .debounce(deploy.debounce());
        let deployer =
            Deployer::new(registry.clone(), loader, deployer_config).with_base(self.base);

        Ok(Engine {
            config: self.config,
            registry,
            router: Arc::new(router),
            deployer: Arc::new(deployer),
            watch: Mutex::new(None),
        })
    }
}

/// A configured dispatch engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<Registry>,
    router: Arc<Router>,
    deployer: Arc<Deployer>,
    watch: Mutex<Option<WatchHandle>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Install the global subscriber described by `config.log`
    pub fn init_logging(config: &EngineConfig) -> Result<WorkerGuard> {
        config.log.to_log_config().map_err(Error::from)?.init()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn deployer(&self) -> &Arc<Deployer> {
        &self.deployer
    }

    /// Deploy existing bundles, then watch the bundle root.
    ///
    /// Returns the number of bundles whose initializers succeeded. Does nothing
    /// when deployment is disabled; calling it twice keeps the first watcher.
    pub async fn start(&self) -> Result<usize> {
        let settings = &self.config.deploy;
        if !settings.enabled {
            tracing::info!("bundle deployment disabled");
            return Ok(0);
        }

        let mut deployed = 0;
        if settings.scan_on_start {
            for deployment in self.deployer.scan()? {
                let owner = deployment.owner().clone();
                match deployment.finished().await {
                    Ok(_) => deployed += 1,
                    Err(err) => {
                        tracing::warn!(bundle = %owner, error = %err, "bundle failed at startup");
                    }
                }
            }
        }

        let mut watch = self.watch.lock();
        if watch.is_none() {
            *watch = Some(self.deployer.watch()?);
        }
        tracing::info!(
            root = %settings.root.display(),
            bundles = deployed,
            handlers = self.registry.len(),
            "engine started"
        );
        Ok(deployed)
    }

    pub fn is_watching(&self) -> bool {
        self.watch.lock().as_ref().is_some_and(WatchHandle::is_running)
    }

    /// Resolve one request
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> Result<Outcome> {
        self.router.dispatch(ctx).await
    }

    /// Stop the watch loop; deployed bundles stay registered
    pub async fn shutdown(&self) {
        let handle = self.watch.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
            tracing::info!("engine stopped");
        }
    }
}
