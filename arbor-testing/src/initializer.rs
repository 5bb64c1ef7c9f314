// Closure-backed bundle initializers

use arbor_core::Result;
use arbor_deploy::{BundleRegistrar, Initializer, InitializerCatalog, ModuleContext};
use std::sync::Arc;

type InitFn = Arc<dyn Fn(&BundleRegistrar) -> Result<()> + Send + Sync>;

/// [`Initializer`] running a shared closure
#[derive(Clone)]
pub struct FnInitializer {
    f: InitFn,
}

impl FnInitializer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&BundleRegistrar) -> Result<()> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Register under `name`; every deployment gets a fresh instance
    pub fn register(self, catalog: &InitializerCatalog, name: &str) {
        catalog.register(name, move |_ctx: &ModuleContext| {
            Ok(Box::new(self.clone()) as Box<dyn Initializer>)
        });
    }
}

impl Initializer for FnInitializer {
    fn initialize(&mut self, registrar: &BundleRegistrar) -> Result<()> {
        (self.f)(registrar)
    }
}
