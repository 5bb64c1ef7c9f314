// Initializer catalog
//
// Initializers are found by name, first among factories registered on the
// catalog at runtime, then in the compile-time table collected with
// `inventory`.

use crate::context::ModuleContext;
use crate::registrar::BundleRegistrar;
use arbor_core::{Error, Result, codes};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One-shot hook that populates the registry for a bundle.
///
/// Runs on a blocking thread, once per deployment.
pub trait Initializer: Send {
    fn initialize(&mut self, registrar: &BundleRegistrar) -> Result<()>;
}

/// Creates an initializer inside a bundle's context
pub type InitializerFactory = fn(&ModuleContext) -> Result<Box<dyn Initializer>>;

/// Compile-time registered initializer
pub struct InitializerEntry {
    pub name: &'static str,
    pub factory: InitializerFactory,
}

inventory::collect!(InitializerEntry);

impl InitializerEntry {
    pub const fn new(name: &'static str, factory: InitializerFactory) -> Self {
        Self { name, factory }
    }
}

/// Register an initializer factory under a fully-qualified name
///
/// ```ignore
/// fn reports(_ctx: &ModuleContext) -> Result<Box<dyn Initializer>> {
///     Ok(Box::new(ReportsBundle))
/// }
///
/// register_initializer!("reports.bundle", reports);
/// ```
#[macro_export]
macro_rules! register_initializer {
    ($name:expr, $factory:expr) => {
        $crate::inventory::submit! {
            $crate::catalog::InitializerEntry::new($name, $factory)
        }
    };
}

/// Every compile-time registered initializer name, sorted
pub fn registered_names() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<InitializerEntry>
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort_unstable();
    names
}

fn find_registered(name: &str) -> Option<&'static InitializerEntry> {
    inventory::iter::<InitializerEntry>
        .into_iter()
        .find(|entry| entry.name == name)
}

/// The external module-loading collaborator of the deployer
pub trait ModuleLoader: Send + Sync {
    /// Instantiate the initializer `name` inside `context`
    fn instantiate(&self, name: &str, context: &ModuleContext) -> Result<Box<dyn Initializer>>;
}

type DynFactory = Arc<dyn Fn(&ModuleContext) -> Result<Box<dyn Initializer>> + Send + Sync>;

/// Default [`ModuleLoader`]: runtime registrations plus the `inventory` table
#[derive(Default)]
pub struct InitializerCatalog {
    factories: RwLock<HashMap<String, DynFactory>>,
}

impl InitializerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing an earlier one with the same name
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleContext) -> Result<Box<dyn Initializer>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(initializer = %name, "initializer registered");
        self.factories.write().insert(name, Arc::new(factory));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name) || find_registered(name).is_some()
    }

    /// Runtime and compile-time names, sorted and deduplicated
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.extend(registered_names().into_iter().map(str::to_string));
        names.sort();
        names.dedup();
        names
    }
}

impl ModuleLoader for InitializerCatalog {
    fn instantiate(&self, name: &str, context: &ModuleContext) -> Result<Box<dyn Initializer>> {
        let runtime = self.factories.read().get(name).cloned();
        if let Some(factory) = runtime {
            return factory(context);
        }
        if let Some(entry) = find_registered(name) {
            return (entry.factory)(context);
        }
        Err(Error::new(
            codes::INITIALIZER_UNKNOWN,
            format!("no initializer named `{}`", name),
        )
        .with_data("initializer", name)
        .with_data("bundle", context.owner().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BaseContext;
    use crate::descriptor::BundleDescriptor;
    use std::path::Path;

    struct Nothing;

    impl Initializer for Nothing {
        fn initialize(&mut self, _registrar: &BundleRegistrar) -> Result<()> {
            Ok(())
        }
    }

    fn nothing(_ctx: &ModuleContext) -> Result<Box<dyn Initializer>> {
        Ok(Box::new(Nothing))
    }

    crate::register_initializer!("catalog.tests.nothing", nothing);

    fn context() -> ModuleContext {
        ModuleContext::new(
            Path::new("/bundles/x"),
            BundleDescriptor::parse("initializer = \"x\"").unwrap(),
            Vec::new(),
            Arc::new(BaseContext::new()),
        )
    }

    #[test]
    fn test_compile_time_registration() {
        let catalog = InitializerCatalog::new();
        assert!(registered_names().contains(&"catalog.tests.nothing"));
        assert!(catalog.contains("catalog.tests.nothing"));
        assert!(catalog.instantiate("catalog.tests.nothing", &context()).is_ok());
    }

    #[test]
    fn test_runtime_registration() {
        let catalog = InitializerCatalog::new();
        catalog.register("runtime.nothing", |_ctx: &ModuleContext| {
            Ok(Box::new(Nothing) as Box<dyn Initializer>)
        });

        assert!(catalog.contains("runtime.nothing"));
        assert!(catalog.names().contains(&"runtime.nothing".to_string()));
        assert!(catalog.instantiate("runtime.nothing", &context()).is_ok());

        assert!(catalog.unregister("runtime.nothing"));
        assert!(!catalog.contains("runtime.nothing"));
    }

    #[test]
    fn test_unknown_initializer() {
        let catalog = InitializerCatalog::new();
        let err = match catalog.instantiate("nobody.home", &context()) {
            Ok(_) => panic!("instantiated an unknown initializer"),
            Err(err) => err,
        };
        assert_eq!(err.code(), codes::INITIALIZER_UNKNOWN);
        assert_eq!(err.data().unwrap()["initializer"], "nobody.home");
    }
}
