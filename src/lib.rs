// Arbor - a REST dispatch engine for Rust
//
// A hierarchical handler registry with declarative parameter validation,
// help and fallback routing, and hot-deployable handler bundles.

mod engine;

// Re-export core functionality
pub use arbor_core::*;

pub use arbor_config;
pub use arbor_deploy;

pub use arbor_config::EngineConfig;
pub use arbor_deploy::{
    BaseContext, BundleRegistrar, Deployer, DeployerConfig, Initializer, InitializerCatalog,
    ModuleContext, ModuleLoader, register_initializer,
};
pub use engine::{Engine, EngineBuilder};

#[cfg(feature = "testing")]
pub use arbor_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AllowAll,
        Authorizer,
        BundleRegistrar,
        Call,
        DenyAll,
        Engine,
        EngineConfig,
        Error,
        Execute,
        Handler,
        Initializer,
        InitializerCatalog,
        Outcome,
        Parameter,
        Registry,
        RequestContext,
        Resolved,
        Result,
        Router,
        codes,
        from_fn,
        register_initializer,
    };
}
