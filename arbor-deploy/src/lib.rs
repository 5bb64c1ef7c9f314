//! Hot deployment of handler bundles.
//!
//! A bundle is a directory under the deployer's root holding a descriptor
//! (`bundle.toml`) that names a one-shot [`Initializer`], plus an optional
//! `lib/` directory of bundle-local libraries. Deploying a bundle builds an
//! isolated [`ModuleContext`], maps the bundle's owner key to it, and runs the
//! initializer, which adds handlers through a [`BundleRegistrar`]. Undeploying
//! sweeps every node carrying the owner key out of the registry.
//!
//! ```no_run
//! use arbor_core::Registry;
//! use arbor_deploy::{Deployer, DeployerConfig, InitializerCatalog};
//! use std::sync::Arc;
//!
//! # async fn run() -> arbor_core::Result<()> {
//! let registry = Arc::new(Registry::new());
//! let catalog = Arc::new(InitializerCatalog::new());
//! let deployer = Arc::new(Deployer::new(registry, catalog, DeployerConfig::new("bundles")));
//!
//! for deployment in deployer.scan()? {
//!     deployment.finished().await.ok();
//! }
//! let watch = deployer.watch()?;
//! // ...
//! watch.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod context;
pub mod deployer;
pub mod descriptor;
pub mod owners;
pub mod registrar;
pub mod sweep;
pub mod watcher;

pub use catalog::{
    Initializer, InitializerCatalog, InitializerEntry, InitializerFactory, ModuleLoader,
    registered_names,
};
pub use context::{BaseContext, ModuleContext};
pub use deployer::{Deployer, DeployerConfig, Deployment};
pub use descriptor::BundleDescriptor;
pub use owners::OwnerMap;
pub use registrar::BundleRegistrar;
pub use sweep::{SweepReport, owned_nodes, owns_any, sweep};
pub use watcher::WatchHandle;

#[doc(hidden)]
pub use inventory;
