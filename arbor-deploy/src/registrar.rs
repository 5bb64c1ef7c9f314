// Registry handle given to bundle initializers

use crate::context::ModuleContext;
use crate::owners::OwnerMap;
use arbor_core::{Error, NodeRef, OwnerKey, Registry, Result, codes};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Adds handlers on behalf of one bundle.
///
/// Every node added is stamped with the bundle's owner key, so undeploy can
/// find it again. Once the bundle's context stops being the live mapping for
/// its key, every further `add` fails with `STALE_BUNDLE`.
#[derive(Clone)]
pub struct BundleRegistrar {
    registry: Arc<Registry>,
    owners: Arc<OwnerMap>,
    context: Arc<ModuleContext>,
    added: Arc<AtomicUsize>,
}

impl BundleRegistrar {
    pub fn new(registry: Arc<Registry>, owners: Arc<OwnerMap>, context: Arc<ModuleContext>) -> Self {
        Self {
            registry,
            owners,
            context,
            added: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add(&self, path: &str, node: NodeRef) -> Result<()> {
        let live = self.context.live_guard();
        if !*live || !self.owners.is_current(&self.context) {
            return Err(Error::new(
                codes::STALE_BUNDLE,
                format!("bundle `{}` is no longer deployed", self.owner()),
            )
            .with_data("bundle", self.owner().as_str())
            .with_data("path", path));
        }

        self.registry.check_add(path, &node)?;
        // the stamp is permanent; only a racing registration can fail the add now
        node.set_owner(self.owner().clone())?;
        let created = self.registry.add_tracked(path, node)?;
        self.context.record_created(created);
        self.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn owner(&self) -> &OwnerKey {
        self.context.owner()
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    /// Read-only view of the shared registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Nodes added through this registrar and its clones
    pub fn added(&self) -> usize {
        self.added.load(Ordering::Relaxed)
    }
}
