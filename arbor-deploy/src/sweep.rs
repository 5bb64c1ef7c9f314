// Recursive owner sweep
//
// `Registry::remove` only detaches one node from one parent. Undeploy needs
// every node a bundle registered, wherever it sits in the tree, so it walks
// the whole registry and detaches by owner key instead of by position.

use arbor_core::{NodeRef, OwnerKey, Registry};
use std::sync::Arc;

/// What an owner sweep detached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Owned nodes detached from their parent
    pub detached: usize,
    /// Descendants detached because an owned composite left the tree
    pub orphaned: usize,
    /// Empty intermediate composites pruned afterwards
    pub pruned: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.detached + self.orphaned + self.pruned
    }
}

/// Detach every node owned by `owner`, then their orphaned descendants.
///
/// `created` lists the intermediate composites the owner's registrations
/// created; those left empty are pruned. No other composite is touched.
pub fn sweep(registry: &Registry, owner: &OwnerKey, created: &[NodeRef]) -> SweepReport {
    let mut owned: Vec<(NodeRef, NodeRef)> = Vec::new();
    registry.visit(|parent, child| {
        if child.owner() == Some(owner) {
            owned.push((parent.clone(), child.clone()));
        }
    });

    let mut report = SweepReport::default();
    for (parent, node) in &owned {
        if registry.detach(parent, node) {
            report.detached += 1;
        }
        report.orphaned += detach_descendants(node, owner);
    }
    report.pruned = registry.prune_implicit(created);

    tracing::debug!(
        bundle = %owner,
        detached = report.detached,
        orphaned = report.orphaned,
        pruned = report.pruned,
        "owner sweep finished"
    );
    report
}

// Owned descendants are left for the sweep's own pass so they count once
fn detach_descendants(node: &NodeRef, owner: &OwnerKey) -> usize {
    let Some(composite) = node.as_composite() else {
        return 0;
    };
    let mut count = 0;
    for child in composite.children() {
        count += detach_descendants(&child, owner);
        if child.owner() != Some(owner) && composite.detach(&child) {
            count += 1;
        }
    }
    count
}

/// Whether any attached node still carries `owner`
pub fn owns_any(registry: &Registry, owner: &OwnerKey) -> bool {
    let mut found = false;
    registry.visit(|_, child| found |= child.owner() == Some(owner));
    found
}

/// Attached nodes carrying `owner`
pub fn owned_nodes(registry: &Registry, owner: &OwnerKey) -> Vec<NodeRef> {
    let mut nodes = Vec::new();
    registry.visit(|_, child| {
        if child.owner() == Some(owner) && !nodes.iter().any(|n| Arc::ptr_eq(n, child)) {
            nodes.push(child.clone());
        }
    });
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Call, Handler, Result, from_fn};
    use serde_json::Value;

    fn owned_leaf(name: &str, owner: &OwnerKey) -> NodeRef {
        let node = Handler::leaf(name, from_fn(|_call: &mut Call<'_>| -> Result<Value> {
            Ok(Value::Null)
        }))
        .build();
        node.set_owner(owner.clone()).unwrap();
        node
    }

    #[test]
    fn test_sweep_restores_previous_tree() {
        let registry = Registry::new();
        let stranger = OwnerKey::new("/b/other");
        registry.add("/core/ping", owned_leaf("ping", &stranger)).unwrap();
        let before = registry.snapshot();

        let owner = OwnerKey::new("/b/reports");
        let mut created = Vec::new();
        for (path, name) in [
            ("/reports/daily", "daily"),
            ("/reports/deep/weekly", "weekly"),
            ("/core/report-status", "report-status"),
        ] {
            created.extend(registry.add_tracked(path, owned_leaf(name, &owner)).unwrap());
        }

        let report = sweep(&registry, &owner, &created);
        assert_eq!(report.detached, 3);
        assert_eq!(report.orphaned, 0);
        assert_eq!(report.pruned, 2);
        assert_eq!(registry.snapshot(), before);
        assert!(!owns_any(&registry, &owner));
    }

    #[test]
    fn test_owned_composite_orphans_foreign_children() {
        let registry = Registry::new();
        let owner = OwnerKey::new("/b/admin");
        let composite = Handler::composite("admin").build();
        composite.set_owner(owner.clone()).unwrap();
        registry.add("/admin", composite.clone()).unwrap();

        let foreign = owned_leaf("purge", &OwnerKey::new("/b/other"));
        registry.add("/admin/purge", foreign.clone()).unwrap();
        let nested = owned_leaf("users", &owner);
        registry.add("/admin/users", nested.clone()).unwrap();

        let report = sweep(&registry, &owner, &[]);
        // `users` is detached from the already detached composite
        assert_eq!(report.detached, 2);
        assert_eq!(report.orphaned, 1);
        assert!(registry.is_empty());
        assert!(!composite.is_attached());
        assert!(!foreign.is_attached());
        assert!(!nested.is_attached());
    }

    #[test]
    fn test_sweep_leaves_foreign_empty_composites() {
        let registry = Registry::new();
        let stranger = OwnerKey::new("/b/other");
        registry.add("/static/tmp", owned_leaf("tmp", &stranger)).unwrap();
        registry.remove("/static/tmp").unwrap();
        let before = registry.snapshot();
        assert_eq!(before, vec!["/static"]);

        let owner = OwnerKey::new("/b/bundle");
        let created = registry.add_tracked("/bundle/x", owned_leaf("x", &owner)).unwrap();
        let report = sweep(&registry, &owner, &created);
        assert_eq!(report.detached, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_owned_nodes_lists_each_once() {
        let registry = Registry::new();
        let owner = OwnerKey::new("/b/x");
        registry.add("/a/one", owned_leaf("one", &owner)).unwrap();
        registry.add("/a/two", owned_leaf("two", &owner)).unwrap();
        assert_eq!(owned_nodes(&registry, &owner).len(), 2);
        assert!(owned_nodes(&registry, &OwnerKey::new("/b/y")).is_empty());
    }
}
