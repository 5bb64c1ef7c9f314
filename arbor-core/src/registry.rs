// Handler registry: the shared dispatch tree

use crate::context::split_path;
use crate::error::{Error, Result, codes};
use crate::node::{Composite, Handler, NodeRef};
use parking_lot::Mutex;
use std::sync::Arc;

/// The single dispatch tree of a process.
///
/// Reads (`get`, `get_nearest`, dispatch walks) never take the registration
/// lock; mutations are serialized with each other through it. A reader may
/// observe a composite that was created but not populated yet.
pub struct Registry {
    root: NodeRef,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            root: Handler::root(),
            write_lock: Mutex::new(()),
        }
    }

    /// The well-known root composite
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Attach `node` at `path`, creating intermediate composites as needed.
    ///
    /// The last segment of `path` must be one of the node's mappings.
    pub fn add(&self, path: &str, node: NodeRef) -> Result<()> {
        self.add_tracked(path, node).map(|_| ())
    }

    /// [`add`](Self::add), returning the intermediate composites it created,
    /// outermost first
    pub fn add_tracked(&self, path: &str, node: NodeRef) -> Result<Vec<NodeRef>> {
        let segments = split_path(path);
        let parents = check_target(&segments, path, &node)?;
        let mut created = Vec::new();

        let _guard = self.write_lock.lock();

        let mut current = self.root.clone();
        for segment in parents {
            let next = {
                let composite = composite_of(&current, path)?;
                match composite.find_child(segment) {
                    Some(child) if child.is_composite() => child,
                    Some(child) => {
                        return Err(Error::new(
                            codes::LEAF_IN_PATH,
                            format!("`{}` is a leaf and cannot have children", child.name()),
                        )
                        .with_data("path", path)
                        .with_data("segment", segment.as_str()));
                    }
                    None => {
                        let implicit = Handler::implicit(segment);
                        composite.attach(implicit.clone())?;
                        created.push(implicit.clone());
                        implicit
                    }
                }
            };
            current = next;
        }

        composite_of(&current, path)?.attach(node)?;
        tracing::debug!(path = %path, created = created.len(), "handler registered");
        Ok(created)
    }

    /// Check what `add` would reject without touching the tree.
    ///
    /// A concurrent registration can still make the real `add` fail.
    pub fn check_add(&self, path: &str, node: &NodeRef) -> Result<()> {
        let segments = split_path(path);
        let parents = check_target(&segments, path, node)?;
        let mut current = self.root.clone();
        for segment in parents {
            let Some(child) = composite_of(&current, path)?.find_child(segment) else {
                return Ok(());
            };
            current = child;
        }
        composite_of(&current, path).map(|_| ())
    }

    /// Detach the node at `path` from its parent.
    ///
    /// Non-recursive: the removed node keeps its own children.
    pub fn remove(&self, path: &str) -> Result<Option<NodeRef>> {
        let segments = split_path(path);
        let Some((last, parents)) = segments.split_last() else {
            return Err(Error::new(codes::MALFORMED_PATH, "cannot remove the root")
                .with_data("path", path));
        };

        let _guard = self.write_lock.lock();

        let Some(parent) = self.walk(parents) else {
            return Ok(None);
        };
        let Some(composite) = parent.as_composite() else {
            return Ok(None);
        };
        let Some(node) = composite.find_child(last) else {
            return Ok(None);
        };

        composite.detach(&node);
        tracing::debug!(path = %path, "handler removed");
        Ok(Some(node))
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Node at `path`; the empty path is the root
    pub fn get(&self, path: &str) -> Option<NodeRef> {
        self.walk(&split_path(path))
    }

    /// Walk `path` as far as it resolves.
    ///
    /// Returns the first leaf met on the way, or the deepest composite reached.
    pub fn get_nearest(&self, path: &str) -> NodeRef {
        let mut current = self.root.clone();
        for segment in split_path(path) {
            let Some(composite) = current.as_composite() else {
                break;
            };
            let Some(child) = composite.find_child(&segment) else {
                break;
            };
            let is_leaf = child.is_leaf();
            current = child;
            if is_leaf {
                break;
            }
        }
        current
    }

    /// Parent composite of `node`, by tree search
    pub fn owner_of(&self, node: &NodeRef) -> Option<NodeRef> {
        let mut found = None;
        self.visit(|parent, child| {
            if found.is_none() && Arc::ptr_eq(child, node) {
                found = Some(parent.clone());
            }
        });
        found
    }

    /// Canonical mapping-joined path of `node`, by tree search
    pub fn path_of(&self, node: &NodeRef) -> Option<String> {
        if Arc::ptr_eq(node, &self.root) {
            return Some("/".to_string());
        }
        let mut trail = Vec::new();
        if search(&self.root, node, &mut trail) {
            Some(format!("/{}", trail.join("/")))
        } else {
            None
        }
    }

    /// Detach `node` directly from `parent` under the registration lock
    pub fn detach(&self, parent: &NodeRef, node: &NodeRef) -> bool {
        let _guard = self.write_lock.lock();
        parent
            .as_composite()
            .map(|composite| composite.detach(node))
            .unwrap_or(false)
    }

    /// Pre-order walk over every (parent, child) edge
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&NodeRef, &NodeRef),
    {
        visit_from(&self.root, &mut f);
    }

    /// Children of the composite at `path`
    pub fn children(&self, path: &str) -> Vec<NodeRef> {
        self.get(path)
            .and_then(|node| node.as_composite().map(Composite::children))
            .unwrap_or_default()
    }

    /// Number of attached nodes, root excluded
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_composite().is_none_or(Composite::is_empty)
    }

    /// Sorted canonical paths of every attached node
    pub fn snapshot(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut trail = Vec::new();
        collect_paths(&self.root, &mut trail, &mut paths);
        paths.sort();
        paths
    }

    /// Detach the given registry-created composites once they are empty.
    ///
    /// `candidates` is expected outermost first, as [`add_tracked`]
    /// returns them; children are pruned before their parents. Anything
    /// else, including empty composites left behind by [`remove`], stays.
    ///
    /// [`add_tracked`]: Self::add_tracked
    /// [`remove`]: Self::remove
    pub fn prune_implicit(&self, candidates: &[NodeRef]) -> usize {
        let _guard = self.write_lock.lock();
        let mut pruned = 0;
        for candidate in candidates.iter().rev() {
            let prunable = candidate
                .as_composite()
                .is_some_and(|inner| inner.is_implicit() && inner.is_empty());
            if !prunable || !candidate.is_attached() {
                continue;
            }
            if let Some(parent) = self.owner_of(candidate)
                && parent.as_composite().is_some_and(|c| c.detach(candidate))
            {
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "pruned empty intermediate composites");
        }
        pruned
    }

    fn walk(&self, segments: &[String]) -> Option<NodeRef> {
        let mut current = self.root.clone();
        for segment in segments {
            let child = current.as_composite()?.find_child(segment)?;
            current = child;
        }
        Some(current)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the target of an add; returns the parent segments
fn check_target<'s>(segments: &'s [String], path: &str, node: &NodeRef) -> Result<&'s [String]> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(Error::new(codes::MALFORMED_PATH, "cannot register at the root")
            .with_data("path", path));
    };

    if !node.answers_to(last) {
        return Err(Error::new(
            codes::MAPPING_MISMATCH,
            format!("handler `{}` does not answer to `{}`", node.name(), last),
        )
        .with_data("path", path)
        .with_data("mappings", node.mappings().to_vec()));
    }

    if node.is_attached() {
        return Err(Error::new(
            codes::DUPLICATE_ATTACHMENT,
            format!("handler `{}` is already registered", node.name()),
        )
        .with_data("path", path));
    }
    Ok(parents)
}

fn composite_of<'a>(node: &'a NodeRef, path: &str) -> Result<&'a Composite> {
    node.as_composite().ok_or_else(|| {
        Error::new(
            codes::LEAF_IN_PATH,
            format!("`{}` is a leaf and cannot have children", node.name()),
        )
        .with_data("path", path)
    })
}

fn visit_from<F>(parent: &NodeRef, f: &mut F)
where
    F: FnMut(&NodeRef, &NodeRef),
{
    let Some(composite) = parent.as_composite() else {
        return;
    };
    for child in composite.children() {
        f(parent, &child);
        visit_from(&child, f);
    }
}

fn search(current: &NodeRef, target: &NodeRef, trail: &mut Vec<String>) -> bool {
    let Some(composite) = current.as_composite() else {
        return false;
    };
    for child in composite.children() {
        trail.push(child.name().to_string());
        if Arc::ptr_eq(&child, target) || search(&child, target, trail) {
            return true;
        }
        trail.pop();
    }
    false
}

fn collect_paths(current: &NodeRef, trail: &mut Vec<String>, out: &mut Vec<String>) {
    let Some(composite) = current.as_composite() else {
        return;
    };
    for child in composite.children() {
        trail.push(child.name().to_string());
        out.push(format!("/{}", trail.join("/")));
        collect_paths(&child, trail, out);
        trail.pop();
    }
}
