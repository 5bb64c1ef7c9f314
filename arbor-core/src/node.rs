//! Handler tree nodes.
//!
//! A [`Handler`] is either a *Composite* (owns named children and an optional
//! index behavior) or a *Leaf* (owns parameters and an executable action).
//! Nodes are shared as [`NodeRef`]s so the same instance can be walked by any
//! number of concurrent requests; children lists are the only mutable part and
//! sit behind a read-mostly lock.

use crate::error::{Error, Result, codes};
use crate::guard::GrantSet;
use crate::parameter::{Parameter, ParameterDescription};
use crate::router::Call;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared handle to a node in the tree
pub type NodeRef = Arc<Handler>;

/// Opaque identifier of the bundle that created a set of nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(Arc<str>);

impl OwnerKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Key for a bundle directory
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Executable contract of a leaf, or the index behavior of a composite.
///
/// The same instance may run concurrently for many requests; per-call state
/// belongs in the [`Call`], not in `self`.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, call: &mut Call<'_>) -> Result<Value>;
}

/// [`Execute`] backed by a synchronous closure
pub struct FnExecute<F>(F);

/// Wrap a closure as an [`Execute`] implementation
pub fn from_fn<F>(f: F) -> FnExecute<F>
where
    F: Fn(&mut Call<'_>) -> Result<Value> + Send + Sync,
{
    FnExecute(f)
}

#[async_trait]
impl<F> Execute for FnExecute<F>
where
    F: Fn(&mut Call<'_>) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &mut Call<'_>) -> Result<Value> {
        (self.0)(call)
    }
}

/// Composite variant: named children plus optional index behavior
pub struct Composite {
    children: RwLock<Vec<NodeRef>>,
    index: Option<Arc<dyn Execute>>,
    implicit: bool,
}

impl Composite {
    /// Attach `node` as the last child.
    ///
    /// Fails if `node` is already attached anywhere in the tree.
    pub fn attach(&self, node: NodeRef) -> Result<()> {
        if node
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(
                codes::DUPLICATE_ATTACHMENT,
                format!("handler `{}` is already attached", node.name()),
            )
            .with_data("handler", node.name()));
        }
        self.children.write().push(node);
        Ok(())
    }

    /// Detach `node` (by identity). Returns false if it was not a child.
    pub fn detach(&self, node: &NodeRef) -> bool {
        let mut children = self.children.write();
        let Some(position) = children.iter().position(|c| Arc::ptr_eq(c, node)) else {
            return false;
        };
        let removed = children.remove(position);
        removed.attached.store(false, Ordering::Release);
        true
    }

    /// First child answering to `segment`
    pub fn find_child(&self, segment: &str) -> Option<NodeRef> {
        let segment = segment.to_lowercase();
        self.children
            .read()
            .iter()
            .find(|child| child.mappings.contains(&segment))
            .cloned()
    }

    /// Snapshot of the current children, in attachment order
    pub fn children(&self) -> Vec<NodeRef> {
        self.children.read().clone()
    }

    pub fn contains(&self, node: &NodeRef) -> bool {
        self.children.read().iter().any(|c| Arc::ptr_eq(c, node))
    }

    pub fn is_empty(&self) -> bool {
        self.children.read().is_empty()
    }

    pub fn index(&self) -> Option<&Arc<dyn Execute>> {
        self.index.as_ref()
    }

    /// Created by the registry as an intermediate path segment
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}

/// Leaf variant: parameters plus the executable action
pub struct Leaf {
    parameters: Vec<Parameter>,
    action: Arc<dyn Execute>,
}

impl Leaf {
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// First declared parameter answering to `name`
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.answers_to(name))
    }

    pub fn action(&self) -> &Arc<dyn Execute> {
        &self.action
    }
}

pub enum HandlerKind {
    Composite(Composite),
    Leaf(Leaf),
}

/// Named, mapped unit of the dispatch tree
pub struct Handler {
    mappings: Vec<String>,
    grants: GrantSet,
    description: String,
    return_description: String,
    kind: HandlerKind,
    attached: AtomicBool,
    owner: OnceLock<OwnerKey>,
}

impl Handler {
    /// Start building a composite answering to `name`
    pub fn composite(name: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder::new(name.into(), BuilderKind::Composite { index: None })
    }

    /// Start building a leaf answering to `name`
    pub fn leaf(name: impl Into<String>, action: impl Execute + 'static) -> HandlerBuilder {
        HandlerBuilder::new(
            name.into(),
            BuilderKind::Leaf {
                parameters: Vec::new(),
                action: Arc::new(action),
            },
        )
    }

    pub(crate) fn root() -> NodeRef {
        let root = Handler::composite("").build();
        root.attached.store(true, Ordering::Release);
        root
    }

    pub(crate) fn implicit(segment: &str) -> NodeRef {
        let mut builder = Handler::composite(segment);
        builder.implicit = true;
        builder.build()
    }

    /// Canonical (first) mapping
    pub fn name(&self) -> &str {
        self.mappings.first().map(String::as_str).unwrap_or_default()
    }

    pub fn mappings(&self) -> &[String] {
        &self.mappings
    }

    /// Check whether `segment` is one of the mappings (case-insensitive)
    pub fn answers_to(&self, segment: &str) -> bool {
        let segment = segment.to_lowercase();
        self.mappings.contains(&segment)
    }

    pub fn grants(&self) -> &GrantSet {
        &self.grants
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn return_description(&self) -> &str {
        &self.return_description
    }

    pub fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match &self.kind {
            HandlerKind::Composite(composite) => Some(composite),
            HandlerKind::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match &self.kind {
            HandlerKind::Leaf(leaf) => Some(leaf),
            HandlerKind::Composite(_) => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.as_composite().is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.as_leaf().is_some()
    }

    /// Whether this node currently has a parent
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Owner key of the bundle that registered this node
    pub fn owner(&self) -> Option<&OwnerKey> {
        self.owner.get()
    }

    /// Stamp the owning bundle. A node belongs to at most one bundle.
    pub fn set_owner(&self, key: OwnerKey) -> Result<()> {
        let current = self.owner.get_or_init(|| key.clone());
        if *current == key {
            Ok(())
        } else {
            Err(Error::new(
                codes::OWNER_CONFLICT,
                format!("handler `{}` already belongs to `{}`", self.name(), current),
            )
            .with_data("handler", self.name())
            .with_data("owner", current.as_str())
            .with_data("requested", key.as_str()))
        }
    }

    /// Serializable self-description used for help output
    pub fn describe(&self) -> HandlerDescription {
        let (kind, parameters, children) = match &self.kind {
            HandlerKind::Leaf(leaf) => (
                NodeKind::Leaf,
                leaf.parameters.iter().map(Parameter::description).collect(),
                Vec::new(),
            ),
            HandlerKind::Composite(composite) => (
                NodeKind::Composite,
                Vec::new(),
                composite
                    .children()
                    .iter()
                    .map(|child| child.name().to_string())
                    .collect(),
            ),
        };

        HandlerDescription {
            name: self.name().to_string(),
            mappings: self.mappings.clone(),
            grants: self.grants.iter().map(str::to_string).collect(),
            description: self.description.clone(),
            return_description: self.return_description.clone(),
            kind,
            parameters,
            children,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HandlerKind::Composite(_) => "Composite",
            HandlerKind::Leaf(_) => "Leaf",
        };
        f.debug_struct(kind)
            .field("mappings", &self.mappings)
            .field("grants", &self.grants)
            .field("owner", &self.owner.get())
            .finish()
    }
}

enum BuilderKind {
    Composite {
        index: Option<Arc<dyn Execute>>,
    },
    Leaf {
        parameters: Vec<Parameter>,
        action: Arc<dyn Execute>,
    },
}

/// Builder returned by [`Handler::composite`] and [`Handler::leaf`]
pub struct HandlerBuilder {
    mappings: Vec<String>,
    grants: GrantSet,
    description: String,
    return_description: String,
    kind: BuilderKind,
    implicit: bool,
}

impl HandlerBuilder {
    fn new(name: String, kind: BuilderKind) -> Self {
        let name = name.trim().to_lowercase();
        Self {
            mappings: if name.is_empty() { Vec::new() } else { vec![name] },
            grants: GrantSet::new(),
            description: String::new(),
            return_description: String::new(),
            kind,
            implicit: false,
        }
    }

    /// Add an alternative path segment; duplicates are ignored
    pub fn mapping(mut self, mapping: impl Into<String>) -> Self {
        let mapping = mapping.into().trim().to_lowercase();
        if !mapping.is_empty() && !self.mappings.contains(&mapping) {
            self.mappings.push(mapping);
        }
        self
    }

    /// Require a grant to resolve this node
    pub fn grant(mut self, grant: impl AsRef<str>) -> Self {
        self.grants.insert(grant.as_ref());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn returns(mut self, description: impl Into<String>) -> Self {
        self.return_description = description.into();
        self
    }

    /// Declare a parameter. Ignored for composites.
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        if let BuilderKind::Leaf { parameters, .. } = &mut self.kind {
            parameters.push(parameter);
        }
        self
    }

    /// Default behavior of a composite when a lookup misses. Ignored for leaves.
    pub fn index(mut self, action: impl Execute + 'static) -> Self {
        if let BuilderKind::Composite { index } = &mut self.kind {
            *index = Some(Arc::new(action));
        }
        self
    }

    pub fn build(self) -> NodeRef {
        let kind = match self.kind {
            BuilderKind::Composite { index } => HandlerKind::Composite(Composite {
                children: RwLock::new(Vec::new()),
                index,
                implicit: self.implicit,
            }),
            BuilderKind::Leaf { parameters, action } => {
                HandlerKind::Leaf(Leaf { parameters, action })
            }
        };

        Arc::new(Handler {
            mappings: self.mappings,
            grants: self.grants,
            description: self.description,
            return_description: self.return_description,
            kind,
            attached: AtomicBool::new(false),
            owner: OnceLock::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Composite,
    Leaf,
}

/// Help-output view of a [`Handler`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDescription {
    pub name: String,
    pub mappings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub return_description: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDescription>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> FnExecute<impl Fn(&mut Call<'_>) -> Result<Value> + Send + Sync> {
        from_fn(|_call: &mut Call<'_>| Ok(Value::Null))
    }

    #[test]
    fn test_mappings_case_folded() {
        let node = Handler::leaf("Select", noop()).mapping("SEL").mapping("select").build();
        assert_eq!(node.mappings(), &["select".to_string(), "sel".to_string()]);
        assert!(node.answers_to("SeLeCt"));
        assert!(node.answers_to("Sel"));
        assert_eq!(node.name(), "select");
    }

    #[test]
    fn test_attach_is_unique() {
        let first = Handler::composite("first").build();
        let second = Handler::composite("second").build();
        let leaf = Handler::leaf("leaf", noop()).build();

        let parent_a = first.as_composite().unwrap();
        let parent_b = second.as_composite().unwrap();

        parent_a.attach(leaf.clone()).unwrap();
        let err = parent_b.attach(leaf.clone()).unwrap_err();
        assert_eq!(err.code(), codes::DUPLICATE_ATTACHMENT);
        // re-attaching to the same parent is just as fatal
        assert!(parent_a.attach(leaf.clone()).is_err());

        assert!(parent_a.detach(&leaf));
        assert!(!leaf.is_attached());
        parent_b.attach(leaf.clone()).unwrap();
        assert!(parent_b.contains(&leaf));
        assert!(!parent_a.contains(&leaf));
    }

    #[test]
    fn test_find_child_first_match_wins() {
        let parent = Handler::composite("p").build();
        let composite = parent.as_composite().unwrap();
        let a = Handler::leaf("dup", noop()).description("a").build();
        let b = Handler::leaf("dup", noop()).description("b").build();
        composite.attach(a).unwrap();
        composite.attach(b).unwrap();

        let found = composite.find_child("DUP").unwrap();
        assert_eq!(found.description(), "a");
    }

    #[test]
    fn test_owner_is_stamped_once() {
        let node = Handler::leaf("x", noop()).build();
        node.set_owner(OwnerKey::new("/bundles/a")).unwrap();
        node.set_owner(OwnerKey::new("/bundles/a")).unwrap();

        let err = node.set_owner(OwnerKey::new("/bundles/b")).unwrap_err();
        assert_eq!(err.code(), codes::OWNER_CONFLICT);
        assert_eq!(node.owner().map(OwnerKey::as_str), Some("/bundles/a"));
    }

    #[test]
    fn test_builder_ignores_mismatched_parts() {
        let composite = Handler::composite("c")
            .parameter(Parameter::new("ignored"))
            .build();
        assert!(composite.describe().parameters.is_empty());

        let leaf = Handler::leaf("l", noop()).index(noop()).build();
        assert!(leaf.is_leaf());
    }

    #[test]
    fn test_describe_leaf() {
        let node = Handler::leaf("select", noop())
            .grant("WIDGET_SELECT")
            .description("Pick widgets")
            .returns("A list of widgets")
            .parameter(Parameter::new("id").optional())
            .build();

        let value = serde_json::to_value(node.describe()).unwrap();
        assert_eq!(value["name"], "select");
        assert_eq!(value["kind"], "leaf");
        assert_eq!(value["grants"], json!(["widget_select"]));
        assert_eq!(value["returnDescription"], "A list of widgets");
        assert_eq!(value["parameters"][0]["name"], "id");
        assert!(value.get("children").is_none());
    }

    #[test]
    fn test_describe_composite_lists_children() {
        let node = Handler::composite("widgets").build();
        let composite = node.as_composite().unwrap();
        composite.attach(Handler::leaf("select", noop()).build()).unwrap();
        composite.attach(Handler::composite("admin").build()).unwrap();

        let description = node.describe();
        assert_eq!(description.kind, NodeKind::Composite);
        assert_eq!(description.children, vec!["select", "admin"]);
    }
}
