//! Request resolution.
//!
//! The [`Router`] walks the [`Registry`] along the pending segments of a
//! [`RequestContext`] and ends in exactly one of three terminal states:
//!
//! * **Help**: the next segment is the help keyword; the current node is
//!   authorized and returned unexecuted.
//! * **Executed**: a leaf matched, or no child matched and the current
//!   composite's index behavior ran instead (the fallback never fails).
//! * **Error**: authorization, validation, routing or execution failed.
//!
//! A leaf may re-enter resolution for a different path through
//! [`Call::forward`] without leaving the request.

use crate::context::RequestContext;
use crate::error::{Error, Result, codes};
use crate::guard::{self, Authorizer};
use crate::node::{HandlerKind, NodeRef};
use crate::parameter::Resolved;
use crate::registry::Registry;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Default segment that short-circuits resolution into help
pub const DEFAULT_HELP_KEYWORD: &str = "help";

/// Default bound on nested forwards within one request
pub const DEFAULT_MAX_FORWARDS: usize = 16;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal, successful result of a resolution
#[derive(Debug)]
pub enum Outcome {
    /// A node returned unexecuted because help was requested
    Help(NodeRef),
    /// The value produced by the resolved node
    Executed(Value),
}

impl Outcome {
    pub fn is_help(&self) -> bool {
        matches!(self, Outcome::Help(_))
    }

    pub fn help_node(&self) -> Option<&NodeRef> {
        match self {
            Outcome::Help(node) => Some(node),
            Outcome::Executed(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Executed(value) => Some(value),
            Outcome::Help(_) => None,
        }
    }

    /// Value for the output formatter; help becomes the node description
    pub fn into_value(self) -> Result<Value> {
        match self {
            Outcome::Executed(value) => Ok(value),
            Outcome::Help(node) => serde_json::to_value(node.describe()).map_err(Error::wrap),
        }
    }
}

/// Resolves requests against a shared [`Registry`]
pub struct Router {
    registry: Arc<Registry>,
    authorizer: Arc<dyn Authorizer>,
    help_keyword: String,
    max_forwards: usize,
}

impl Router {
    pub fn new(registry: Arc<Registry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
            help_keyword: DEFAULT_HELP_KEYWORD.to_string(),
            max_forwards: DEFAULT_MAX_FORWARDS,
        }
    }

    pub fn with_help_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.help_keyword = keyword.into().to_lowercase();
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: usize) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn help_keyword(&self) -> &str {
        &self.help_keyword
    }

    /// Resolve `ctx` to exactly one outcome
    pub fn dispatch<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<Outcome>> {
        Box::pin(self.resolve(ctx))
    }

    /// Re-seed the pending segments from `path` and resolve again.
    ///
    /// With `relative` the last consumed segment is dropped, so `path` is
    /// resolved against the parent of the forwarding node; otherwise the
    /// consumed path is cleared and `path` resolves from the root.
    pub fn forward<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        path: &'a str,
        relative: bool,
    ) -> BoxFuture<'a, Result<Outcome>> {
        Box::pin(async move {
            let depth = ctx.enter_forward();
            if depth > self.max_forwards {
                ctx.leave_forward();
                return Err(Error::new(
                    codes::FORWARD_LIMIT,
                    format!("more than {} nested forwards", self.max_forwards),
                )
                .with_data("path", path));
            }

            if relative {
                ctx.pop_path();
            } else {
                ctx.reset_path();
            }
            ctx.reseed(path);
            tracing::debug!(to = %path, relative, depth, "forwarding request");

            let outcome = self.resolve(ctx).await;
            ctx.leave_forward();
            outcome
        })
    }

    async fn resolve(&self, ctx: &mut RequestContext) -> Result<Outcome> {
        let mut current = self.replay(ctx)?;

        loop {
            if self.help_requested(ctx) {
                ctx.pop_action();
                self.authorize(ctx, &current).await?;
                tracing::trace!(handler = %current.name(), "help requested");
                return Ok(Outcome::Help(current));
            }

            let child = match (ctx.peek_action(), current.as_composite()) {
                (Some(segment), Some(composite)) => composite.find_child(segment),
                _ => None,
            };

            let Some(child) = child else {
                tracing::trace!(
                    handler = %current.name(),
                    next = ?ctx.peek_action(),
                    "no matching child, using composite fallback"
                );
                self.authorize(ctx, &current).await?;
                return self.invoke(ctx, current).await.map(Outcome::Executed);
            };

            ctx.consume_action();

            if child.is_leaf() {
                if self.help_requested(ctx) {
                    ctx.pop_action();
                    self.authorize(ctx, &child).await?;
                    tracing::trace!(handler = %child.name(), "help requested");
                    return Ok(Outcome::Help(child));
                }
                self.authorize(ctx, &child).await?;
                return self.invoke(ctx, child).await.map(Outcome::Executed);
            }

            current = child;
        }
    }

    /// Walk the already-consumed path; every segment must be a composite
    fn replay(&self, ctx: &RequestContext) -> Result<NodeRef> {
        let mut current = self.registry.root().clone();
        for segment in ctx.consumed_path() {
            let next = current
                .as_composite()
                .and_then(|composite| composite.find_child(segment))
                .filter(|node| node.is_composite());

            current = next.ok_or_else(|| {
                Error::new(
                    codes::ROUTE_INCONSISTENT,
                    format!("consumed path no longer resolves at `{}`", segment),
                )
                .with_data("path", ctx.path_string())
            })?;
        }
        Ok(current)
    }

    fn help_requested(&self, ctx: &RequestContext) -> bool {
        ctx.peek_action()
            .is_some_and(|segment| segment == self.help_keyword)
    }

    async fn authorize(&self, ctx: &RequestContext, node: &NodeRef) -> Result<()> {
        guard::authorize(self.authorizer.as_ref(), ctx, node.name(), node.grants()).await
    }

    async fn invoke(&self, ctx: &mut RequestContext, node: NodeRef) -> Result<Value> {
        let action = match node.kind() {
            HandlerKind::Leaf(leaf) => Some(leaf.action().clone()),
            HandlerKind::Composite(composite) => composite.index().cloned(),
        };

        let Some(action) = action else {
            return serde_json::to_value(node.describe()).map_err(Error::wrap);
        };

        tracing::debug!(handler = %node.name(), path = %ctx.path_string(), "executing handler");

        let previous_owner = ctx.replace_owner(node.owner().cloned());
        let result = {
            let mut call = Call {
                router: self,
                ctx: &mut *ctx,
                node: &node,
            };
            AssertUnwindSafe(action.execute(&mut call))
                .catch_unwind()
                .await
        };
        ctx.replace_owner(previous_owner);

        match result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(handler = %node.name(), panic = %message, "handler panicked");
                Err(
                    Error::runtime(format!("handler `{}` failed: {}", node.name(), message))
                        .with_data("handler", node.name()),
                )
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One invocation of a node, handed to [`Execute`](crate::node::Execute)
pub struct Call<'a> {
    router: &'a Router,
    ctx: &'a mut RequestContext,
    node: &'a NodeRef,
}

impl<'a> Call<'a> {
    /// The node being executed
    pub fn node(&self) -> &NodeRef {
        self.node
    }

    pub fn context(&self) -> &RequestContext {
        &*self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut *self.ctx
    }

    pub fn router(&self) -> &Router {
        self.router
    }

    /// Resolve and validate a declared parameter of the executing leaf
    pub fn param(&self, name: &str) -> Result<Resolved> {
        let parameter = self
            .node
            .as_leaf()
            .and_then(|leaf| leaf.parameter(name))
            .ok_or_else(|| {
                Error::new(
                    codes::UNKNOWN_PARAMETER,
                    format!("`{}` declares no parameter `{}`", self.node.name(), name),
                )
                .with_data("handler", self.node.name())
                .with_data("parameter", name)
            })?;

        Ok(parameter.resolve(self.context())?)
    }

    /// Resolve every declared parameter, keyed by canonical name
    pub fn params(&self) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        if let Some(leaf) = self.node.as_leaf() {
            for parameter in leaf.parameters() {
                let value = parameter.resolve(self.context())?;
                resolved.insert(
                    parameter.name().to_string(),
                    serde_json::to_value(value).map_err(Error::wrap)?,
                );
            }
        }
        Ok(resolved)
    }

    /// Redirect internally to `path`; see [`Router::forward`]
    pub async fn forward(&mut self, path: &str, relative: bool) -> Result<Outcome> {
        self.router.forward(&mut *self.ctx, path, relative).await
    }
}
