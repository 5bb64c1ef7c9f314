// Grant checks for handler protection

use crate::context::RequestContext;
use crate::error::{Error, Result, codes};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Case-folded set of authorization tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GrantSet(BTreeSet<String>);

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, grant: &str) -> bool {
        let grant = grant.trim();
        if grant.is_empty() {
            return false;
        }
        self.0.insert(grant.to_lowercase())
    }

    pub fn contains(&self, grant: &str) -> bool {
        self.0.contains(&grant.to_lowercase())
    }

    /// Check whether every grant in `self` is also in `other`
    pub fn is_subset(&self, other: &GrantSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for GrantSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = GrantSet::new();
        for grant in iter {
            set.insert(grant.as_ref());
        }
        set
    }
}

impl fmt::Display for GrantSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grants: Vec<&str> = self.iter().collect();
        write!(f, "[{}]", grants.join(", "))
    }
}

/// External authorization collaborator.
///
/// Asked whether the caller of a request holds *all* of `grants`. Returning
/// `Err` signals that the check itself failed (e.g. the identity store was
/// unreachable), not that access was refused.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_grants(&self, ctx: &RequestContext, grants: &GrantSet) -> Result<bool>;
}

/// Grants everything
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn has_grants(&self, _ctx: &RequestContext, _grants: &GrantSet) -> Result<bool> {
        Ok(true)
    }
}

/// Grants nothing
pub struct DenyAll;

#[async_trait]
impl Authorizer for DenyAll {
    async fn has_grants(&self, _ctx: &RequestContext, grants: &GrantSet) -> Result<bool> {
        Ok(grants.is_empty())
    }
}

/// Authorizer from a closure
pub struct CustomAuthorizer<F>
where
    F: Fn(&RequestContext, &GrantSet) -> Result<bool> + Send + Sync,
{
    predicate: F,
}

impl<F> CustomAuthorizer<F>
where
    F: Fn(&RequestContext, &GrantSet) -> Result<bool> + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Authorizer for CustomAuthorizer<F>
where
    F: Fn(&RequestContext, &GrantSet) -> Result<bool> + Send + Sync,
{
    async fn has_grants(&self, ctx: &RequestContext, grants: &GrantSet) -> Result<bool> {
        (self.predicate)(ctx, grants)
    }
}

/// Authorize `ctx` against a node's required grants.
///
/// An empty set passes trivially, as does a set covered by the grants the
/// request was elevated with during a forward.
pub async fn authorize(
    authorizer: &dyn Authorizer,
    ctx: &RequestContext,
    node: &str,
    grants: &GrantSet,
) -> Result<()> {
    if grants.is_empty() || grants.is_subset(ctx.elevated()) {
        return Ok(());
    }

    let allowed = authorizer.has_grants(ctx, grants).await.map_err(|e| {
        Error::new(codes::AUTHORIZATION_FAILED, "authorization check failed")
            .with_data("handler", node)
            .with_source(e)
    })?;

    if allowed {
        Ok(())
    } else {
        tracing::debug!(handler = %node, grants = %grants, caller = ?ctx.caller(), "access denied");
        Err(Error::new(codes::ACCESS_DENIED, format!("access denied to `{}`", node))
            .with_data("handler", node)
            .with_data("grants", grants.iter().collect::<Vec<_>>()))
    }
}
