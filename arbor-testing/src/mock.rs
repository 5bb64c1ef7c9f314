// Mock collaborators for testing

use arbor_core::{Authorizer, Call, Execute, GrantSet, RequestContext, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One recorded leaf invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Consumed path at the time of the call
    pub path: String,
    /// Every declared parameter, resolved
    pub params: Map<String, Value>,
    pub caller: Option<String>,
}

/// Leaf action that records each invocation.
///
/// Returns its configured value, or echoes the resolved parameters when none
/// is set. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingLeaf {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    returns: Option<Value>,
}

impl RecordingLeaf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `value` instead of echoing parameters
    pub fn returning(mut self, value: Value) -> Self {
        self.returns = Some(value);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }

    pub fn was_called(&self) -> bool {
        self.call_count() > 0
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Execute for RecordingLeaf {
    async fn execute(&self, call: &mut Call<'_>) -> Result<Value> {
        let params = call.params()?;
        let ctx = call.context();
        self.calls.lock().push(RecordedCall {
            path: ctx.path_string(),
            params: params.clone(),
            caller: ctx.caller().map(str::to_string),
        });
        Ok(self.returns.clone().unwrap_or(Value::Object(params)))
    }
}

/// Authorizer backed by a fixed caller -> grants table.
///
/// Callers not in the table, and anonymous requests, hold no grants.
#[derive(Default)]
pub struct StaticAuthorizer {
    table: HashMap<String, GrantSet>,
    queries: AtomicUsize,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I, S>(mut self, caller: impl Into<String>, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let held = self.table.entry(caller.into()).or_default();
        for grant in grants {
            held.insert(grant.as_ref());
        }
        self
    }

    /// Grants held by `caller`
    pub fn held(&self, caller: &str) -> GrantSet {
        self.table.get(caller).cloned().unwrap_or_default()
    }

    /// How many times the router consulted this authorizer
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn has_grants(&self, ctx: &RequestContext, grants: &GrantSet) -> Result<bool> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let held = ctx.caller().map(|caller| self.held(caller)).unwrap_or_default();
        Ok(grants.is_subset(&held))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_authorizer() {
        let authorizer = StaticAuthorizer::new()
            .grant("admin", ["Widget_Select", "widget_purge"])
            .grant("viewer", ["widget_select"]);

        let required: GrantSet = ["widget_purge"].into_iter().collect();
        let admin = RequestContext::new("/").with_caller("admin");
        let viewer = RequestContext::new("/").with_caller("viewer");
        let anonymous = RequestContext::new("/");

        assert!(authorizer.has_grants(&admin, &required).await.unwrap());
        assert!(!authorizer.has_grants(&viewer, &required).await.unwrap());
        assert!(!authorizer.has_grants(&anonymous, &required).await.unwrap());
        assert!(authorizer.held("admin").contains("widget_select"));
        assert_eq!(authorizer.queries(), 3);
    }

    #[test]
    fn test_recording_leaf_clones_share_record() {
        let leaf = RecordingLeaf::new().returning(Value::Bool(true));
        let clone = leaf.clone();
        clone.calls.lock().push(RecordedCall {
            path: "/x".to_string(),
            params: Map::new(),
            caller: None,
        });
        assert_eq!(leaf.call_count(), 1);
        assert_eq!(leaf.last_call().unwrap().path, "/x");
        leaf.clear();
        assert!(!clone.was_called());
    }
}
