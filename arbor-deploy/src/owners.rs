// Owner key -> module context map

use crate::context::ModuleContext;
use arbor_core::{Error, OwnerKey, Result, codes};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Live module contexts, keyed by bundle owner key
#[derive(Default)]
pub struct OwnerMap {
    entries: RwLock<HashMap<OwnerKey, Arc<ModuleContext>>>,
}

impl OwnerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the context's owner key; fails if the key is taken
    pub fn insert(&self, context: Arc<ModuleContext>) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(context.owner()) {
            return Err(Error::new(
                codes::ALREADY_DEPLOYED,
                format!("bundle `{}` is already deployed", context.owner()),
            )
            .with_data("bundle", context.owner().as_str()));
        }
        entries.insert(context.owner().clone(), context);
        Ok(())
    }

    pub fn get(&self, key: &OwnerKey) -> Option<Arc<ModuleContext>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &OwnerKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Whether `context` itself, not merely its key, is mapped
    pub fn is_current(&self, context: &Arc<ModuleContext>) -> bool {
        self.entries
            .read()
            .get(context.owner())
            .is_some_and(|live| Arc::ptr_eq(live, context))
    }

    pub fn remove(&self, key: &OwnerKey) -> Option<Arc<ModuleContext>> {
        self.entries.write().remove(key)
    }

    /// Remove `context` only if it is still the mapped one
    pub fn remove_if_current(&self, context: &Arc<ModuleContext>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(context.owner()) {
            Some(live) if Arc::ptr_eq(live, context) => {
                entries.remove(context.owner());
                true
            }
            _ => false,
        }
    }

    /// Mapped keys, sorted
    pub fn keys(&self) -> Vec<OwnerKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BaseContext;
    use crate::descriptor::BundleDescriptor;
    use std::path::Path;

    fn context(dir: &str) -> Arc<ModuleContext> {
        Arc::new(ModuleContext::new(
            Path::new(dir),
            BundleDescriptor::parse("initializer = \"x\"").unwrap(),
            Vec::new(),
            Arc::new(BaseContext::new()),
        ))
    }

    #[test]
    fn test_insert_conflict() {
        let owners = OwnerMap::new();
        owners.insert(context("/b/one")).unwrap();
        let err = owners.insert(context("/b/one")).unwrap_err();
        assert_eq!(err.code(), codes::ALREADY_DEPLOYED);
        assert_eq!(owners.len(), 1);
    }

    #[test]
    fn test_identity_not_key() {
        let owners = OwnerMap::new();
        let first = context("/b/one");
        owners.insert(first.clone()).unwrap();
        assert!(owners.is_current(&first));

        let second = context("/b/one");
        assert!(!owners.is_current(&second));
        assert!(!owners.remove_if_current(&second));
        assert!(owners.remove_if_current(&first));
        assert!(owners.is_empty());
    }

    #[test]
    fn test_keys_sorted() {
        let owners = OwnerMap::new();
        owners.insert(context("/b/zeta")).unwrap();
        owners.insert(context("/b/alpha")).unwrap();
        let keys: Vec<_> = owners.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["/b/alpha", "/b/zeta"]);
    }
}
