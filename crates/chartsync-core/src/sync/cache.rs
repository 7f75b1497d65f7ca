//! Local resource cache
//!
//! Holds the latest known representation of every resource, including
//! unconfirmed local writes, so reads reflect pending changes immediately.

use std::sync::Arc;

use crate::db::{Collection, Store, StoreExt, WriteBatch};
use crate::error::Result;
use crate::models::{Resource, ResourceKey};

pub struct ResourceCache {
    store: Arc<dyn Store>,
}

impl ResourceCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        self.store
            .get_json(Collection::ResourceCache, &key.storage_key())
    }

    pub fn all(&self) -> Result<Vec<Resource>> {
        self.store.scan_json(Collection::ResourceCache)
    }

    pub fn stage_put(&self, batch: &mut WriteBatch, resource: &Resource) -> Result<()> {
        batch.put(Collection::ResourceCache, resource.key().storage_key(), resource)
    }

    pub fn stage_remove(&self, batch: &mut WriteBatch, key: &ResourceKey) {
        batch.delete(Collection::ResourceCache, key.storage_key());
    }

    /// Cache entry is present and matches the given content checksum.
    pub fn is_current(&self, key: &ResourceKey, checksum: &str) -> Result<bool> {
        Ok(self
            .get(key)?
            .is_some_and(|cached| cached.checksum() == checksum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    #[test]
    fn put_then_remove() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = ResourceCache::new(store.clone());
        let resource = Resource::new("Patient", "p1").with_field("active", json!(true));

        let mut batch = WriteBatch::new();
        cache.stage_put(&mut batch, &resource).unwrap();
        store.commit(batch).unwrap();
        assert_eq!(cache.get(&resource.key()).unwrap(), Some(resource.clone()));
        assert!(cache.is_current(&resource.key(), &resource.checksum()).unwrap());

        let mut batch = WriteBatch::new();
        cache.stage_remove(&mut batch, &resource.key());
        store.commit(batch).unwrap();
        assert!(cache.get(&resource.key()).unwrap().is_none());
        assert!(!cache.is_current(&resource.key(), &resource.checksum()).unwrap());
    }
}
