// src/cache/memory.rs

use super::PublicKeyCache;
use crate::error::Result;
use crate::model::JsonWebKeySet;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;

/// In-process key cache backed by `moka`.
///
/// Several instances (one per realm) can share a single store via
/// [`MemoryKeyCache::with_store`].
#[derive(Clone)]
pub struct MemoryKeyCache {
    realm: String,
    store: Cache<String, Arc<JsonWebKeySet>>,
}

impl MemoryKeyCache {
    pub fn new(realm: impl Into<String>) -> Self {
        // One entry per realm, a handful of realms at most.
        Self::with_store(realm, Cache::new(64))
    }

    pub fn with_store(realm: impl Into<String>, store: Cache<String, Arc<JsonWebKeySet>>) -> Self {
        Self {
            realm: realm.into(),
            store,
        }
    }
}

#[async_trait]
impl PublicKeyCache for MemoryKeyCache {
    async fn save(&self, keys: &JsonWebKeySet) -> Result<()> {
        self.store
            .insert(self.realm.clone(), Arc::new(keys.clone()))
            .await;
        Ok(())
    }

    async fn load(&self) -> Result<Option<JsonWebKeySet>> {
        Ok(self
            .store
            .get(&self.realm)
            .await
            .map(|keys| keys.as_ref().clone()))
    }

    async fn clear(&self) -> Result<bool> {
        Ok(self.store.remove(&self.realm).await.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn realms_sharing_a_store_stay_isolated() {
        let store = Cache::new(8);
        let master = MemoryKeyCache::with_store("master", store.clone());
        let demo = MemoryKeyCache::with_store("demo", store);

        master.save(&JsonWebKeySet::default()).await.unwrap();

        assert!(master.load().await.unwrap().is_some());
        assert!(demo.load().await.unwrap().is_none());
        assert!(!demo.clear().await.unwrap());
        assert!(master.clear().await.unwrap());
        assert!(master.load().await.unwrap().is_none());
    }
}
