// src/cache/redis_store.rs

use super::PublicKeyCache;
use crate::error::Result;
use crate::model::JsonWebKeySet;
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, instrument};

/// Key cache stored in Redis under `keycloak-jwk:{realm}`, shareable across processes.
#[derive(Clone)]
pub struct RedisKeyCache {
    client: redis::Client,
    key: String,
}

impl RedisKeyCache {
    pub fn new(client: redis::Client, realm: &str) -> Self {
        Self {
            client,
            key: format!("keycloak-jwk:{realm}"),
        }
    }

    /// Opens a client for `redis_url` (e.g. `redis://127.0.0.1/`).
    pub fn open(redis_url: &str, realm: &str) -> Result<Self> {
        Ok(Self::new(redis::Client::open(redis_url)?, realm))
    }
}

#[async_trait]
impl PublicKeyCache for RedisKeyCache {
    #[instrument(skip(self, keys), fields(key = %self.key), err)]
    async fn save(&self, keys: &JsonWebKeySet) -> Result<()> {
        let body = serde_json::to_string(keys)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // SET replaces the value atomically.
        conn.set::<_, _, ()>(&self.key, body).await?;
        debug!("Saved {} keys to redis", keys.keys.len());
        Ok(())
    }

    #[instrument(skip(self), fields(key = %self.key), err)]
    async fn load(&self) -> Result<Option<JsonWebKeySet>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let body: Option<String> = conn.get(&self.key).await?;
        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    #[instrument(skip(self), fields(key = %self.key), err)]
    async fn clear(&self) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = conn.del(&self.key).await?;
        Ok(removed > 0)
    }
}
