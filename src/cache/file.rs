// src/cache/file.rs

use super::PublicKeyCache;
use crate::error::Result;
use crate::model::JsonWebKeySet;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Suffix appended to the realm name to form the cache file name.
pub const FILENAME_EXT: &str = ".keycloak-jwk";

/// Filesystem-backed key cache: one `{realm}.keycloak-jwk` file per realm.
///
/// Writes go to a uniquely named sibling file which is then renamed over the
/// entry, so concurrent readers (possibly in other processes) see either the
/// old or the new key set, never a torn one.
#[derive(Debug, Clone)]
pub struct FileKeyCache {
    path: PathBuf,
}

impl FileKeyCache {
    pub fn new(dir: impl AsRef<Path>, realm: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{realm}{FILENAME_EXT}")),
        }
    }

    /// The file backing this cache entry.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}.tmp", Uuid::new_v4()));
        PathBuf::from(name)
    }
}

#[async_trait]
impl PublicKeyCache for FileKeyCache {
    #[instrument(skip(self, keys), fields(path = %self.path.display()), err)]
    async fn save(&self, keys: &JsonWebKeySet) -> Result<()> {
        let body = serde_json::to_vec(keys)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, body).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Saved {} keys to file cache", keys.keys.len());
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()), err)]
    async fn load(&self) -> Result<Option<JsonWebKeySet>> {
        match tokio::fs::read(&self.path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %self.path.display()), err)]
    async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
