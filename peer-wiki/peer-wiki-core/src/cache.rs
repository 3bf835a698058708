//! Rendered page snapshots kept on disk, one JSON file per entry.
//!
//! The cache is advisory: failed reads fall back to the source file and
//! failed writes only cost performance, so nothing here returns an error
//! to the caller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Result, WikiError};
use crate::markup::{PageMeta, TocNode};
use crate::path::PathResolver;

/// Title information of the nearest ancestor page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInfo {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub html: String,
    pub meta: PageMeta,
    pub tree: Vec<TocNode>,
    pub parent: Option<ParentInfo>,
}

#[derive(Clone, Debug)]
pub struct CacheStore {
    paths: PathResolver,
}

impl CacheStore {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.paths.cache_path(id)
    }

    /// Read the snapshot for `id`. A corrupt file is deleted and treated as
    /// a miss.
    pub async fn load(&self, id: &str) -> Option<PageSnapshot> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };
        match decode(id, &bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                error!(%err, "deleting cache file");
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(entry = id, %err, "unable to delete corrupted cache file");
                }
                None
            }
        }
    }

    /// Persist a snapshot. The file is written next to its final location
    /// and renamed into place so concurrent readers never see a torn file.
    pub async fn store(&self, id: &str, snapshot: &PageSnapshot) {
        if let Err(err) = self.try_store(id, snapshot).await {
            error!(entry = id, %err, "unable to write to cache, performance may be affected");
        }
    }

    async fn try_store(&self, id: &str, snapshot: &PageSnapshot) -> std::io::Result<()> {
        let path = self.path_for(id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_vec(snapshot)?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }
        Ok(())
    }

    /// Best-effort removal; a missing file is not an error.
    pub async fn evict(&self, id: &str) {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => debug!(entry = id, "cache evicted"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(entry = id, %err, "unable to evict cache file"),
        }
    }
}

fn decode(id: &str, bytes: &[u8]) -> Result<PageSnapshot> {
    serde_json::from_slice(bytes).map_err(|_| WikiError::CorruptCache(id.to_string()))
}
