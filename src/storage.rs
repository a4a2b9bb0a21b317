//! Object storage layout and access.
//!
//! Raw objects move through three namespaces distinguished by key prefix.
//! Keys are built here and nowhere else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
    PutPayload,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StorageSettings;
use crate::error::{EtlError, Result};

const KEY_STAMP: &str = "%Y%m%d_%H%M%S";
const EXECUTION_LOGS: &str = "logs/execution_logs";
const ERROR_LOGS: &str = "logs/error_logs";

/// Processing state of a raw object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Pending,
    Done,
    Failed,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Pending => "raw_data/to_processed",
            Namespace::Done => "raw_data/already_processed",
            Namespace::Failed => "raw_data/failed_extraction",
        }
    }

    pub fn raw_key(self, playlist_id: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}/playlist_{}_{}.json",
            self.prefix(),
            playlist_id,
            at.format(KEY_STAMP)
        )
    }

    /// Same file name under another namespace.
    pub fn rebase(self, key: &str, to: Namespace) -> Result<String> {
        let file_name = key
            .strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                EtlError::persistence(key, format!("not under {}", self.prefix()))
            })?;
        Ok(format!("{}/{}", to.prefix(), file_name))
    }
}

/// The `data_stage` of an extraction trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStage {
    #[default]
    ToProcessed,
    AlreadyProcessed,
    FailedExtraction,
}

impl DataStage {
    pub fn namespace(self) -> Namespace {
        match self {
            DataStage::ToProcessed => Namespace::Pending,
            DataStage::AlreadyProcessed => Namespace::Done,
            DataStage::FailedExtraction => Namespace::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataStage::ToProcessed => "to_processed",
            DataStage::AlreadyProcessed => "already_processed",
            DataStage::FailedExtraction => "failed_extraction",
        }
    }
}

impl std::fmt::Display for DataStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn execution_log_key(playlist_id: &str, at: DateTime<Utc>) -> String {
    format!("{EXECUTION_LOGS}/success_{playlist_id}_{}.json", at.format(KEY_STAMP))
}

pub fn error_log_key(subject: &str, at: DateTime<Utc>) -> String {
    format!("{ERROR_LOGS}/error_{subject}_{}.json", at.format(KEY_STAMP))
}

/// Dead letters share the failed namespace with raw objects archived under
/// the `failed_extraction` stage, so they carry their own suffix.
pub fn dead_letter_key(playlist_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/playlist_{}_{}_error.json",
        Namespace::Failed.prefix(),
        playlist_id,
        at.format(KEY_STAMP)
    )
}

/// Last path segment without its extension.
pub fn key_stem(key: &str) -> &str {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    file_name.strip_suffix(".json").unwrap_or(file_name)
}

/// Handle on the configured store plus the root it was opened from.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    root: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage").field("root", &self.root).finish()
    }
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Self {
        let root = root.into();
        let root = if root.ends_with("://") {
            root
        } else {
            root.trim_end_matches('/').to_string()
        };
        Self { store, root }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// `s3://bucket` uses the AWS credential chain from the environment,
    /// `memory://` is process-local, anything else is a local directory.
    pub fn open(settings: &StorageSettings) -> Result<Self> {
        let root = settings.root.trim();
        if let Some(bucket) = root.strip_prefix("s3://") {
            let bucket = bucket.trim_end_matches('/');
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| EtlError::Config(format!("cannot open bucket {bucket}: {e}")))?;
            info!(bucket = %bucket, "Using S3 storage");
            return Ok(Self::new(Arc::new(store), root));
        }
        if root.starts_with("memory://") {
            return Ok(Self::in_memory());
        }

        let dir = root.strip_prefix("file://").unwrap_or(root);
        std::fs::create_dir_all(dir)
            .map_err(|e| EtlError::Config(format!("cannot create storage root {dir}: {e}")))?;
        let store = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| EtlError::Config(format!("cannot open storage root {dir}: {e}")))?;
        info!(dir = %dir, "Using local storage");
        Ok(Self::new(Arc::new(store), root))
    }

    /// Human-readable location of a key, e.g. `s3://bucket/raw_data/...`.
    pub fn location(&self, key: &str) -> String {
        if self.root.ends_with('/') {
            format!("{}{}", self.root, key)
        } else {
            format!("{}/{}", self.root, key)
        }
    }

    pub async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.store
            .put(&Path::from(key), PutPayload::from(body))
            .await
            .map_err(|e| EtlError::persistence(key, e))?;
        debug!(key = %key, "Stored object");
        Ok(())
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| EtlError::Internal(format!("cannot serialize {key}: {e}")))?;
        self.put(key, body).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| EtlError::persistence(key, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| EtlError::persistence(key, e))?;
        Ok(bytes.to_vec())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(EtlError::persistence(key, e)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&Path::from(key))
            .await
            .map_err(|e| EtlError::persistence(key, e))
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.store
            .copy(&Path::from(from), &Path::from(to))
            .await
            .map_err(|e| EtlError::persistence(from, e))
    }

    /// Keys under `prefix` with the given suffix, sorted.
    pub async fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let objects: Vec<_> = self
            .store
            .list(Some(&prefix_path))
            .try_collect()
            .await
            .map_err(|e| EtlError::persistence(prefix, e))?;
        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.ends_with(suffix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Pending raw objects, oldest key first.
    pub async fn list_pending(&self) -> Result<Vec<String>> {
        self.list(Namespace::Pending.prefix(), ".json").await
    }
}

/// Moves processed raw objects from pending to done.
///
/// The move is a copy followed by a delete and is NOT atomic: a crash in
/// between leaves the object in both namespaces. When both exist the done
/// copy is authoritative; [`Relocator::settle`] finishes such moves.
#[derive(Debug, Clone)]
pub struct Relocator {
    storage: ObjectStorage,
}

impl Relocator {
    pub fn new(storage: ObjectStorage) -> Self {
        Self { storage }
    }

    /// Returns the done key.
    pub async fn relocate(&self, pending_key: &str) -> Result<String> {
        let done_key = Namespace::Pending.rebase(pending_key, Namespace::Done)?;
        self.storage.copy(pending_key, &done_key).await?;
        self.storage.delete(pending_key).await?;
        info!(from = %pending_key, to = %done_key, "Moved processed object");
        Ok(done_key)
    }

    /// True when `pending_key` was already relocated by an earlier run. The
    /// stale pending copy is deleted and the key must not be processed again.
    pub async fn settle(&self, pending_key: &str) -> Result<bool> {
        let done_key = Namespace::Pending.rebase(pending_key, Namespace::Done)?;
        if !self.storage.exists(&done_key).await? {
            return Ok(false);
        }
        warn!(key = %pending_key, "Object already relocated, removing stale pending copy");
        self.storage.delete(pending_key).await?;
        Ok(true)
    }
}
