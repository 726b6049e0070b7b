//! Control records: the authoritative build/cache state of one artifact.
//!
//! A control record is a small JSON object stored next to the artifact. Its
//! states are:
//!
//! ```text
//! Absent ──mark_building──▶ Building ──complete──▶ Ready
//!    ▲                          │
//!    └──── judged stale ────────┘
//! ```
//!
//! `exists = true` is written only after the artifact bytes are stored in
//! full. Every write is a whole-object replace; there is no exclusive lock,
//! and concurrent builders for one key resolve by "last complete wins". Each
//! build stores its artifact under its own path and the record names the path
//! it describes, so one builder's cleanup never touches another's bytes.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use quarry_core::StorageBackend;
use serde::{Deserialize, Serialize};

use crate::cache_key::CacheKey;
use crate::error::{NamedQueryError, Result};

const CONTROL_CONTENT_TYPE: &str = "application/json";

/// Persistent build/cache state for one cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFile {
    /// Storage key of the artifact this record describes.
    #[serde(default)]
    pub key: String,
    /// The artifact is completely stored.
    #[serde(default)]
    pub exists: bool,
    /// A build was started at `created`.
    #[serde(default)]
    pub in_process: bool,
    /// When the current state was written.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Number of assets in the artifact.
    #[serde(default)]
    pub item_count: u64,
    /// Artifact size in bytes.
    #[serde(default)]
    pub size_bytes: u64,
    /// Roles required to view the artifact.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Build attempts for this key, counting stale takeovers.
    #[serde(default)]
    pub attempt: u32,
}

impl ControlFile {
    /// The record equivalent to "nothing stored".
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if this is the empty sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.exists && !self.in_process
    }

    /// Returns true if an in-progress build has run longer than `threshold` at `now`.
    ///
    /// Ready records never go stale.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if !self.in_process {
            return false;
        }
        self.created.is_none_or(|created| now - created > threshold)
    }

    /// [`ControlFile::is_stale_at`] against the current time.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.is_stale_at(Utc::now(), threshold)
    }

    /// Seconds until this in-progress build goes stale, clamped to
    /// `[1, threshold]`.
    #[must_use]
    pub fn retry_after_secs_at(&self, now: DateTime<Utc>, threshold: Duration) -> u64 {
        let max = u64::try_from(threshold.num_seconds()).unwrap_or(1).max(1);
        let remaining = self
            .created
            .map_or(0, |created| (threshold - (now - created)).num_seconds());
        u64::try_from(remaining).unwrap_or(0).clamp(1, max)
    }
}

/// Reads and writes control records in object storage.
#[derive(Clone)]
pub struct ControlFileStore {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ControlFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlFileStore").finish_non_exhaustive()
    }
}

impl ControlFileStore {
    /// Creates a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Returns the record for `key`, or the empty sentinel if none is stored
    /// or the stored bytes cannot be read.
    pub async fn get(&self, key: &CacheKey) -> ControlFile {
        let path = key.control_path();
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return ControlFile::empty(),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "control record unreadable");
                return ControlFile::empty();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %path, error = %e, "control record malformed");
            ControlFile::empty()
        })
    }

    /// Records that a build for `key`, writing to `artifact`, started now.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the write fails.
    pub async fn mark_building(
        &self,
        key: &CacheKey,
        artifact: &str,
        attempt: u32,
    ) -> Result<ControlFile> {
        let file = ControlFile {
            key: artifact.to_string(),
            exists: false,
            in_process: true,
            created: Some(Utc::now()),
            attempt,
            ..ControlFile::default()
        };
        self.write(key, &file).await?;
        Ok(file)
    }

    /// Records that the artifact for `key` is completely stored at `artifact`.
    ///
    /// Call only after the artifact write has succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the write fails.
    pub async fn complete(
        &self,
        key: &CacheKey,
        artifact: &str,
        item_count: u64,
        size_bytes: u64,
        roles: BTreeSet<String>,
        attempt: u32,
    ) -> Result<ControlFile> {
        let file = ControlFile {
            key: artifact.to_string(),
            exists: true,
            in_process: false,
            created: Some(Utc::now()),
            item_count,
            size_bytes,
            roles,
            attempt,
        };
        self.write(key, &file).await?;
        Ok(file)
    }

    /// Replaces the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the write fails.
    pub async fn write(&self, key: &CacheKey, file: &ControlFile) -> Result<()> {
        let bytes = serde_json::to_vec(file)
            .map_err(|e| NamedQueryError::generation(format!("control record encoding: {e}")))?;
        self.storage
            .put(&key.control_path(), Bytes::from(bytes), CONTROL_CONTENT_TYPE)
            .await?;
        Ok(())
    }
}
