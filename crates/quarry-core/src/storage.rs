//! Storage backend abstraction for projection artifacts and control records.
//!
//! This module defines the storage contract every backend must implement:
//! - Whole-object reads
//! - Streamed writes that become visible only when finished
//! - Object metadata including size, content type and `last_modified`
//!
//! Artifacts are produced incrementally, so a write is a session: open an
//! [`ObjectWriter`] with [`StorageBackend::writer`], append chunks, then
//! [`ObjectWriter::finish`]. Readers never observe a half-written object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// MIME type given when the object was written, if the backend keeps it.
    pub content_type: Option<String>,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// An in-progress object write.
///
/// Nothing is visible under the target key until [`ObjectWriter::finish`]
/// succeeds. Dropping a writer without finishing it abandons the write.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Appends `chunk` to the object.
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Publishes the object under its key, replacing any previous object.
    async fn finish(self: Box<Self>) -> Result<ObjectMeta>;

    /// Discards everything written so far.
    async fn abort(self: Box<Self>);
}

/// Storage backend trait for object storage.
///
/// A finished write replaces the whole object at once: readers observe
/// either the previous object or the new one, never a partial write.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Opens a streamed write of a `content_type` object at `path`.
    async fn writer(&self, path: &str, content_type: &str) -> Result<Box<dyn ObjectWriter>>;

    /// Writes a whole object in one call.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<ObjectMeta> {
        let mut writer = self.writer(path, content_type).await?;
        if let Err(e) = writer.write(data).await {
            writer.abort().await;
            return Err(e);
        }
        writer.finish().await
    }

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Returns true if an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }
}

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`. Writers buffer their chunks and insert the
/// object on finish.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            content_type: Some(self.content_type.clone()),
            last_modified: Some(self.last_modified),
        }
    }
}

fn poisoned() -> Error {
    Error::storage("memory backend lock poisoned")
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryWriter {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    path: String,
    content_type: String,
    buf: Vec<u8>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectMeta> {
        let Self {
            objects,
            path,
            content_type,
            buf,
        } = *self;
        let object = StoredObject {
            data: Bytes::from(buf),
            content_type,
            last_modified: Utc::now(),
        };
        let meta = object.meta(&path);
        objects.write().map_err(|_| poisoned())?.insert(path, object);
        Ok(meta)
    }

    async fn abort(self: Box<Self>) {}
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn writer(&self, path: &str, content_type: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            path: path.to_string(),
            content_type: content_type.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

/// Local filesystem storage backend.
///
/// Object keys map to files below `root`. A writer streams into a hidden
/// temporary file in the target directory; finishing syncs it to disk and
/// renames it into place, so an interrupted write is never readable under its
/// final key. Content types are not retained.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

const TEMP_PREFIX: &str = ".quarry-tmp-";

impl FileSystemBackend {
    /// Creates a backend rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::InvalidInput(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }

    async fn meta_for(key: &str, path: &Path) -> Result<Option<ObjectMeta>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                path: key.to_string(),
                size: meta.len(),
                content_type: None,
                last_modified: meta.modified().ok().map(DateTime::from),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(format!("stat {key}"), e)),
        }
    }
}

struct FileWriter {
    key: String,
    content_type: String,
    temp: PathBuf,
    target: PathBuf,
    file: tokio::fs::File,
    size: u64,
}

impl FileWriter {
    async fn commit(&mut self) -> Result<()> {
        let key = &self.key;
        self.file
            .flush()
            .await
            .map_err(|e| Error::storage_with_source(format!("flush {key}"), e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| Error::storage_with_source(format!("sync {key}"), e))?;
        tokio::fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| Error::storage_with_source(format!("commit {key}"), e))?;
        // Persist the rename itself. Not every platform can open a directory.
        if let Some(parent) = self.target.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                if let Err(e) = dir.sync_all().await {
                    tracing::debug!(key = %key, error = %e, "directory sync failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for FileWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|e| Error::storage_with_source(format!("write {}", self.key), e))?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<ObjectMeta> {
        if let Err(e) = self.commit().await {
            let _ = tokio::fs::remove_file(&self.temp).await;
            return Err(e);
        }
        Ok(ObjectMeta {
            path: self.key.clone(),
            size: self.size,
            content_type: Some(self.content_type.clone()),
            last_modified: Some(Utc::now()),
        })
    }

    async fn abort(self: Box<Self>) {
        let Self { key, temp, file, .. } = *self;
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            tracing::debug!(key = %key, error = %e, "failed to remove temporary file");
        }
    }
}

#[async_trait]
impl StorageBackend for FileSystemBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("read {path}"), e)),
        }
    }

    async fn writer(&self, path: &str, content_type: &str) -> Result<Box<dyn ObjectWriter>> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("object key has no parent: {path}")))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage_with_source(format!("create dir for {path}"), e))?;

        let temp = parent.join(format!("{TEMP_PREFIX}{}", ulid::Ulid::new()));
        let file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| Error::storage_with_source(format!("create {path}"), e))?;
        Ok(Box::new(FileWriter {
            key: path.to_string(),
            content_type: content_type.to_string(),
            temp,
            target,
            file,
            size: 0,
        }))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut out = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage_with_source("list directory", e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source("list directory", e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage_with_source("list directory", e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    if let Some(meta) = Self::meta_for(&key, &path).await? {
                        out.push(meta);
                    }
                }
            }
        }

        Ok(out)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let file = self.resolve(path)?;
        Self::meta_for(path, &file).await
    }
}
