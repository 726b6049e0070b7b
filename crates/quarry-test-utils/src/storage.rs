//! Test storage implementations with operation tracing.
//!
//! Provides in-memory storage that records all operations for test assertions
//! and can fail chosen reads or writes on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quarry_core::error::{Error, Result};
use quarry_core::storage::{ObjectMeta, ObjectWriter, StorageBackend};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Content type the writer was opened with.
        content_type: String,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// The path or prefix the operation addressed.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path } => path,
            Self::List { prefix } => prefix,
        }
    }

    /// Returns true for writes and deletes.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Delete { .. })
    }
}

#[derive(Debug, Clone)]
struct PutFault {
    prefix: String,
    allow: usize,
}

/// In-memory storage backend with operation tracing.
///
/// Records all operations for later assertion in tests. Failed operations are
/// recorded too, so a test can see what was attempted.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    put_faults: Arc<Mutex<Vec<PutFault>>>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            last_modified: Some(self.last_modified),
        }
    }
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage with simulated latency.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails every operation on paths starting with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Lets `allow` puts under `prefix` succeed, then fails every later one.
    pub fn inject_put_failure_after(&self, prefix: impl Into<String>, allow: usize) {
        self.put_faults.lock().expect("lock").push(PutFault {
            prefix: prefix.into(),
            allow,
        });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
        self.put_faults.lock().expect("lock").clear();
    }

    /// Returns all stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.data.lock().expect("lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns the stored bytes at `path`, bypassing tracing.
    #[must_use]
    pub fn peek(&self, path: &str) -> Option<Bytes> {
        self.data.lock().expect("lock").get(path).map(|o| o.data.clone())
    }

    /// Stores `data` at `path`, bypassing tracing and failure injection.
    pub fn seed(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.data.lock().expect("lock").insert(
            path.into(),
            StoredObject {
                data: data.into(),
                content_type: None,
                last_modified: Utc::now(),
            },
        );
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::storage(format!("Injected failure for path: {path}")));
        }
        Ok(())
    }

    fn check_put_fault(&self, path: &str) -> Result<()> {
        let mut faults = self.put_faults.lock().expect("lock");
        for fault in faults.iter_mut().filter(|f| path.starts_with(&f.prefix)) {
            if fault.allow == 0 {
                return Err(Error::storage(format!("Injected write failure for path: {path}")));
            }
            fault.allow -= 1;
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.maybe_delay().await;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });
        self.check_failure(path)?;

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.maybe_delay().await;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });
        self.check_failure(path)?;

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| o.meta(path)))
    }

    async fn writer(&self, path: &str, content_type: &str) -> Result<Box<dyn ObjectWriter>> {
        self.maybe_delay().await;
        if let Err(e) = self.check_failure(path) {
            self.record(StorageOp::Put {
                path: path.to_string(),
                size: 0,
                content_type: content_type.to_string(),
            });
            return Err(e);
        }
        Ok(Box::new(TracingWriter {
            backend: self.clone(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.check_failure(path)?;

        self.data.lock().expect("lock").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.maybe_delay().await;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.check_failure(prefix)?;

        let data = self.data.lock().expect("lock");
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| v.meta(k))
            .collect())
    }
}

/// Buffers chunks and publishes them as one traced put on finish.
struct TracingWriter {
    backend: TracingMemoryBackend,
    path: String,
    content_type: String,
    buf: Vec<u8>,
}

#[async_trait::async_trait]
impl ObjectWriter for TracingWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectMeta> {
        let Self {
            backend,
            path,
            content_type,
            buf,
        } = *self;
        backend.maybe_delay().await;
        backend.record(StorageOp::Put {
            path: path.clone(),
            size: buf.len(),
            content_type: content_type.clone(),
        });
        backend.check_failure(&path)?;
        backend.check_put_fault(&path)?;

        let object = StoredObject {
            data: Bytes::from(buf),
            content_type: Some(content_type),
            last_modified: Utc::now(),
        };
        let meta = object.meta(&path);
        backend.data.lock().expect("lock").insert(path, object);
        Ok(meta)
    }

    async fn abort(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_storage_records_operations() {
        let storage = TracingMemoryBackend::new();

        storage
            .put("test.txt", Bytes::from("hello"), "text/plain")
            .await
            .expect("put");
        let _ = storage.get("test.txt").await;
        let _ = storage.list("").await;

        let ops = storage.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], StorageOp::Put { .. }));
        assert!(matches!(ops[1], StorageOp::Get { .. }));
        assert!(matches!(ops[2], StorageOp::List { .. }));
    }

    #[tokio::test]
    async fn tracing_storage_failure_injection() {
        let storage = TracingMemoryBackend::new();
        storage.inject_failure("fail/");

        assert!(storage.get("fail/test.txt").await.is_err());

        storage
            .put("ok/test.txt", Bytes::from("data"), "text/plain")
            .await
            .expect("put");
        assert!(storage.get("ok/test.txt").await.is_ok());
    }

    #[tokio::test]
    async fn put_failure_after_allowance() {
        let storage = TracingMemoryBackend::new();
        storage.inject_put_failure_after("control/", 1);

        storage
            .put("control/a", Bytes::from("1"), "text/plain")
            .await
            .expect("first put allowed");
        assert!(
            storage
                .put("control/a", Bytes::from("2"), "text/plain")
                .await
                .is_err()
        );
        assert_eq!(storage.peek("control/a"), Some(Bytes::from("1")));
        assert_eq!(storage.operations().len(), 2);
    }

    #[tokio::test]
    async fn aborted_writer_leaves_no_trace() {
        let storage = TracingMemoryBackend::new();
        let mut writer = storage
            .writer("artifact.tar", "application/x-tar")
            .await
            .expect("writer");
        writer.write(Bytes::from("partial")).await.expect("write");
        writer.abort().await;

        assert!(storage.operations().is_empty());
        assert!(storage.peek("artifact.tar").is_none());
    }

    #[tokio::test]
    async fn put_records_content_type() {
        let storage = TracingMemoryBackend::new();
        storage
            .put("a.json", Bytes::from("{}"), "application/json")
            .await
            .expect("put");
        assert_eq!(
            storage.operations(),
            vec![StorageOp::Put {
                path: "a.json".to_string(),
                size: 2,
                content_type: "application/json".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn seeding_bypasses_tracing() {
        let storage = TracingMemoryBackend::new();
        storage.seed("origin/a", "bytes");
        assert!(storage.operations().is_empty());
        assert_eq!(storage.paths(), vec!["origin/a"]);
    }
}
