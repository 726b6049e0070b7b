//! Custom assertion helpers for integration tests.

use quarry_named_query::{CacheKey, ControlFile};

use crate::storage::{StorageOp, TracingMemoryBackend};

/// Marker present in every projection storage key.
const NAMED_QUERY_MARKER: &str = "named-query=";

/// Asserts that no operation touched a projection control record or artifact.
///
/// # Panics
///
/// Panics naming the first offending operation.
pub fn assert_no_control_ops(ops: &[StorageOp]) {
    if let Some(op) = ops.iter().find(|op| op.path().contains(NAMED_QUERY_MARKER)) {
        panic!("expected no projection storage access, found {op:?}");
    }
}

/// Asserts that no write or delete was recorded.
///
/// # Panics
///
/// Panics naming the first mutation.
pub fn assert_no_mutations(ops: &[StorageOp]) {
    if let Some(op) = ops.iter().find(|op| op.is_mutation()) {
        panic!("expected no storage mutations, found {op:?}");
    }
}

/// Returns the paths of recorded puts, in order.
pub fn put_paths(ops: &[StorageOp]) -> Vec<String> {
    ops.iter()
        .filter(|op| matches!(op, StorageOp::Put { .. }))
        .map(|op| op.path().to_string())
        .collect()
}

/// Reads and decodes the control record for `key`, bypassing tracing.
pub fn stored_control(storage: &TracingMemoryBackend, key: &CacheKey) -> Option<ControlFile> {
    storage
        .peek(&key.control_path())
        .map(|bytes| serde_json::from_slice(&bytes).expect("control record should decode"))
}

/// Returns every stored artifact path for `key`, from any build, sorted.
#[must_use]
pub fn stored_artifacts(storage: &TracingMemoryBackend, key: &CacheKey) -> Vec<String> {
    let prefix = key.artifact_prefix();
    storage
        .paths()
        .into_iter()
        .filter(|p| p.starts_with(&prefix))
        .collect()
}

/// Asserts that `key` has no visible artifact: the control record does not
/// report it as existing, and no build left artifact bytes behind.
///
/// # Panics
///
/// Panics if the artifact is visible or its bytes remain.
pub fn assert_artifact_not_visible(storage: &TracingMemoryBackend, key: &CacheKey) {
    if let Some(control) = stored_control(storage, key) {
        assert!(!control.exists, "control record reports exists: {control:?}");
    }
    let leftover = stored_artifacts(storage, key);
    assert!(leftover.is_empty(), "artifact bytes remain at {leftover:?}");
}
