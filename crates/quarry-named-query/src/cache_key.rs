//! Deterministic cache identity for projections.
//!
//! The key is the SHA-256 of the canonical JSON of the [`ParsedQuery`]: the
//! resolved, typed filter values rather than the raw request strings. Requests
//! that differ only in argument order, or in `pN` versus `{N}` placeholder
//! forms, therefore share a key. The query is normalized first (see
//! [`ParsedQuery::normalized`]) so that an explicit default, such as page 1 or
//! ascending ordinal order, shares the key of the request that omits it.

use std::fmt;

use quarry_core::{BuildId, CustomerId};
use quarry_core::canonical_json::canonical_sha256;
use serde::{Deserialize, Serialize};

use crate::error::{NamedQueryError, Result};
use crate::query::{OutputKind, ParsedQuery};

/// Storage prefix segment for named-query projections.
pub const NAMED_QUERY_SEGMENT: &str = "named-query";

/// Control record file name under a key prefix.
pub const CONTROL_FILE_NAME: &str = "control.json";

/// Identity of one projection artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    /// Owning customer.
    pub customer: CustomerId,
    /// Named query name.
    pub query_name: String,
    /// Output kind.
    pub kind: OutputKind,
    /// Hex SHA-256 of the canonical query.
    pub hash: String,
}

impl CacheKey {
    /// Derives the key for `query`.
    ///
    /// # Errors
    ///
    /// Returns `Generation` if the query cannot be canonically encoded.
    pub fn derive(query: &ParsedQuery) -> Result<Self> {
        let hash = canonical_sha256(&query.normalized())
            .map_err(|e| NamedQueryError::generation(format!("cache key encoding: {e}")))?;
        Ok(Self {
            customer: query.customer,
            query_name: query.query_name.clone(),
            kind: query.kind(),
            hash,
        })
    }

    /// Prefix shared by the control record and the artifact.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(
            "{}{NAMED_QUERY_SEGMENT}={}/{}/{}/",
            self.customer.storage_prefix(),
            self.query_name,
            self.kind,
            self.hash
        )
    }

    /// Storage key of the control record.
    #[must_use]
    pub fn control_path(&self) -> String {
        format!("{}{CONTROL_FILE_NAME}", self.prefix())
    }

    /// Common prefix of every build's artifact path.
    #[must_use]
    pub fn artifact_prefix(&self) -> String {
        format!("{}artifact-", self.prefix())
    }

    /// Storage key of the artifact written by build `build`.
    ///
    /// Each build writes its own object; the control record names the one
    /// that is current.
    #[must_use]
    pub fn artifact_path(&self, build: &BuildId) -> String {
        format!("{}{build}.{}", self.artifact_prefix(), self.kind.extension())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.customer,
            self.query_name,
            self.kind,
            &self.hash[..self.hash.len().min(12)]
        )
    }
}
