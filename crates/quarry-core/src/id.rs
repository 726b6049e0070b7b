//! Strongly-typed identifiers for quarry entities.
//!
//! Build attempts are tagged with a ULID so that log lines, metrics and
//! user-facing server errors can be correlated without exposing internal state.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::id::BuildId;
//!
//! let first = BuildId::generate();
//! let second = BuildId::generate();
//! assert_ne!(first, second);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Correlation identifier for a single `get_or_build` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(Ulid);

impl BuildId {
    /// Generates a new unique build ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a build ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid build ID '{s}': {e}"),
            })
    }
}
