//! Customer isolation primitives.
//!
//! Every named query, asset and projection belongs to exactly one customer.
//! Projection storage is laid out under a per-customer prefix so that one
//! customer's artifacts can never collide with another's.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::customer::CustomerId;
//!
//! let customer: CustomerId = "42".parse().unwrap();
//! assert_eq!(customer.storage_prefix(), "customer=42/");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A numeric customer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(u32);

impl CustomerId {
    /// Creates a customer ID from its numeric value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the storage prefix for this customer.
    ///
    /// Uses the key=value format so any artifact path is self-describing.
    #[must_use]
    pub fn storage_prefix(self) -> String {
        format!("customer={}/", self.0)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CustomerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid customer ID '{s}': {e}"),
            })
    }
}

/// A customer resolved from a request path token.
///
/// Requests may address a customer by numeric id or by its short name; both
/// resolve to the same context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContext {
    /// The customer's numeric id.
    pub id: CustomerId,
    /// The customer's short name, used in public paths.
    pub name: String,
}

impl CustomerContext {
    /// Creates a new customer context.
    #[must_use]
    pub fn new(id: CustomerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Returns true if the given path token addresses this customer.
    #[must_use]
    pub fn matches_token(&self, token: &str) -> bool {
        let token = token.trim();
        token == self.name || token.parse::<CustomerId>().is_ok_and(|id| id == self.id)
    }
}
