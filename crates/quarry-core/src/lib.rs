//! # quarry-core
//!
//! Core abstractions shared by the quarry named-query projection engine.
//!
//! This crate provides the foundational types and traits used across all quarry components:
//!
//! - **Customer Context**: Customer identifiers and the resolved customer record
//! - **Identifiers**: Correlation ids for build attempts
//! - **Storage Traits**: Abstract object-storage interface with memory and filesystem backends
//! - **Error Types**: Shared error definitions and result types
//! - **Canonical Encoding**: Deterministic JSON + SHA-256 for cache identity
//! - **Cancellation**: A cloneable cancellation signal honored at I/O boundaries
//!
//! ## Example
//!
//! ```rust
//! use quarry_core::prelude::*;
//!
//! let customer = CustomerId::new(42);
//! assert_eq!(customer.storage_prefix(), "customer=42/");
//!
//! let build = BuildId::generate();
//! assert!(!build.to_string().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod canonical_json;
pub mod customer;
pub mod error;
pub mod id;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use quarry_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelSignal};
    pub use crate::customer::{CustomerContext, CustomerId};
    pub use crate::error::{Error, Result};
    pub use crate::id::BuildId;
    pub use crate::storage::{
        FileSystemBackend, MemoryBackend, ObjectMeta, ObjectWriter, StorageBackend,
    };
}

// Re-export key types at crate root for ergonomics
pub use cancel::{CancelHandle, CancelSignal};
pub use customer::{CustomerContext, CustomerId};
pub use error::{Error, Result};
pub use id::BuildId;
pub use observability::{LogFormat, init_logging};
pub use storage::{FileSystemBackend, MemoryBackend, ObjectMeta, ObjectWriter, StorageBackend};
