//! Shared test utilities for quarry integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording and
//!   failure injection
//! - [`TestContext`]: A seeded catalog, storage and configuration
//! - Factory functions for assets and named queries
//! - Assertion helpers over recorded storage operations
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_test_utils::{TestContext, assert_no_control_ops};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let service = ctx.service();
//!     // ... run test ...
//!     assert_no_control_ops(&ctx.storage.operations());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("quarry_named_query=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
