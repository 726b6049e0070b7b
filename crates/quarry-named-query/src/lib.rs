//! # quarry-named-query
//!
//! Named-query resolution and idempotent projection builds.
//!
//! A named query is a stored template (`space=p1&n=20&orderby=n1 desc`) that a
//! request binds to concrete arguments. The bound query selects an ordered
//! subset of one customer's assets, which is then projected into an artifact:
//!
//! - **Document**: a PDF with one page per asset
//! - **Archive**: a tar bundle of each asset's source bytes
//! - **Manifest**: a presentation manifest with one canvas per asset
//! - **Raw list**: the ordered identifiers, generated on every request
//!
//! ## Caching
//!
//! Persisted projections are cached in object storage under a key derived from
//! the canonical form of the parsed query. A small control record next to each
//! artifact tracks whether it is ready or being built:
//!
//! ```text
//! customer={c}/named-query={name}/{kind}/{hash}/
//! ├── control.json        # build/cache state
//! └── artifact.{ext}      # written in full before control.json says exists
//! ```
//!
//! Concurrent requests for the same key see "build in progress" instead of
//! starting duplicate builds. A build that dies mid-way is taken over once its
//! control record goes stale.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quarry_named_query::{OutputKind, ProjectionRequest, ProjectionService, QueryArgs};
//!
//! let service = ProjectionService::from_catalog(catalog, storage, config);
//! let request = ProjectionRequest::new("42", "by-space", OutputKind::Document)
//!     .with_args(QueryArgs::from_path("4"));
//! match service.get_or_build(&request, &CancelSignal::never()).await? {
//!     BuildOutcome::Ready(handle) => serve(service.read_artifact(&handle).await?),
//!     BuildOutcome::Pending { retry_after_secs, .. } => accepted(retry_after_secs),
//!     BuildOutcome::Inline(list) => serve(list.bytes),
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache_key;
pub mod catalog;
pub mod conductor;
pub mod config;
pub mod control_file;
pub mod error;
pub mod facade;
pub mod generators;
pub mod metrics;
pub mod parser;
pub mod query;

// Re-export main types at crate root
pub use cache_key::CacheKey;
pub use catalog::{
    Asset, AssetCatalog, AssetQuery, CatalogData, CustomerResolver, MemoryCatalog,
    NamedQueryRecord, NamedQueryStore, Predicate,
};
pub use conductor::{Conductor, ResolvedResult};
pub use config::ProjectionConfig;
pub use control_file::{ControlFile, ControlFileStore};
pub use error::{ErrorClass, NamedQueryError, Result, TemplateError};
pub use facade::{
    ArtifactHandle, BuildOutcome, InlineArtifact, ProjectionRequest, ProjectionService,
};
pub use generators::{ArtifactSink, GenerationSummary, ProjectionGenerator, generator_for};
pub use parser::{QueryArgs, TemplateParser};
pub use query::{KindOptions, OrderDirection, OutputKind, ParsedQuery, QueryField, QueryOrder};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{NamedQueryError, Result};
    pub use crate::facade::{BuildOutcome, ProjectionRequest, ProjectionService};
    pub use crate::parser::QueryArgs;
    pub use crate::query::OutputKind;
}
