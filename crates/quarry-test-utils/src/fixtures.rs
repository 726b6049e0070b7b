//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create test data with sensible defaults.

use std::sync::Arc;

use quarry_core::{CustomerContext, CustomerId, StorageBackend};
use quarry_named_query::{
    Asset, MemoryCatalog, NamedQueryRecord, OutputKind, ProjectionConfig, ProjectionRequest,
    ProjectionService, QueryArgs,
};

use crate::storage::TracingMemoryBackend;

/// Customer id used by the standard fixtures.
pub const TEST_CUSTOMER: u32 = 42;

/// Customer name used by the standard fixtures.
pub const TEST_CUSTOMER_NAME: &str = "acme";

/// Space holding the standard fixture's three assets.
pub const TEST_SPACE: u32 = 4;

/// The standard fixture customer.
pub fn test_customer() -> CustomerId {
    CustomerId::new(TEST_CUSTOMER)
}

/// Creates an image asset with dimensions and a storage location.
pub fn image_asset(space: u32, id: &str, ordinal: i64) -> Asset {
    let mut asset = Asset::new(test_customer(), space, id);
    asset.ordinal = ordinal;
    asset.width = Some(2000);
    asset.height = Some(3000);
    asset.storage_location = Some(source_path(space, id));
    asset
}

/// Storage key where an asset's source bytes live.
pub fn source_path(space: u32, id: &str) -> String {
    format!("origin/{TEST_CUSTOMER}/{space}/{id}")
}

/// Creates a named query owned by the test customer.
pub fn named_query(name: &str, template: &str) -> NamedQueryRecord {
    NamedQueryRecord {
        name: name.to_string(),
        customer: test_customer(),
        template: template.to_string(),
        global: false,
    }
}

/// Catalog with the test customer, three assets in [`TEST_SPACE`] (inserted
/// out of order), one asset in another space, and these queries:
///
/// - `by-space`: `space={s}&n=20`
/// - `by-path`: `space=p1`
/// - `paged`: `space=p1&pagesize=2&page=p2`
pub fn standard_catalog() -> MemoryCatalog {
    MemoryCatalog::new()
        .with_customer(CustomerContext::new(test_customer(), TEST_CUSTOMER_NAME))
        .with_query(named_query("by-space", "space={s}&n=20"))
        .with_query(named_query("by-path", "space=p1"))
        .with_query(named_query("paged", "space=p1&pagesize=2&page=p2"))
        .with_asset(image_asset(TEST_SPACE, "page-3", 3))
        .with_asset(image_asset(TEST_SPACE, "page-1", 1))
        .with_asset(image_asset(TEST_SPACE, "page-2", 2))
        .with_asset(image_asset(TEST_SPACE + 1, "other", 1))
}

/// A request for `by-space` with `s = space`.
pub fn by_space_request(space: u32, kind: OutputKind) -> ProjectionRequest {
    ProjectionRequest::new(TEST_CUSTOMER.to_string(), "by-space", kind)
        .with_args(QueryArgs::new().with_keyed("s", space.to_string()))
}

/// Test context with a seeded catalog and traced storage.
pub struct TestContext {
    /// Shared storage backend.
    pub storage: Arc<TracingMemoryBackend>,
    /// Shared catalog.
    pub catalog: Arc<MemoryCatalog>,
    /// Engine configuration.
    pub config: ProjectionConfig,
}

impl TestContext {
    /// Creates a context over [`standard_catalog`] with source bytes stored
    /// for every asset.
    #[must_use]
    pub fn new() -> Self {
        Self::with_catalog(standard_catalog())
    }

    /// Creates a context over `catalog`, seeding source bytes for its assets.
    #[must_use]
    pub fn with_catalog(catalog: MemoryCatalog) -> Self {
        let storage = TracingMemoryBackend::new();
        for asset in catalog.snapshot().assets {
            if let Some(location) = &asset.storage_location {
                storage.seed(location.clone(), format!("source of {}", asset.qualified_id()));
            }
        }
        Self {
            storage: Arc::new(storage),
            catalog: Arc::new(catalog),
            config: ProjectionConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ProjectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a service over this context.
    pub fn service(&self) -> ProjectionService {
        ProjectionService::from_catalog(
            Arc::clone(&self.catalog),
            Arc::clone(&self.storage) as Arc<dyn StorageBackend>,
            self.config.clone(),
        )
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
