//! In-memory catalog for tests and the CLI.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use quarry_core::{CustomerContext, CustomerId};
use serde::{Deserialize, Serialize};

use super::{
    Asset, AssetCatalog, AssetQuery, AssetStream, CustomerResolver, NamedQueryRecord,
    NamedQueryStore,
};
use crate::error::{NamedQueryError, Result};

/// Serializable contents of a [`MemoryCatalog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogData {
    /// Known customers.
    #[serde(default)]
    pub customers: Vec<CustomerContext>,
    /// Stored named queries.
    #[serde(default)]
    pub named_queries: Vec<NamedQueryRecord>,
    /// Assets.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Customer registry, named-query store and asset catalog held in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    data: RwLock<CatalogData>,
    streams_opened: AtomicUsize,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing catalog data.
    #[must_use]
    pub fn from_data(data: CatalogData) -> Self {
        Self {
            data: RwLock::new(data),
            streams_opened: AtomicUsize::new(0),
        }
    }

    /// Parses catalog data from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`NamedQueryError::Catalog`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map(Self::from_data)
            .map_err(|e| NamedQueryError::catalog(format!("invalid catalog JSON: {e}")))
    }

    /// Adds a customer.
    #[must_use]
    pub fn with_customer(self, customer: CustomerContext) -> Self {
        self.write(|d| d.customers.push(customer));
        self
    }

    /// Adds a named query.
    #[must_use]
    pub fn with_query(self, query: NamedQueryRecord) -> Self {
        self.write(|d| d.named_queries.push(query));
        self
    }

    /// Adds an asset.
    #[must_use]
    pub fn with_asset(self, asset: Asset) -> Self {
        self.insert_asset(asset);
        self
    }

    /// Adds or replaces an asset, keyed by its qualified id.
    pub fn insert_asset(&self, asset: Asset) {
        self.write(|d| {
            d.assets.retain(|a| a.qualified_id() != asset.qualified_id());
            d.assets.push(asset);
        });
    }

    /// Number of asset streams opened so far.
    #[must_use]
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Returns a copy of the catalog contents.
    #[must_use]
    pub fn snapshot(&self) -> CatalogData {
        self.data
            .read()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn write(&self, f: impl FnOnce(&mut CatalogData)) {
        match self.data.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn matching(&self, query: &AssetQuery) -> Vec<Asset> {
        let data = self.snapshot();
        let mut assets: Vec<Asset> = data
            .assets
            .into_iter()
            .filter(|a| query.matches(a))
            .collect();
        assets.sort_by(|a, b| query.compare(a, b));
        assets
    }
}

#[async_trait]
impl CustomerResolver for MemoryCatalog {
    async fn resolve_customer(&self, token: &str) -> Result<Option<CustomerContext>> {
        Ok(self
            .snapshot()
            .customers
            .into_iter()
            .find(|c| c.matches_token(token)))
    }
}

#[async_trait]
impl NamedQueryStore for MemoryCatalog {
    async fn get_named_query(
        &self,
        customer: CustomerId,
        name: &str,
    ) -> Result<Option<NamedQueryRecord>> {
        let queries = self.snapshot().named_queries;
        let own = queries
            .iter()
            .find(|q| q.customer == customer && q.name == name);
        let global = || queries.iter().find(|q| q.global && q.name == name);
        Ok(own.or_else(global).cloned())
    }
}

#[async_trait]
impl AssetCatalog for MemoryCatalog {
    async fn count(&self, query: &AssetQuery) -> Result<u64> {
        Ok(self.matching(query).len() as u64)
    }

    fn stream<'a>(&'a self, query: &'a AssetQuery) -> AssetStream<'a> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let page: Vec<Result<Asset>> = self
            .matching(query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Ok)
            .collect();
        futures::stream::iter(page).boxed()
    }
}
