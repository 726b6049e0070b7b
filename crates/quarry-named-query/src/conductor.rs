//! Turns a [`ParsedQuery`] into a catalog query and its lazy result.

use std::fmt;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use quarry_core::CancelSignal;

use crate::catalog::{Asset, AssetCatalog, AssetQuery, AssetStream, Predicate};
use crate::error::{NamedQueryError, Result};
use crate::query::ParsedQuery;

/// The assets matched by a parsed query.
///
/// Holds the catalog query rather than the assets themselves; every call to
/// [`ResolvedResult::assets`] re-runs it, in the same order.
#[derive(Clone)]
pub struct ResolvedResult {
    /// The query that was resolved.
    pub query: ParsedQuery,
    /// The catalog query built from it.
    pub asset_query: AssetQuery,
    /// Number of matches ignoring paging.
    pub total: u64,
    catalog: Arc<dyn AssetCatalog>,
}

impl ResolvedResult {
    /// Streams the matched page in order.
    #[must_use]
    pub fn assets(&self) -> AssetStream<'_> {
        self.catalog.stream(&self.asset_query)
    }

    /// Streams the matched page, failing with `Cancelled` once `cancel` fires.
    #[must_use]
    pub fn assets_until_cancelled<'a>(&'a self, cancel: &'a CancelSignal) -> AssetStream<'a> {
        self.assets()
            .and_then(move |asset| async move {
                cancel.check("catalog stream")?;
                Ok::<_, NamedQueryError>(asset)
            })
            .boxed()
    }

    /// Collects the matched page into memory.
    ///
    /// # Errors
    ///
    /// Returns the first catalog error, or `Cancelled`.
    pub async fn collect_assets(&self, cancel: &CancelSignal) -> Result<Vec<Asset>> {
        self.assets_until_cancelled(cancel).try_collect().await
    }

    /// Returns true if the query matched nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl fmt::Debug for ResolvedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedResult")
            .field("query", &self.query)
            .field("asset_query", &self.asset_query)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Executes parsed queries against an asset catalog.
#[derive(Clone)]
pub struct Conductor {
    catalog: Arc<dyn AssetCatalog>,
}

impl Conductor {
    /// Creates a conductor over `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn AssetCatalog>) -> Self {
        Self { catalog }
    }

    /// Builds the catalog query for `query`: customer equality, optional space,
    /// metadata, batch and date predicates, ordering and paging.
    #[must_use]
    pub fn build_asset_query(query: &ParsedQuery) -> AssetQuery {
        let mut predicates = vec![Predicate::Customer(query.customer)];
        if let Some(space) = query.space {
            predicates.push(Predicate::Space(space));
        }
        if let Some(name) = &query.space_name {
            predicates.push(Predicate::SpaceName(name.clone()));
        }
        for (slot, value) in query.strings.iter().enumerate() {
            if let Some(value) = value {
                predicates.push(Predicate::StringEquals {
                    slot,
                    value: value.clone(),
                });
            }
        }
        for (slot, value) in query.numbers.iter().enumerate() {
            if let Some(value) = value {
                predicates.push(Predicate::NumberEquals {
                    slot,
                    value: *value,
                });
            }
        }
        if !query.batches.is_empty() {
            predicates.push(Predicate::BatchIn(query.batches.clone()));
        }
        if let Some(after) = query.created_after {
            predicates.push(Predicate::CreatedAtOrAfter(after));
        }
        if let Some(before) = query.created_before {
            predicates.push(Predicate::CreatedBefore(before));
        }

        let (offset, limit) = match query.page_size {
            Some(size) => {
                let page = u64::from(query.page.unwrap_or(1).max(1));
                ((page - 1) * u64::from(size), Some(u64::from(size)))
            }
            None => (0, None),
        };

        AssetQuery {
            predicates,
            ordering: query.ordering.clone(),
            offset,
            limit,
        }
    }

    /// Resolves `query` against the catalog.
    ///
    /// Zero matches is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fired, or the catalog's error.
    pub async fn resolve(&self, query: &ParsedQuery, cancel: &CancelSignal) -> Result<ResolvedResult> {
        cancel.check("catalog query")?;
        let asset_query = Self::build_asset_query(query);

        let total = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(quarry_core::Error::cancelled("catalog query").into()),
            total = self.catalog.count(&asset_query) => total?,
        };

        tracing::debug!(
            customer = %query.customer,
            query = %query.query_name,
            total,
            "resolved named query"
        );

        Ok(ResolvedResult {
            query: query.clone(),
            asset_query,
            total,
            catalog: Arc::clone(&self.catalog),
        })
    }
}
