//! Narrow interfaces to the customer registry, named-query store and asset catalog.
//!
//! The engine never talks to a database directly. It builds an [`AssetQuery`]
//! (AND-ed predicates, ordering, paging) and consumes the lazy stream returned
//! by an [`AssetCatalog`].

mod memory;

pub use memory::{CatalogData, MemoryCatalog};

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use quarry_core::{CustomerContext, CustomerId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::{OrderDirection, QueryField, QueryOrder};

/// Lazy sequence of assets produced by a catalog query.
pub type AssetStream<'a> = BoxStream<'a, Result<Asset>>;

/// A stored asset, as far as projections need to know it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Owning customer.
    pub customer: CustomerId,
    /// Space id.
    pub space: u32,
    /// Local name, unique within the space.
    pub id: String,
    /// Name of the space.
    #[serde(default)]
    pub space_name: Option<String>,
    /// String metadata slot 1.
    #[serde(default)]
    pub string1: Option<String>,
    /// String metadata slot 2.
    #[serde(default)]
    pub string2: Option<String>,
    /// String metadata slot 3.
    #[serde(default)]
    pub string3: Option<String>,
    /// Numeric metadata slot 1.
    #[serde(default)]
    pub number1: Option<i64>,
    /// Numeric metadata slot 2.
    #[serde(default)]
    pub number2: Option<i64>,
    /// Numeric metadata slot 3.
    #[serde(default)]
    pub number3: Option<i64>,
    /// Catalog-assigned ordinal; the default sort key.
    #[serde(default)]
    pub ordinal: i64,
    /// Ingest batch.
    #[serde(default)]
    pub batch: Option<u32>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Roles required to view the asset; empty means open.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Size of the source bytes.
    #[serde(default)]
    pub size: u64,
    /// Object-storage key of the source bytes.
    #[serde(default)]
    pub storage_location: Option<String>,
    /// Pixel width.
    #[serde(default)]
    pub width: Option<u32>,
    /// Pixel height.
    #[serde(default)]
    pub height: Option<u32>,
    /// MIME type of the source.
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "image/jpeg".to_string()
}

impl Asset {
    /// Creates an open image asset with no metadata.
    #[must_use]
    pub fn new(customer: CustomerId, space: u32, id: impl Into<String>) -> Self {
        Self {
            customer,
            space,
            id: id.into(),
            space_name: None,
            string1: None,
            string2: None,
            string3: None,
            number1: None,
            number2: None,
            number3: None,
            ordinal: 0,
            batch: None,
            created: DateTime::<Utc>::UNIX_EPOCH,
            roles: BTreeSet::new(),
            size: 0,
            storage_location: None,
            width: None,
            height: None,
            media_type: default_media_type(),
        }
    }

    /// `customer/space/id`, unique across the platform.
    #[must_use]
    pub fn qualified_id(&self) -> String {
        format!("{}/{}/{}", self.customer, self.space, self.id)
    }

    /// String metadata slot `slot` (0-based).
    #[must_use]
    pub fn string(&self, slot: usize) -> Option<&str> {
        match slot {
            0 => self.string1.as_deref(),
            1 => self.string2.as_deref(),
            2 => self.string3.as_deref(),
            _ => None,
        }
    }

    /// Numeric metadata slot `slot` (0-based).
    #[must_use]
    pub fn number(&self, slot: usize) -> Option<i64> {
        match slot {
            0 => self.number1,
            1 => self.number2,
            2 => self.number3,
            _ => None,
        }
    }

    /// Returns true for audio and video sources.
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        self.media_type.starts_with("audio/") || self.media_type.starts_with("video/")
    }

    fn compare_field(&self, other: &Self, field: QueryField) -> Ordering {
        match field {
            QueryField::String1 => self.string1.cmp(&other.string1),
            QueryField::String2 => self.string2.cmp(&other.string2),
            QueryField::String3 => self.string3.cmp(&other.string3),
            QueryField::Number1 => self.number1.cmp(&other.number1),
            QueryField::Number2 => self.number2.cmp(&other.number2),
            QueryField::Number3 => self.number3.cmp(&other.number3),
            QueryField::Ordinal => self.ordinal.cmp(&other.ordinal),
            QueryField::Id => self.id.cmp(&other.id),
            QueryField::Created => self.created.cmp(&other.created),
        }
    }
}

/// A single filter condition. An [`AssetQuery`] ANDs all of its predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    /// Asset belongs to the customer.
    Customer(CustomerId),
    /// Asset is in the space.
    Space(u32),
    /// Asset is in a space with this name.
    SpaceName(String),
    /// String slot (0-based) equals the value.
    StringEquals {
        /// Slot index.
        slot: usize,
        /// Required value.
        value: String,
    },
    /// Numeric slot (0-based) equals the value.
    NumberEquals {
        /// Slot index.
        slot: usize,
        /// Required value.
        value: i64,
    },
    /// Asset was ingested in one of these batches.
    BatchIn(Vec<u32>),
    /// Asset was created at or after the instant.
    CreatedAtOrAfter(DateTime<Utc>),
    /// Asset was created before the instant.
    CreatedBefore(DateTime<Utc>),
}

impl Predicate {
    /// Evaluates the predicate against an asset.
    #[must_use]
    pub fn matches(&self, asset: &Asset) -> bool {
        match self {
            Self::Customer(c) => asset.customer == *c,
            Self::Space(s) => asset.space == *s,
            Self::SpaceName(name) => asset.space_name.as_deref() == Some(name.as_str()),
            Self::StringEquals { slot, value } => asset.string(*slot) == Some(value.as_str()),
            Self::NumberEquals { slot, value } => asset.number(*slot) == Some(*value),
            Self::BatchIn(batches) => asset.batch.is_some_and(|b| batches.contains(&b)),
            Self::CreatedAtOrAfter(t) => asset.created >= *t,
            Self::CreatedBefore(t) => asset.created < *t,
        }
    }
}

/// Filter, ordering and paging for a catalog query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetQuery {
    /// Conditions, combined with AND.
    pub predicates: Vec<Predicate>,
    /// Ordering clauses; ties are always broken by ordinal then id.
    pub ordering: Vec<QueryOrder>,
    /// Number of matches to skip.
    pub offset: u64,
    /// Maximum number of matches to return.
    pub limit: Option<u64>,
}

impl AssetQuery {
    /// Unpaged query with the given predicates and default ordering.
    #[must_use]
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            ordering: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Returns true if every predicate matches.
    #[must_use]
    pub fn matches(&self, asset: &Asset) -> bool {
        self.predicates.iter().all(|p| p.matches(asset))
    }

    /// Total order used to sort matches.
    #[must_use]
    pub fn compare(&self, a: &Asset, b: &Asset) -> Ordering {
        self.ordering
            .iter()
            .map(|order| {
                let ord = a.compare_field(b, order.field);
                match order.direction {
                    OrderDirection::Ascending => ord,
                    OrderDirection::Descending => ord.reverse(),
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.space.cmp(&b.space))
    }
}

/// A stored named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedQueryRecord {
    /// Query name, unique per customer.
    pub name: String,
    /// Owning customer.
    pub customer: CustomerId,
    /// Template string.
    pub template: String,
    /// Global queries are usable by every customer.
    #[serde(default)]
    pub global: bool,
}

/// Resolves a customer from a request path token.
#[async_trait]
pub trait CustomerResolver: Send + Sync {
    /// Returns the customer addressed by `token` (numeric id or name).
    async fn resolve_customer(&self, token: &str) -> Result<Option<CustomerContext>>;
}

/// Looks up stored named queries.
#[async_trait]
pub trait NamedQueryStore: Send + Sync {
    /// Returns the customer's query named `name`, or a global query of that name.
    async fn get_named_query(
        &self,
        customer: CustomerId,
        name: &str,
    ) -> Result<Option<NamedQueryRecord>>;
}

/// Executes asset queries.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Number of assets matching the query's predicates, ignoring paging.
    async fn count(&self, query: &AssetQuery) -> Result<u64>;

    /// Lazily streams the matching page in query order.
    fn stream<'a>(&'a self, query: &'a AssetQuery) -> AssetStream<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, ordinal: i64) -> Asset {
        Asset {
            ordinal,
            ..Asset::new(CustomerId::new(1), 1, id)
        }
    }

    #[test]
    fn default_order_is_ordinal_then_id() {
        let q = AssetQuery::new(vec![]);
        let mut assets = vec![asset("b", 2), asset("c", 1), asset("a", 2)];
        assets.sort_by(|a, b| q.compare(a, b));
        let ids: Vec<_> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn explicit_order_falls_back_to_default() {
        let mut q = AssetQuery::new(vec![]);
        q.ordering = vec![QueryOrder::descending(QueryField::Number1)];
        let mut a = asset("a", 3);
        a.number1 = Some(5);
        let mut b = asset("b", 1);
        b.number1 = Some(5);
        let mut c = asset("c", 2);
        c.number1 = Some(9);
        let mut assets = vec![a, b, c];
        assets.sort_by(|x, y| q.compare(x, y));
        let ids: Vec<_> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn predicates_are_anded() {
        let mut a = asset("a", 1);
        a.string1 = Some("x".into());
        a.batch = Some(4);
        let q = AssetQuery::new(vec![
            Predicate::Customer(CustomerId::new(1)),
            Predicate::StringEquals {
                slot: 0,
                value: "x".into(),
            },
            Predicate::BatchIn(vec![3, 4]),
        ]);
        assert!(q.matches(&a));

        a.batch = Some(5);
        assert!(!q.matches(&a));
    }

    #[test]
    fn asset_json_defaults() {
        let a: Asset = serde_json::from_str(
            r#"{"customer": 42, "space": 4, "id": "img1", "created": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(a.qualified_id(), "42/4/img1");
        assert_eq!(a.media_type, "image/jpeg");
        assert!(a.roles.is_empty());
    }
}
