//! Parsed named-query model.
//!
//! A [`ParsedQuery`] is the semantic result of applying a stored template to
//! request arguments. It carries no raw argument strings, so two requests that
//! mean the same thing produce equal values (and equal cache keys).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use quarry_core::CustomerId;
use serde::{Deserialize, Serialize};

/// The artifact format a named query is projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// Multi-page document, one page per asset.
    Document,
    /// Archive bundle, one entry per asset.
    Archive,
    /// Image-presentation manifest, one canvas per asset.
    Manifest,
    /// Plain identifier list; never cached.
    RawList,
}

impl OutputKind {
    /// All output kinds.
    pub const ALL: [Self; 4] = [Self::Document, Self::Archive, Self::Manifest, Self::RawList];

    /// Stable name used in storage paths, metrics and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Archive => "archive",
            Self::Manifest => "manifest",
            Self::RawList => "raw-list",
        }
    }

    /// File extension of the stored artifact.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Document => "pdf",
            Self::Archive => "tar",
            Self::Manifest | Self::RawList => "json",
        }
    }

    /// MIME type of the artifact bytes.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Document => "application/pdf",
            Self::Archive => "application/x-tar",
            Self::Manifest => "application/ld+json",
            Self::RawList => "application/json",
        }
    }

    /// Returns true if artifacts of this kind go through the control-file cache.
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        !matches!(self, Self::RawList)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "pdf" => Ok(Self::Document),
            "archive" | "zip" | "tar" => Ok(Self::Archive),
            "manifest" | "iiif" => Ok(Self::Manifest),
            "raw-list" | "raw" => Ok(Self::RawList),
            other => Err(format!("unknown output kind '{other}'")),
        }
    }
}

/// An asset field usable for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryField {
    /// String metadata slot 1.
    String1,
    /// String metadata slot 2.
    String2,
    /// String metadata slot 3.
    String3,
    /// Numeric metadata slot 1.
    Number1,
    /// Numeric metadata slot 2.
    Number2,
    /// Numeric metadata slot 3.
    Number3,
    /// Catalog-assigned ordinal.
    Ordinal,
    /// Asset identifier.
    Id,
    /// Creation timestamp.
    Created,
}

impl QueryField {
    /// Parses a template field name (`s1`, `n2`, `ordinal`, ...).
    #[must_use]
    pub fn from_template(name: &str) -> Option<Self> {
        match name.trim() {
            "s1" => Some(Self::String1),
            "s2" => Some(Self::String2),
            "s3" => Some(Self::String3),
            "n1" => Some(Self::Number1),
            "n2" => Some(Self::Number2),
            "n3" => Some(Self::Number3),
            "ordinal" => Some(Self::Ordinal),
            "id" => Some(Self::Id),
            "created" => Some(Self::Created),
            _ => None,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl OrderDirection {
    /// Parses `asc`/`desc` (case-insensitive); anything else is ascending.
    #[must_use]
    pub fn from_template(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            Self::Descending
        } else {
            Self::Ascending
        }
    }
}

/// One ordering clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOrder {
    /// Field to order by.
    pub field: QueryField,
    /// Direction.
    pub direction: OrderDirection,
}

impl QueryOrder {
    /// Ascending order on `field`.
    #[must_use]
    pub const fn ascending(field: QueryField) -> Self {
        Self {
            field,
            direction: OrderDirection::Ascending,
        }
    }

    /// Descending order on `field`.
    #[must_use]
    pub const fn descending(field: QueryField) -> Self {
        Self {
            field,
            direction: OrderDirection::Descending,
        }
    }
}

/// Output-kind-specific fields of a parsed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum KindOptions {
    /// Document projection options.
    #[serde(rename_all = "camelCase")]
    Document {
        /// Formatted download name.
        object_name: Option<String>,
        /// URL rendered on a leading cover page.
        cover_page: Option<String>,
        /// Text rendered on redacted pages.
        redacted_message: Option<String>,
    },
    /// Archive projection options.
    #[serde(rename_all = "camelCase")]
    Archive {
        /// Formatted download name.
        object_name: Option<String>,
    },
    /// Manifest projection options.
    Manifest {
        /// Formatted manifest label.
        label: Option<String>,
    },
    /// Raw list has no options.
    RawList,
}

impl KindOptions {
    /// Empty options for `kind`.
    #[must_use]
    pub const fn empty(kind: OutputKind) -> Self {
        match kind {
            OutputKind::Document => Self::Document {
                object_name: None,
                cover_page: None,
                redacted_message: None,
            },
            OutputKind::Archive => Self::Archive { object_name: None },
            OutputKind::Manifest => Self::Manifest { label: None },
            OutputKind::RawList => Self::RawList,
        }
    }

    /// The output kind these options belong to.
    #[must_use]
    pub const fn kind(&self) -> OutputKind {
        match self {
            Self::Document { .. } => OutputKind::Document,
            Self::Archive { .. } => OutputKind::Archive,
            Self::Manifest { .. } => OutputKind::Manifest,
            Self::RawList => OutputKind::RawList,
        }
    }

    /// Download name, when the kind has one.
    #[must_use]
    pub fn object_name(&self) -> Option<&str> {
        match self {
            Self::Document { object_name, .. } | Self::Archive { object_name } => {
                object_name.as_deref()
            }
            Self::Manifest { .. } | Self::RawList => None,
        }
    }
}

/// Order the catalog applies after any requested clauses.
const TIEBREAK: [QueryOrder; 2] = [
    QueryOrder::ascending(QueryField::Ordinal),
    QueryOrder::ascending(QueryField::Id),
];

/// A named query bound to concrete argument values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuery {
    /// Owning customer; always present.
    pub customer: CustomerId,
    /// Name of the stored query.
    pub query_name: String,
    /// Space id filter.
    pub space: Option<u32>,
    /// Space name filter.
    pub space_name: Option<String>,
    /// String metadata filters `s1..s3`.
    pub strings: [Option<String>; 3],
    /// Numeric metadata filters `n1..n3`.
    pub numbers: [Option<i64>; 3],
    /// Batch id filter (any of).
    pub batches: Vec<u32>,
    /// Only assets created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only assets created before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Requested ordering; empty means the catalog default.
    pub ordering: Vec<QueryOrder>,
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size; unbounded when absent.
    pub page_size: Option<u32>,
    /// Output-kind-specific fields.
    pub options: KindOptions,
}

impl ParsedQuery {
    /// Creates an unfiltered query for `customer`.
    #[must_use]
    pub fn new(customer: CustomerId, query_name: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            customer,
            query_name: query_name.into(),
            space: None,
            space_name: None,
            strings: [None, None, None],
            numbers: [None, None, None],
            batches: Vec::new(),
            created_after: None,
            created_before: None,
            ordering: Vec::new(),
            page: None,
            page_size: None,
            options: KindOptions::empty(kind),
        }
    }

    /// The requested output kind.
    #[must_use]
    pub const fn kind(&self) -> OutputKind {
        self.options.kind()
    }

    /// Returns the canonical form of this query.
    ///
    /// Requests that select the same assets in the same order normalize to
    /// equal values:
    /// - the page number is dropped when there is no page size, and page 1 is
    ///   the same as no page
    /// - a repeated ordering field is dropped after its first clause
    /// - trailing clauses that restate the catalog tiebreak are dropped
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.page_size.is_none() || out.page.is_some_and(|p| p <= 1) {
            out.page = None;
        }

        let mut seen = Vec::with_capacity(out.ordering.len());
        out.ordering.retain(|order| {
            if seen.contains(&order.field) {
                false
            } else {
                seen.push(order.field);
                true
            }
        });
        for len in (1..=TIEBREAK.len()).rev() {
            if out.ordering.ends_with(&TIEBREAK[..len]) {
                out.ordering.truncate(out.ordering.len() - len);
                break;
            }
        }
        out
    }

    /// Replaces `{s1}..{s3}`, `{n1}..{n3}` and `{space}` in `template`.
    ///
    /// Tokens without a value are removed.
    #[must_use]
    pub fn format_template(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (i, value) in self.strings.iter().enumerate() {
            out = out.replace(&format!("{{s{}}}", i + 1), value.as_deref().unwrap_or(""));
        }
        for (i, value) in self.numbers.iter().enumerate() {
            let value = value.map(|n| n.to_string()).unwrap_or_default();
            out = out.replace(&format!("{{n{}}}", i + 1), &value);
        }
        let space = self.space.map(|s| s.to_string()).unwrap_or_default();
        out.replace("{space}", &space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_kind_names_roundtrip() {
        for kind in OutputKind::ALL {
            assert_eq!(kind.as_str().parse::<OutputKind>().unwrap(), kind);
        }
        assert_eq!("PDF".parse::<OutputKind>().unwrap(), OutputKind::Document);
        assert!("mp4".parse::<OutputKind>().is_err());
    }

    #[test]
    fn only_raw_list_bypasses_cache() {
        assert!(!OutputKind::RawList.is_persisted());
        assert!(OutputKind::Document.is_persisted());
        assert!(OutputKind::Archive.is_persisted());
        assert!(OutputKind::Manifest.is_persisted());
    }

    #[test]
    fn format_template_fills_and_blanks() {
        let mut q = ParsedQuery::new(CustomerId::new(1), "q", OutputKind::Document);
        q.strings[0] = Some("b1234".into());
        q.numbers[1] = Some(7);
        q.space = Some(3);
        assert_eq!(
            q.format_template("{s1}-vol{n2}-{s3}{n1}.pdf"),
            "b1234-vol7-.pdf"
        );
        assert_eq!(q.format_template("space {space}"), "space 3");
    }

    #[test]
    fn normalized_drops_redundant_paging() {
        let mut q = ParsedQuery::new(CustomerId::new(1), "q", OutputKind::Archive);
        q.page = Some(4);
        assert_eq!(q.normalized().page, None);

        q.page_size = Some(20);
        assert_eq!(q.normalized().page, Some(4));
        q.page = Some(1);
        assert_eq!(q.normalized().page, None);
        assert_eq!(q.normalized().page_size, Some(20));
    }

    #[test]
    fn normalized_drops_redundant_ordering() {
        let mut q = ParsedQuery::new(CustomerId::new(1), "q", OutputKind::Archive);
        q.ordering = vec![QueryOrder::ascending(QueryField::Ordinal)];
        assert!(q.normalized().ordering.is_empty());

        q.ordering = vec![
            QueryOrder::descending(QueryField::Number1),
            QueryOrder::ascending(QueryField::Number1),
            QueryOrder::ascending(QueryField::Ordinal),
            QueryOrder::ascending(QueryField::Id),
        ];
        assert_eq!(
            q.normalized().ordering,
            vec![QueryOrder::descending(QueryField::Number1)]
        );

        q.ordering = vec![QueryOrder::descending(QueryField::Ordinal)];
        assert_eq!(q.normalized().ordering, q.ordering);
        q.ordering = vec![QueryOrder::ascending(QueryField::Id)];
        assert_eq!(q.normalized().ordering, q.ordering);
    }

    #[test]
    fn direction_parsing_is_lenient() {
        assert_eq!(OrderDirection::from_template("DESC"), OrderDirection::Descending);
        assert_eq!(OrderDirection::from_template("sideways"), OrderDirection::Ascending);
    }
}
