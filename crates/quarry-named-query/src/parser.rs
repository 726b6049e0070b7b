//! Named-query template parsing.
//!
//! A template is a `&`-separated list of `key=value` pairs. Values are either
//! literals or references to request arguments:
//!
//! - `pN` or `{N}`: the Nth (1-based) positional argument
//! - `{name}`: the keyed argument `name`
//! - `{name:path}`: as above, with `___` turned back into `/`
//!
//! A pair `#=value` appends `value` to the positional arguments, so a stored
//! template can pin defaults that a request cannot override.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::CustomerId;
//! use quarry_named_query::parser::{QueryArgs, TemplateParser};
//! use quarry_named_query::query::OutputKind;
//!
//! let args = QueryArgs::new().with_keyed("s", "4");
//! let parsed = TemplateParser::new()
//!     .parse(CustomerId::new(42), "by-space", "space={s}&n=20", &args, OutputKind::Document)
//!     .unwrap();
//! assert_eq!(parsed.space, Some(4));
//! assert_eq!(parsed.page_size, Some(20));
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use quarry_core::CustomerId;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::query::{KindOptions, OrderDirection, OutputKind, ParsedQuery, QueryField, QueryOrder};

const ADDITIONAL_ARG_MARKER: char = '#';
const PARAMETER_PREFIX: char = 'p';
const PATH_REPLACEMENT: &str = "%2F";
const PATH_SEPARATOR_TOKEN: &str = "___";

/// Request-time arguments for a named query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryArgs {
    /// Positional arguments, in path order.
    pub positional: Vec<String>,
    /// Keyed arguments.
    pub keyed: BTreeMap<String, String>,
}

impl QueryArgs {
    /// Empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a request path such as `b1234/2` into positional arguments.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        Self {
            positional: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            keyed: BTreeMap::new(),
        }
    }

    /// Adds a positional argument.
    #[must_use]
    pub fn with_positional(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Adds a keyed argument.
    #[must_use]
    pub fn with_keyed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keyed.insert(key.into(), value.into());
        self
    }
}

/// Returns `Ok` if `name` can be used as a named-query name in storage paths.
///
/// # Errors
///
/// Returns [`TemplateError::InvalidQueryName`] for empty names, names starting
/// with `.`, or names with characters outside `[A-Za-z0-9._-]`.
pub fn validate_query_name(name: &str) -> Result<(), TemplateError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TemplateError::InvalidQueryName {
            name: name.to_string(),
        })
    }
}

/// Applies stored templates to request arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateParser;

impl TemplateParser {
    /// Creates a parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses `template` against `args` into a [`ParsedQuery`] of `kind`.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] when the template is empty, a placeholder
    /// cannot be resolved, or a typed key receives an unparseable value.
    pub fn parse(
        &self,
        customer: CustomerId,
        query_name: &str,
        template: &str,
        args: &QueryArgs,
        kind: OutputKind,
    ) -> Result<ParsedQuery, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::EmptyTemplate);
        }
        validate_query_name(query_name)?;

        let pairs: Vec<(&str, &str)> = template
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        let mut positional = args.positional.clone();
        positional.extend(
            pairs
                .iter()
                .filter(|(k, _)| k.starts_with(ADDITIONAL_ARG_MARKER))
                .map(|(_, v)| (*v).to_string()),
        );
        let resolver = ValueResolver {
            positional: &positional,
            keyed: &args.keyed,
        };

        let mut query = ParsedQuery::new(customer, query_name, kind);
        let mut order_direction = None;
        let mut kind_pairs = Vec::new();

        for &(key, raw) in &pairs {
            match key {
                "assetOrder" | "orderby" | "canvas" => query.ordering = parse_ordering(raw),
                "orderdir" => {
                    order_direction = Some(OrderDirection::from_template(&resolver.resolve(raw)?));
                }
                "space" => query.space = Some(parse_number(key, &resolver.resolve(raw)?)?),
                "spacename" => query.space_name = Some(resolver.resolve(raw)?),
                "s1" => query.strings[0] = Some(resolver.resolve(raw)?),
                "s2" => query.strings[1] = Some(resolver.resolve(raw)?),
                "s3" => query.strings[2] = Some(resolver.resolve(raw)?),
                "n1" => query.numbers[0] = Some(parse_number(key, &resolver.resolve(raw)?)?),
                "n2" => query.numbers[1] = Some(parse_number(key, &resolver.resolve(raw)?)?),
                "n3" => query.numbers[2] = Some(parse_number(key, &resolver.resolve(raw)?)?),
                "batch" => query.batches = parse_batches(key, &resolver.resolve(raw)?)?,
                "page" => query.page = Some(parse_positive(key, &resolver.resolve(raw)?)?),
                "n" | "pagesize" => {
                    query.page_size = Some(parse_positive(key, &resolver.resolve(raw)?)?);
                }
                "after" => query.created_after = Some(parse_date(key, &resolver.resolve(raw)?)?),
                "before" => query.created_before = Some(parse_date(key, &resolver.resolve(raw)?)?),
                k if k.starts_with(ADDITIONAL_ARG_MARKER) => {}
                _ => kind_pairs.push((key, raw)),
            }
        }

        if let Some(direction) = order_direction {
            match query.ordering.len() {
                0 => query.ordering.push(QueryOrder {
                    field: QueryField::Ordinal,
                    direction,
                }),
                1 => {
                    if let Some(single) = query.ordering.first_mut() {
                        single.direction = direction;
                    }
                }
                _ => tracing::debug!("orderdir ignored for multi-field ordering"),
            }
        }

        query.options = parse_kind_options(&query, kind, &kind_pairs, &resolver)?;
        Ok(query)
    }
}

fn parse_kind_options(
    query: &ParsedQuery,
    kind: OutputKind,
    pairs: &[(&str, &str)],
    resolver: &ValueResolver<'_>,
) -> Result<KindOptions, TemplateError> {
    let mut options = KindOptions::empty(kind);
    for &(key, raw) in pairs {
        match (&mut options, key) {
            (
                KindOptions::Document { object_name, .. } | KindOptions::Archive { object_name },
                "objectname",
            ) => *object_name = Some(query.format_template(raw)),
            (KindOptions::Document { cover_page, .. }, "coverpage") => {
                *cover_page = Some(resolver.resolve(raw)?);
            }
            (KindOptions::Document { redacted_message, .. }, "redactedmessage") => {
                *redacted_message = Some(resolver.resolve(raw)?);
            }
            (KindOptions::Manifest { label }, "label") => {
                *label = Some(query.format_template(raw));
            }
            _ => tracing::trace!(key, kind = %kind, "ignoring template key"),
        }
    }
    Ok(options)
}

struct ValueResolver<'a> {
    positional: &'a [String],
    keyed: &'a BTreeMap<String, String>,
}

impl ValueResolver<'_> {
    fn resolve(&self, element: &str) -> Result<String, TemplateError> {
        if let Some(inner) = element.strip_prefix('{').and_then(|e| e.strip_suffix('}')) {
            let (name, format) = match inner.split_once(':') {
                Some((name, format)) => (name.trim(), Some(format.trim())),
                None => (inner.trim(), None),
            };
            let value = if name.chars().all(|c| c.is_ascii_digit()) && !name.is_empty() {
                self.positional_arg(name, element)?
            } else if name.is_empty() {
                return Err(TemplateError::InvalidParameter {
                    element: element.to_string(),
                });
            } else {
                self.keyed
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TemplateError::MissingKeyed {
                        name: name.to_string(),
                    })?
            };
            return match format {
                None => Ok(value),
                Some("path") => Ok(value.replace(PATH_SEPARATOR_TOKEN, "/")),
                Some(other) => Err(TemplateError::UnknownFormat {
                    format: other.to_string(),
                }),
            };
        }

        match element.strip_prefix(PARAMETER_PREFIX) {
            Some(index) if !index.is_empty() => {
                if index.chars().all(|c| c.is_ascii_digit()) {
                    self.positional_arg(index, element)
                } else {
                    Err(TemplateError::InvalidParameter {
                        element: element.to_string(),
                    })
                }
            }
            _ => Ok(element.to_string()),
        }
    }

    fn positional_arg(&self, index: &str, element: &str) -> Result<String, TemplateError> {
        let index: usize = index
            .parse()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| TemplateError::InvalidParameter {
                element: element.to_string(),
            })?;
        self.positional
            .get(index - 1)
            .map(|arg| arg.replace(PATH_REPLACEMENT, "/"))
            .ok_or(TemplateError::MissingPositional { index })
    }
}

/// Parses `n1 desc;s2+asc;ordinal` style orderings. Unknown fields are dropped.
fn parse_ordering(element: &str) -> Vec<QueryOrder> {
    element
        .split(';')
        .filter_map(|clause| {
            let clause = clause.replace('+', " ");
            let mut parts = clause.split_whitespace();
            let name = parts.next()?;
            let Some(field) = QueryField::from_template(name) else {
                tracing::debug!(field = name, "ignoring unknown ordering field");
                return None;
            };
            let direction = parts
                .next()
                .map(OrderDirection::from_template)
                .unwrap_or_default();
            Some(QueryOrder { field, direction })
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TemplateError> {
    value.trim().parse().map_err(|_| TemplateError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_positive(key: &str, value: &str) -> Result<u32, TemplateError> {
    let n: u32 = parse_number(key, value)?;
    if n == 0 {
        return Err(TemplateError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(n)
}

fn parse_batches(key: &str, value: &str) -> Result<Vec<u32>, TemplateError> {
    let mut batches = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_number(key, s))
        .collect::<Result<Vec<u32>, _>>()?;
    batches.sort_unstable();
    batches.dedup();
    Ok(batches)
}

fn parse_date(key: &str, value: &str) -> Result<DateTime<Utc>, TemplateError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| TemplateError::InvalidDate {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(template: &str, args: &QueryArgs) -> Result<ParsedQuery, TemplateError> {
        TemplateParser::new().parse(
            CustomerId::new(42),
            "test-query",
            template,
            args,
            OutputKind::Manifest,
        )
    }

    #[test]
    fn keyed_and_literal_values() {
        let args = QueryArgs::new().with_keyed("s", "4");
        let q = parse("space={s}&n=20", &args).unwrap();
        assert_eq!(q.customer, CustomerId::new(42));
        assert_eq!(q.space, Some(4));
        assert_eq!(q.page_size, Some(20));
        assert!(q.ordering.is_empty());
    }

    #[test]
    fn positional_forms_are_equivalent() {
        let args = QueryArgs::from_path("b1234/7");
        let a = parse("s1=p1&n1=p2", &args).unwrap();
        let b = parse("s1={1}&n1={2}", &args).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.strings[0].as_deref(), Some("b1234"));
        assert_eq!(a.numbers[0], Some(7));
    }

    #[test]
    fn additional_args_append_after_request_args() {
        let args = QueryArgs::from_path("first");
        let q = parse("s1=p1&s2=p2&#=pinned", &args).unwrap();
        assert_eq!(q.strings[1].as_deref(), Some("pinned"));
    }

    #[test]
    fn encoded_and_tokenised_path_separators() {
        let args = QueryArgs::from_path("a%2Fb").with_keyed("folder", "x___y");
        let q = parse("s1=p1&s2={folder:path}", &args).unwrap();
        assert_eq!(q.strings[0].as_deref(), Some("a/b"));
        assert_eq!(q.strings[1].as_deref(), Some("x/y"));
    }

    #[test]
    fn missing_arguments_are_template_errors() {
        let err = parse("s1=p2", &QueryArgs::from_path("only-one")).unwrap_err();
        assert_eq!(err, TemplateError::MissingPositional { index: 2 });

        let err = parse("s1={ref}", &QueryArgs::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingKeyed { name: "ref".into() });

        let err = parse("s1={ref:upper}", &QueryArgs::new().with_keyed("ref", "x")).unwrap_err();
        assert_eq!(err, TemplateError::UnknownFormat { format: "upper".into() });

        let err = parse("s1=pX", &QueryArgs::new()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidParameter { .. }));
    }

    #[test]
    fn typed_keys_validate_values() {
        let err = parse("space=p1", &QueryArgs::from_path("four")).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidNumber { .. }));

        let err = parse("n=0", &QueryArgs::new()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidNumber { .. }));

        let err = parse("after=yesterday", &QueryArgs::new()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidDate { .. }));
    }

    #[test]
    fn empty_template_and_bad_names() {
        assert_eq!(
            parse("   ", &QueryArgs::new()).unwrap_err(),
            TemplateError::EmptyTemplate
        );
        let err = TemplateParser::new()
            .parse(CustomerId::new(1), "../x", "space=1", &QueryArgs::new(), OutputKind::Archive)
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidQueryName { .. }));
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let q = parse("space=3&garbage&=7&n1=&s1=x", &QueryArgs::new()).unwrap();
        assert_eq!(q.space, Some(3));
        assert_eq!(q.numbers[0], None);
        assert_eq!(q.strings[0].as_deref(), Some("x"));
    }

    #[test]
    fn ordering_with_directions_and_separators() {
        let q = parse("assetOrder=n1 desc;s2+asc;bogus;n3", &QueryArgs::new()).unwrap();
        assert_eq!(
            q.ordering,
            vec![
                QueryOrder::descending(QueryField::Number1),
                QueryOrder::ascending(QueryField::String2),
                QueryOrder::ascending(QueryField::Number3),
            ]
        );

        let legacy = parse("canvas=n2&orderdir=desc", &QueryArgs::new()).unwrap();
        assert_eq!(legacy.ordering, vec![QueryOrder::descending(QueryField::Number2)]);
    }

    #[test]
    fn batches_and_dates() {
        let q = parse("batch=9,3,3&after=2024-01-02&before=2024-02-01T12:00:00Z", &QueryArgs::new())
            .unwrap();
        assert_eq!(q.batches, vec![3, 9]);
        assert_eq!(
            q.created_after.unwrap().to_rfc3339(),
            "2024-01-02T00:00:00+00:00"
        );
        assert!(q.created_before.is_some());
    }

    #[test]
    fn kind_specific_keys() {
        let args = QueryArgs::from_path("b1234");
        let manifest = parse("s1=p1&label=Book {s1}&objectname=ignored", &args).unwrap();
        assert_eq!(
            manifest.options,
            KindOptions::Manifest {
                label: Some("Book b1234".into())
            }
        );

        let document = TemplateParser::new()
            .parse(
                CustomerId::new(42),
                "pdf",
                "s1=p1&objectname={s1}.pdf&coverpage=https://example.org/cover&redactedmessage=Withheld",
                &args,
                OutputKind::Document,
            )
            .unwrap();
        assert_eq!(
            document.options,
            KindOptions::Document {
                object_name: Some("b1234.pdf".into()),
                cover_page: Some("https://example.org/cover".into()),
                redacted_message: Some("Withheld".into()),
            }
        );
    }

    #[test]
    fn query_args_from_path_drops_empty_segments() {
        let args = QueryArgs::from_path("/a//b/");
        assert_eq!(args.positional, vec!["a", "b"]);
    }
}
