//! # Query Options
//!
//! Turns the raw OData query string into [`QueryOptions`]. Only the
//! recognized system options are kept; any other key is dropped silently.

use serde::Serialize;

use crate::errors::{ODataError, ODataResult};

use super::filter::FilterExpr;
use super::parser::parse_filter;

/// Query-string keys that survive the transform
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "$",
    "$expand",
    "$filter",
    "$format",
    "$inlinecount",
    "$select",
    "$skip",
    "$top",
    "$orderby",
];

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `$orderby` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Structured query handed to hooks and adapters
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryOptions {
    pub collection: String,

    #[serde(rename = "$filter")]
    pub filter: FilterExpr,

    #[serde(rename = "$select", skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,

    #[serde(rename = "$expand", skip_serializing_if = "Option::is_none")]
    pub expand: Option<Vec<String>>,

    #[serde(rename = "$orderby", skip_serializing_if = "Option::is_none")]
    pub orderby: Option<Vec<OrderBy>>,

    #[serde(rename = "$skip", skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,

    #[serde(rename = "$top", skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,

    #[serde(rename = "$format", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// `@odata.count` requested alongside the entities
    #[serde(rename = "$inlinecount")]
    pub inlinecount: bool,

    /// Count-only request (`/{collection}/$count`)
    #[serde(rename = "$count")]
    pub count: bool,
}

impl QueryOptions {
    /// Options for a collection with no query string
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Build options from decoded query-string pairs
    ///
    /// Later duplicates of a key win. Empty values count as absent, except
    /// for `$count` whose mere presence turns on the inline count.
    pub fn from_pairs<I, K, V>(collection: impl Into<String>, pairs: I) -> ODataResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::new(collection);
        let mut count_requested = false;
        let mut kept: Vec<(String, String)> = Vec::new();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == "$count" {
                count_requested = true;
                continue;
            }
            if !RECOGNIZED_OPTIONS.contains(&key) {
                continue;
            }
            kept.retain(|(k, _)| k != key);
            if !value.is_empty() {
                kept.push((key.to_string(), value.to_string()));
            }
        }

        for (key, value) in kept {
            match key.as_str() {
                "$filter" => options.filter = parse_filter(&value)?,
                "$select" => options.select = Some(parse_field_list(&value)),
                "$expand" => options.expand = Some(parse_field_list(&value)),
                "$orderby" => options.orderby = Some(parse_orderby(&value)?),
                "$skip" => options.skip = Some(parse_non_negative("$skip", &value)?),
                "$top" => options.top = Some(parse_non_negative("$top", &value)?),
                "$format" => options.format = Some(value),
                "$inlinecount" => options.inlinecount = parse_inlinecount(&value)?,
                _ => {}
            }
        }

        if count_requested {
            options.inlinecount = true;
        }

        Ok(options)
    }

    /// Restrict to one entity, replacing any client `$filter`
    ///
    /// Quote characters are stripped from the id literal.
    pub fn for_entity(mut self, raw_id: &str) -> Self {
        self.filter = FilterExpr::eq("_id", strip_quotes(raw_id).into());
        self
    }

    /// Set when the filter is the single-entity `_id` equality
    pub fn is_single_entity(&self) -> bool {
        self.filter.entity_id().is_some()
    }
}

/// Remove every `'` and `"` from an id literal
pub fn strip_quotes(raw: &str) -> String {
    raw.chars().filter(|c| *c != '\'' && *c != '"').collect()
}

fn parse_field_list(value: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for field in value.split(',').map(|s| s.trim().replace('/', ".")) {
        if !field.is_empty() && !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

fn parse_orderby(value: &str) -> ODataResult<Vec<OrderBy>> {
    let mut clauses = Vec::new();

    for part in value.split(',') {
        let mut words = part.split_whitespace();
        let field = match words.next() {
            Some(field) => field.replace('/', "."),
            None => continue,
        };
        let direction = match words.next().map(|d| d.to_ascii_lowercase()) {
            None => SortDirection::Asc,
            Some(d) if d == "asc" => SortDirection::Asc,
            Some(d) if d == "desc" => SortDirection::Desc,
            Some(d) => {
                return Err(ODataError::InvalidQuery(format!(
                    "$orderby: invalid direction '{}'",
                    d
                )))
            }
        };
        if let Some(extra) = words.next() {
            return Err(ODataError::InvalidQuery(format!(
                "$orderby: unexpected '{}'",
                extra
            )));
        }
        clauses.push(OrderBy { field, direction });
    }

    Ok(clauses)
}

fn parse_non_negative(option: &str, value: &str) -> ODataResult<usize> {
    value.trim().parse().map_err(|_| {
        ODataError::InvalidQuery(format!(
            "{}: expected a non-negative integer, found '{}'",
            option, value
        ))
    })
}

fn parse_inlinecount(value: &str) -> ODataResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "allpages" | "true" => Ok(true),
        "none" | "false" => Ok(false),
        other => Err(ODataError::InvalidQuery(format!(
            "$inlinecount: unsupported value '{}'",
            other
        ))),
    }
}
