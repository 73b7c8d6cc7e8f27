//! Structured dataset requests
//!
//! A [`QuerySpec`] names a table, the key columns identifying one logical
//! entity across revisions, the value columns to return, equality filters and
//! an optional half-open date range `[start, end)`.

use crate::error::{LakehouseError, LakehouseResult};
use crate::query::value::{parse_timestamp, SqlValue};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};

/// Equality filters keyed by column name.
///
/// Kept sorted by column so equal filter sets always render the same SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(BTreeMap<String, SqlValue>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the filter on `column`
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Filters that become predicates; null values are ignored
    pub fn active(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.iter().filter(|(_, v)| !v.is_null())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, v) in iter {
            filters.insert(k, v);
        }
        filters
    }
}

/// A request for the latest revision of every key in a table
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub table_name: String,
    pub key_columns: Vec<String>,
    pub value_columns: Vec<String>,
    pub filters: Filters,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

impl QuerySpec {
    /// Start a request against `table_name`
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            key_columns: Vec::new(),
            value_columns: Vec::new(),
            filters: Filters::new(),
            start_date: None,
            end_date: None,
        }
    }

    /// Builder method: set key columns (order is preserved)
    pub fn keys<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.key_columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Builder method: set value columns
    pub fn values<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.value_columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Builder method: add an equality filter
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filters.insert(column, value);
        self
    }

    /// Builder method: replace all filters
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Builder method: inclusive lower bound
    pub fn start(mut self, start: NaiveDateTime) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Builder method: exclusive upper bound
    pub fn end(mut self, end: NaiveDateTime) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Builder method: set both bounds from text, e.g. `"2023-05-01 03:00:00"`
    pub fn between(mut self, start: &str, end: &str) -> LakehouseResult<Self> {
        self.start_date = Some(parse_bound(start)?);
        self.end_date = Some(parse_bound(end)?);
        Ok(self)
    }

    /// Columns of the payload, in request order, excluding those already in the key
    pub fn payload_columns(&self) -> Vec<&str> {
        let mut seen: HashSet<&str> = self.key_columns.iter().map(String::as_str).collect();
        self.value_columns
            .iter()
            .map(String::as_str)
            .filter(|c| seen.insert(*c))
            .collect()
    }

    /// Every column name referenced anywhere in the request
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.key_columns
            .iter()
            .map(String::as_str)
            .chain(self.value_columns.iter().map(String::as_str))
            .chain(self.filters.columns())
    }

    /// Structural checks that need no catalog
    pub fn check_shape(&self) -> LakehouseResult<()> {
        if self.key_columns.is_empty() {
            return Err(LakehouseError::InvalidQuery(
                "at least one key column is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for key in &self.key_columns {
            if !seen.insert(key.as_str()) {
                return Err(LakehouseError::InvalidQuery(format!(
                    "duplicate key column '{}'",
                    key
                )));
            }
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(LakehouseError::InvalidQuery(
                    "start_date must be before end_date".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_bound(s: &str) -> LakehouseResult<NaiveDateTime> {
    parse_timestamp(s)
        .ok_or_else(|| LakehouseError::InvalidQuery(format!("invalid timestamp '{}'", s)))
}
