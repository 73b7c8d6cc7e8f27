//! Result Shaper
//!
//! Turns a raw rowset into a [`ResultTable`] indexed by the request's key
//! columns: dates parsed, numerics as floats, bookkeeping columns dropped.

use crate::catalog::{DataType, TableSchema};
use crate::connection::RowSet;
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::spec::QuerySpec;
use crate::query::value::SqlValue;
use serde::Serialize;
use std::collections::HashMap;

/// Composite key formed from the key column values, in key column order
pub type KeyTuple = Vec<SqlValue>;

/// Key-indexed rows with typed payload columns
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultTable {
    key_columns: Vec<String>,
    value_columns: Vec<String>,
    keys: Vec<KeyTuple>,
    rows: Vec<Vec<SqlValue>>,
    #[serde(skip)]
    positions: HashMap<KeyTuple, usize>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    /// Index entries in row order
    pub fn keys(&self) -> &[KeyTuple] {
        &self.keys
    }

    /// Payload of the row with `key`
    pub fn get(&self, key: &[SqlValue]) -> Option<&[SqlValue]> {
        self.positions
            .get(key)
            .and_then(|&idx| self.rows.get(idx))
            .map(Vec::as_slice)
    }

    /// Single cell lookup
    pub fn value(&self, key: &[SqlValue], column: &str) -> Option<&SqlValue> {
        let col = self.value_columns.iter().position(|c| c == column)?;
        self.get(key).and_then(|row| row.get(col))
    }

    /// Whole payload column in row order
    pub fn column(&self, column: &str) -> Option<Vec<&SqlValue>> {
        let col = self.value_columns.iter().position(|c| c == column)?;
        Some(self.rows.iter().filter_map(|row| row.get(col)).collect())
    }

    /// Iterate `(key, payload)` pairs in row order
    pub fn iter(&self) -> impl Iterator<Item = (&KeyTuple, &[SqlValue])> {
        self.keys.iter().zip(self.rows.iter().map(Vec::as_slice))
    }
}

/// Builds `ResultTable`s for one date-column convention
#[derive(Debug, Clone)]
pub struct ResultShaper {
    date_column: String,
}

impl Default for ResultShaper {
    fn default() -> Self {
        Self::new("reference_date")
    }
}

impl ResultShaper {
    pub fn new(date_column: impl Into<String>) -> Self {
        Self {
            date_column: date_column.into(),
        }
    }

    /// Shape `rowset` for `spec`, coercing cells by the table's column types.
    ///
    /// A repeated key means the rowset did not come from a latest-revision
    /// query (or the store is inconsistent) and is reported as `Internal`.
    pub fn shape(
        &self,
        rowset: RowSet,
        spec: &QuerySpec,
        schema: Option<&TableSchema>,
    ) -> LakehouseResult<ResultTable> {
        let value_columns: Vec<String> = spec
            .payload_columns()
            .into_iter()
            .map(str::to_string)
            .collect();

        // Some drivers report no column metadata for an empty result
        if rowset.is_empty() {
            return Ok(ResultTable {
                key_columns: spec.key_columns.clone(),
                value_columns,
                ..Default::default()
            });
        }

        let key_idx = spec
            .key_columns
            .iter()
            .map(|k| column_position(&rowset, k))
            .collect::<LakehouseResult<Vec<_>>>()?;

        let value_idx = value_columns
            .iter()
            .map(|v| column_position(&rowset, v))
            .collect::<LakehouseResult<Vec<_>>>()?;

        let key_types: Vec<Option<DataType>> = spec
            .key_columns
            .iter()
            .map(|c| self.coercion_for(c, schema))
            .collect();
        let value_types: Vec<Option<DataType>> = value_columns
            .iter()
            .map(|c| self.coercion_for(c, schema))
            .collect();

        let mut table = ResultTable {
            key_columns: spec.key_columns.clone(),
            value_columns,
            keys: Vec::with_capacity(rowset.rows.len()),
            rows: Vec::with_capacity(rowset.rows.len()),
            positions: HashMap::with_capacity(rowset.rows.len()),
        };

        for mut raw in rowset.rows {
            let key: KeyTuple = key_idx
                .iter()
                .zip(&key_types)
                .map(|(&i, ty)| coerce(take(&mut raw, i), ty.as_ref()))
                .collect();
            let payload: Vec<SqlValue> = value_idx
                .iter()
                .zip(&value_types)
                .map(|(&i, ty)| coerce(take(&mut raw, i), ty.as_ref()))
                .collect();

            if table.positions.contains_key(&key) {
                return Err(LakehouseError::Internal(format!(
                    "duplicate key {:?} in result for table '{}'",
                    key, spec.table_name
                )));
            }
            table.positions.insert(key.clone(), table.rows.len());
            table.keys.push(key);
            table.rows.push(payload);
        }

        Ok(table)
    }

    /// Parse the primary date column of an untyped rowset in place
    pub fn parse_dates(&self, rowset: &mut RowSet) {
        if let Some(idx) = rowset.columns.iter().position(|c| *c == self.date_column) {
            for row in &mut rowset.rows {
                if let Some(cell) = row.get_mut(idx) {
                    let parsed = coerce(std::mem::take(cell), Some(&DataType::DateTime));
                    *cell = parsed;
                }
            }
        }
    }

    fn coercion_for(&self, column: &str, schema: Option<&TableSchema>) -> Option<DataType> {
        if column == self.date_column {
            return Some(DataType::DateTime);
        }
        schema
            .and_then(|s| s.get_column(column))
            .map(|c| c.data_type.clone())
    }
}

fn column_position(rowset: &RowSet, name: &str) -> LakehouseResult<usize> {
    rowset.columns.iter().position(|c| c == name).ok_or_else(|| {
        LakehouseError::Internal(format!("column '{}' missing from result set", name))
    })
}

fn take(row: &mut [SqlValue], idx: usize) -> SqlValue {
    row.get_mut(idx).map(std::mem::take).unwrap_or_default()
}

fn coerce(value: SqlValue, ty: Option<&DataType>) -> SqlValue {
    match (ty, value) {
        (_, SqlValue::Null) => SqlValue::Null,
        (Some(DataType::DateTime), SqlValue::Text(s)) => match crate::query::parse_timestamp(&s) {
            Some(ts) => SqlValue::Timestamp(ts),
            None => SqlValue::Text(s),
        },
        (Some(DataType::Float), SqlValue::Int(v)) => SqlValue::Float(v as f64),
        (Some(DataType::Float), SqlValue::Text(s)) => match s.trim().parse::<f64>() {
            Ok(v) => SqlValue::Float(v),
            Err(_) => SqlValue::Text(s),
        },
        (_, other) => other,
    }
}
