//! Query Compiler
//!
//! Renders a validated [`QuerySpec`] into parameterized SQL that returns, for
//! every distinct key, the most recently updated revision that is not
//! soft-deleted.
//!
//! # Rendered shape
//!
//! ```text
//! Postgres:
//!   SELECT DISTINCT ON (k1, k2) k1, k2, v1 FROM t
//!   WHERE deleted_at IS NULL AND f1 = $1 AND date >= $2 AND date < $3
//!   ORDER BY k1 ASC, k2 ASC, updated_at DESC, v1 ASC
//!
//! SQLite:
//!   SELECT k1, k2, v1 FROM (
//!     SELECT k1, k2, v1, ROW_NUMBER() OVER (PARTITION BY k1, k2 ORDER BY updated_at DESC, v1 ASC) AS rank
//!     FROM t WHERE ...)
//!   WHERE rank = 1 ORDER BY k1 ASC, k2 ASC
//! ```
//!
//! Identifiers come only from the schema-validated spec and are quoted;
//! values are always bound parameters.

use crate::catalog::{registry::validate_columns, DataType, TableSchema};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::spec::QuerySpec;
use crate::query::value::SqlValue;
use regex::Regex;
use std::sync::OnceLock;

const RANK_ALIAS: &str = "__revision_rank";

/// SQL flavour of the target store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `position`
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", position),
            Dialect::Sqlite => format!("?{}", position),
        }
    }
}

/// Bookkeeping columns of versioned tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioning {
    /// Primary date column used for range bounds
    pub date_column: String,
    /// Last-updated timestamp deciding which revision wins
    pub updated_column: String,
    /// Soft-delete marker; non-null means deleted
    pub deleted_column: String,
}

impl Default for Versioning {
    fn default() -> Self {
        Self {
            date_column: "reference_date".to_string(),
            updated_column: "updated_at".to_string(),
            deleted_column: "deleted_at".to_string(),
        }
    }
}

/// SQL text plus its bound parameters. Parameter `i` binds placeholder `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// Named bindings in placeholder order
    pub params: Vec<(String, SqlValue)>,
    /// Human-readable purpose, used in error context
    pub intent: String,
}

impl CompiledQuery {
    /// A statement without parameters
    pub fn raw(sql: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            intent: intent.into(),
        }
    }

    /// Builder method: append a named binding
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Parameter values in placeholder order
    pub fn values(&self) -> Vec<SqlValue> {
        self.params.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Pure compiler from `QuerySpec` to `CompiledQuery`
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    dialect: Dialect,
    versioning: Versioning,
    /// Optional schema qualifier (Postgres only)
    schema: Option<String>,
}

impl QueryCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            versioning: Versioning::default(),
            schema: None,
        }
    }

    /// Builder method: override bookkeeping column names
    pub fn with_versioning(mut self, versioning: Versioning) -> Self {
        self.versioning = versioning;
        self
    }

    /// Builder method: qualify table names with a schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn versioning(&self) -> &Versioning {
        &self.versioning
    }

    /// Compile `spec` against the table it references.
    ///
    /// Re-checks every referenced column against `schema` and fails with
    /// `InvalidIdentifier` exactly as the catalog would.
    pub fn compile(&self, spec: &QuerySpec, schema: &TableSchema) -> LakehouseResult<CompiledQuery> {
        if spec.table_name != schema.table_name {
            return Err(LakehouseError::invalid_identifier(
                &schema.table_name,
                &spec.table_name,
            ));
        }
        spec.check_shape()?;
        validate_columns(schema, spec)?;

        let ranged = spec.start_date.is_some() || spec.end_date.is_some();
        if ranged && !schema.has_column(&self.versioning.date_column) {
            return Err(LakehouseError::invalid_identifier(
                &schema.table_name,
                &self.versioning.date_column,
            ));
        }

        let table = self.table_ref(&spec.table_name)?;
        let keys = quote_all(&spec.table_name, spec.key_columns.iter().map(String::as_str))?;
        let payload = quote_all(&spec.table_name, spec.payload_columns())?;
        let mut projection = keys.clone();
        projection.extend(payload.iter().cloned());

        let mut params: Vec<(String, SqlValue)> = Vec::new();
        let mut predicates = vec![format!(
            "{} IS NULL",
            quote_ident(&spec.table_name, &self.versioning.deleted_column)?
        )];

        for (column, value) in spec.filters.active() {
            params.push((param_name(column), value.clone()));
            predicates.push(format!(
                "{} = {}",
                self.filter_target(schema, column, value)?,
                self.dialect.placeholder(params.len())
            ));
        }

        let date = quote_ident(&spec.table_name, &self.versioning.date_column)?;
        if let Some(start) = spec.start_date {
            params.push(("start_date".to_string(), SqlValue::Timestamp(start)));
            predicates.push(format!(
                "{} >= {}",
                date,
                self.dialect.placeholder(params.len())
            ));
        }
        if let Some(end) = spec.end_date {
            params.push(("end_date".to_string(), SqlValue::Timestamp(end)));
            predicates.push(format!(
                "{} < {}",
                date,
                self.dialect.placeholder(params.len())
            ));
        }

        let updated = quote_ident(&spec.table_name, &self.versioning.updated_column)?;
        let key_order = keys
            .iter()
            .map(|k| format!("{} ASC", k))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = predicates.join(" AND ");
        // Revisions sharing the latest update time resolve by payload
        let tie_break: String = payload.iter().map(|c| format!(", {} ASC", c)).collect();

        let sql = match self.dialect {
            Dialect::Postgres => format!(
                "SELECT DISTINCT ON ({keys}) {projection} FROM {table} WHERE {where_clause} ORDER BY {key_order}, {updated} DESC{tie_break}",
                keys = keys.join(", "),
                projection = projection.join(", "),
            ),
            Dialect::Sqlite => format!(
                "SELECT {projection} FROM (SELECT {projection}, ROW_NUMBER() OVER (PARTITION BY {keys} ORDER BY {updated} DESC{tie_break}) AS \"{RANK_ALIAS}\" FROM {table} WHERE {where_clause}) WHERE \"{RANK_ALIAS}\" = 1 ORDER BY {key_order}",
                keys = keys.join(", "),
                projection = projection.join(", "),
            ),
        };

        Ok(CompiledQuery {
            sql,
            params,
            intent: format!(
                "latest revisions of {} by ({})",
                spec.table_name,
                spec.key_columns.join(", ")
            ),
        })
    }

    /// Left side of an equality filter.
    ///
    /// Postgres will not compare a text parameter with an enum column, so
    /// text filters on textual or user-defined columns compare the column as
    /// text.
    fn filter_target(
        &self,
        schema: &TableSchema,
        column: &str,
        value: &SqlValue,
    ) -> LakehouseResult<String> {
        let quoted = quote_ident(&schema.table_name, column)?;
        let is_textual = schema.get_column(column).map_or(false, |c| {
            matches!(c.data_type, DataType::String | DataType::Other(_))
        });

        match (self.dialect, value) {
            (Dialect::Postgres, SqlValue::Text(_)) if is_textual => {
                Ok(format!("CAST({} AS TEXT)", quoted))
            }
            _ => Ok(quoted),
        }
    }

    fn table_ref(&self, table: &str) -> LakehouseResult<String> {
        let quoted = quote_ident(table, table)?;
        match (&self.schema, self.dialect) {
            (Some(schema), Dialect::Postgres) => {
                Ok(format!("{}.{}", quote_ident(table, schema)?, quoted))
            }
            _ => Ok(quoted),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_ $]{0,62}$").expect("identifier pattern is valid")
    })
}

/// Quote an identifier that already passed catalog validation.
///
/// Catalog entries come from the curated registry or the store itself, so
/// anything outside plain identifier characters indicates a bad registration.
fn quote_ident(table: &str, name: &str) -> LakehouseResult<String> {
    if !identifier_pattern().is_match(name) {
        return Err(LakehouseError::invalid_identifier(table, name));
    }
    Ok(format!("\"{}\"", name))
}

fn quote_all<'a>(
    table: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> LakehouseResult<Vec<String>> {
    names.into_iter().map(|n| quote_ident(table, n)).collect()
}

fn param_name(column: &str) -> String {
    format!("filter_{}", column.replace(' ', "_"))
}
