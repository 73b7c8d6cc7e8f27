//! Live catalog discovery
//!
//! Reads table, column and schema listings from the store itself:
//! `information_schema` on Postgres, `sqlite_master` and the table-valued
//! pragmas on SQLite. Every query binds its inputs.

use crate::catalog::schema::{ColumnInfo, ColumnSchema, DataType, TableSchema};
use crate::connection::{ConnectionManager, RowSet};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::{CompiledQuery, Dialect, SqlValue};

/// Catalog queries for one dialect and schema
#[derive(Debug, Clone)]
pub struct CatalogQueries {
    dialect: Dialect,
    schema: String,
    /// Bookkeeping table hidden from listings
    migration_table: String,
}

impl CatalogQueries {
    pub fn new(
        dialect: Dialect,
        schema: impl Into<String>,
        migration_table: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            schema: schema.into(),
            migration_table: migration_table.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn tables_query(&self) -> CompiledQuery {
        match self.dialect {
            Dialect::Postgres => CompiledQuery::raw(
                "SELECT CAST(table_name AS TEXT) AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' AND table_name <> $2 \
                 ORDER BY table_name",
                format!("list tables in schema {}", self.schema),
            )
            .bind("schema", self.schema.as_str())
            .bind("migration_table", self.migration_table.as_str()),
            Dialect::Sqlite => CompiledQuery::raw(
                "SELECT name AS table_name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name <> ?1 \
                 ORDER BY name",
                "list tables",
            )
            .bind("migration_table", self.migration_table.as_str()),
        }
    }

    pub fn columns_query(&self, table: &str) -> CompiledQuery {
        match self.dialect {
            Dialect::Postgres => CompiledQuery::raw(
                "SELECT CAST(column_name AS TEXT) AS column_name, \
                 CAST(data_type AS TEXT) AS data_type, \
                 CAST(is_nullable AS TEXT) AS is_nullable, \
                 CAST(character_maximum_length AS INTEGER) AS character_maximum_length \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                format!("describe columns of {}", table),
            )
            .bind("schema", self.schema.as_str())
            .bind("table_name", table),
            Dialect::Sqlite => CompiledQuery::raw(
                "SELECT name AS column_name, type AS data_type, \
                 CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable, \
                 NULL AS character_maximum_length \
                 FROM pragma_table_info(?1) ORDER BY cid",
                format!("describe columns of {}", table),
            )
            .bind("table_name", table),
        }
    }

    pub fn schemas_query(&self) -> CompiledQuery {
        match self.dialect {
            Dialect::Postgres => CompiledQuery::raw(
                "SELECT CAST(schema_name AS TEXT) AS schema_name \
                 FROM information_schema.schemata ORDER BY schema_name",
                "list schemas",
            ),
            Dialect::Sqlite => CompiledQuery::raw(
                "SELECT name AS schema_name FROM pragma_database_list ORDER BY seq",
                "list schemas",
            ),
        }
    }

    pub async fn list_tables(&self, manager: &ConnectionManager) -> LakehouseResult<Vec<String>> {
        let rows = manager.execute(&self.tables_query()).await?;
        Ok(rows.strings("table_name"))
    }

    pub async fn list_schemas(&self, manager: &ConnectionManager) -> LakehouseResult<Vec<String>> {
        let rows = manager.execute(&self.schemas_query()).await?;
        Ok(rows.strings("schema_name"))
    }

    pub async fn columns(
        &self,
        manager: &ConnectionManager,
        table: &str,
    ) -> LakehouseResult<Vec<ColumnInfo>> {
        let rows = manager.execute(&self.columns_query(table)).await?;
        column_infos(&rows)
    }

    /// Describe every visible table, one column listing per table
    pub async fn discover(&self, manager: &ConnectionManager) -> LakehouseResult<Vec<TableSchema>> {
        let tables = self.list_tables(manager).await?;
        let mut discovered = Vec::with_capacity(tables.len());

        for table in tables {
            let columns = self.columns(manager, &table).await?;
            let schema = columns.into_iter().fold(
                TableSchema::new(table.as_str(), "", table.as_str()),
                |schema, col| {
                    schema.column(ColumnSchema::new(
                        col.column_name,
                        DataType::from_sql_type(&col.data_type),
                    ))
                },
            );
            discovered.push(schema);
        }

        tracing::debug!(schema = %self.schema, tables = discovered.len(), "Discovered tables");
        Ok(discovered)
    }
}

fn column_infos(rows: &RowSet) -> LakehouseResult<Vec<ColumnInfo>> {
    let idx = |name: &str| {
        rows.column_index(name).ok_or_else(|| {
            LakehouseError::Internal(format!("column listing lacks '{}'", name))
        })
    };
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let (name_idx, type_idx, null_idx, len_idx) = (
        idx("column_name")?,
        idx("data_type")?,
        idx("is_nullable")?,
        idx("character_maximum_length")?,
    );

    rows.rows
        .iter()
        .map(|row| {
            let text = |i: usize| row.get(i).map(|v| v.to_string()).unwrap_or_default();
            Ok(ColumnInfo {
                column_name: text(name_idx),
                data_type: text(type_idx),
                is_nullable: text(null_idx).eq_ignore_ascii_case("yes"),
                character_maximum_length: match row.get(len_idx) {
                    Some(SqlValue::Int(n)) => Some(*n),
                    _ => None,
                },
            })
        })
        .collect()
}
