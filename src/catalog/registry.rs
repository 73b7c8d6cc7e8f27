//! Schema catalog - allow-list of tables and columns
//!
//! Table and column names cannot be bound as parameters, so they are
//! interpolated into SQL text. `validate` is the gate every `QuerySpec` passes
//! before compilation: only names present here ever reach the compiler.

use crate::catalog::builtin::builtin_tables;
use crate::catalog::schema::{ColumnSchema, TableSchema};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::QuerySpec;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of known tables, in registration order
#[derive(Debug, Default, Clone)]
pub struct SchemaCatalog {
    tables: Vec<Arc<TableSchema>>,
    /// Name to position lookup
    by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the curated energy datasets
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        for table in builtin_tables() {
            catalog.insert(table);
        }
        catalog
    }

    fn insert(&mut self, schema: TableSchema) {
        self.by_name
            .insert(schema.table_name.clone(), self.tables.len());
        self.tables.push(Arc::new(schema));
    }

    /// Register a table. Names are unique; re-registering is an error.
    pub fn register(&mut self, schema: TableSchema) -> LakehouseResult<()> {
        if self.by_name.contains_key(&schema.table_name) {
            return Err(LakehouseError::Configuration(format!(
                "table '{}' is already registered",
                schema.table_name
            )));
        }
        self.insert(schema);
        Ok(())
    }

    pub fn lookup(&self, table_name: &str) -> LakehouseResult<Arc<TableSchema>> {
        self.by_name
            .get(table_name)
            .and_then(|&idx| self.tables.get(idx))
            .cloned()
            .ok_or_else(|| LakehouseError::TableNotFound(table_name.to_string()))
    }

    pub fn contains(&self, table_name: &str) -> bool {
        self.by_name.contains_key(table_name)
    }

    /// Check the table and every column referenced by `spec`
    pub fn validate(&self, spec: &QuerySpec) -> LakehouseResult<Arc<TableSchema>> {
        let schema = self.lookup(&spec.table_name).map_err(|_| {
            LakehouseError::invalid_identifier(&spec.table_name, &spec.table_name)
        })?;

        spec.check_shape()?;
        validate_columns(&schema, spec)?;

        Ok(schema)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table_name.clone()).collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Build the catalog visible after a live refresh.
    ///
    /// The discovered tables become the visible set. Curated descriptions,
    /// organizations and units carry over for tables and columns that exist in
    /// the store; curated entries missing from the store are dropped.
    pub fn merged_with(&self, discovered: Vec<TableSchema>) -> SchemaCatalog {
        let mut merged = SchemaCatalog::new();

        for table in discovered {
            let table = match self.lookup(&table.table_name) {
                Ok(curated) => overlay(&curated, table),
                Err(_) => table,
            };
            merged.insert(table);
        }

        merged
    }
}

/// Column check shared by the catalog and the compiler
pub(crate) fn validate_columns(schema: &TableSchema, spec: &QuerySpec) -> LakehouseResult<()> {
    for column in spec.referenced_columns() {
        if !schema.has_column(column) {
            return Err(LakehouseError::invalid_identifier(
                &schema.table_name,
                column,
            ));
        }
    }
    Ok(())
}

fn overlay(curated: &TableSchema, live: TableSchema) -> TableSchema {
    let columns = live
        .columns
        .into_iter()
        .map(|col| match curated.get_column(&col.name) {
            Some(known) => ColumnSchema {
                name: col.name,
                description: known.description.clone(),
                unit: known.unit.clone(),
                data_type: known.data_type.clone(),
            },
            None => col,
        })
        .collect();

    TableSchema {
        table_name: live.table_name,
        organization: curated.organization.clone(),
        dataset_name: curated.dataset_name.clone(),
        description: curated.description.clone(),
        columns,
    }
}
