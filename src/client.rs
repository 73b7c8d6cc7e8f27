//! Lakehouse client
//!
//! The consumer-facing entry point: validates a [`QuerySpec`] against the
//! catalog, compiles it, executes it through the [`ConnectionManager`] and
//! shapes the rows into a [`ResultTable`]. Also covers catalog browsing, raw
//! read-only SQL and CSV export.

use crate::catalog::{CatalogQueries, ColumnInfo, SchemaCatalog, TableSchema};
use crate::config::{Config, DriverKind};
use crate::connection::{ConnectionManager, RowSet};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::{
    CompiledQuery, Dialect, QueryCompiler, QuerySpec, ResultShaper, ResultTable, SqlValue,
    Versioning,
};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

const DEFAULT_MIGRATION_TABLE: &str = "alembic_version";

/// Timestamp layout written to exported files
const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read-only access to the versioned dataset tables
pub struct LakehouseClient {
    manager: Arc<ConnectionManager>,
    catalog: RwLock<Arc<SchemaCatalog>>,
    compiler: QueryCompiler,
    shaper: ResultShaper,
    catalog_queries: CatalogQueries,
}

impl LakehouseClient {
    /// Client over a configured (or later configured) manager
    pub fn new(manager: Arc<ConnectionManager>, catalog: SchemaCatalog) -> Self {
        let dialect = manager.dialect();
        let schema = match dialect {
            Dialect::Postgres => "public",
            Dialect::Sqlite => "main",
        };

        Self {
            manager,
            catalog: RwLock::new(Arc::new(catalog)),
            compiler: QueryCompiler::new(dialect),
            shaper: ResultShaper::default(),
            catalog_queries: CatalogQueries::new(dialect, schema, DEFAULT_MIGRATION_TABLE),
        }
    }

    /// Build the driver, credential source and manager from `config`, connect,
    /// and optionally refresh the catalog from the store
    pub async fn from_config(config: &Config) -> LakehouseResult<Self> {
        let manager = Arc::new(ConnectionManager::new(
            config.driver(),
            config.manager_config(),
        ));
        manager.configure(config.credential_source()?).await?;

        let mut client = Self::new(manager, SchemaCatalog::with_builtin())
            .with_versioning(config.versioning())
            .with_catalog_schema(config.catalog_schema(), &config.catalog.migration_table);
        if config.database.driver == DriverKind::Postgres {
            client.compiler = client.compiler.with_schema(config.database.schema.as_str());
        }

        if config.catalog.refresh_on_connect {
            client.refresh_catalog().await?;
        }
        Ok(client)
    }

    /// Builder method: override bookkeeping column names
    pub fn with_versioning(mut self, versioning: Versioning) -> Self {
        self.shaper = ResultShaper::new(versioning.date_column.as_str());
        self.compiler = self.compiler.with_versioning(versioning);
        self
    }

    /// Builder method: schema and migration table used by catalog listings
    pub fn with_catalog_schema(
        mut self,
        schema: impl Into<String>,
        migration_table: impl Into<String>,
    ) -> Self {
        self.catalog_queries =
            CatalogQueries::new(self.compiler.dialect(), schema, migration_table);
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Snapshot of the current catalog
    pub async fn catalog(&self) -> Arc<SchemaCatalog> {
        self.catalog.read().await.clone()
    }

    /// Latest non-deleted revision per key, indexed by the request's key columns
    pub async fn fetch_dataset(&self, spec: &QuerySpec) -> LakehouseResult<ResultTable> {
        let span = tracing::info_span!(
            "fetch_dataset",
            query_id = %Uuid::new_v4(),
            table = %spec.table_name
        );

        async move {
            let catalog = self.catalog().await;
            let schema = catalog.validate(spec)?;
            let compiled = self.compiler.compile(spec, &schema)?;

            let rows = self.manager.execute(&compiled).await?;
            let table = self.shaper.shape(rows, spec, Some(&*schema))?;

            tracing::info!(rows = table.len(), "Fetched dataset");
            Ok(table)
        }
        .instrument(span)
        .await
    }

    /// Tables visible in the catalog
    pub async fn list_tables(&self) -> Vec<String> {
        self.catalog().await.list_tables()
    }

    /// Tables present in the store right now, migration bookkeeping excluded
    pub async fn list_database_tables(&self) -> LakehouseResult<Vec<String>> {
        self.catalog_queries.list_tables(&self.manager).await
    }

    pub async fn describe_table(&self, table_name: &str) -> LakehouseResult<Arc<TableSchema>> {
        self.catalog().await.lookup(table_name)
    }

    /// Column listing from the store for a catalogued table
    pub async fn table_columns(&self, table_name: &str) -> LakehouseResult<Vec<ColumnInfo>> {
        self.catalog().await.lookup(table_name)?;
        self.catalog_queries.columns(&self.manager, table_name).await
    }

    pub async fn list_schemas(&self) -> LakehouseResult<Vec<String>> {
        self.catalog_queries.list_schemas(&self.manager).await
    }

    /// Replace the visible catalog with the store's tables, keeping curated
    /// metadata where it applies. Returns the number of visible tables.
    pub async fn refresh_catalog(&self) -> LakehouseResult<usize> {
        let discovered = self.catalog_queries.discover(&self.manager).await?;
        let merged = self.catalog().await.merged_with(discovered);
        let count = merged.len();

        *self.catalog.write().await = Arc::new(merged);
        tracing::info!(tables = count, "Catalog refreshed from database");
        Ok(count)
    }

    /// Run a caller-written read-only statement with positional parameters.
    ///
    /// Only a single `SELECT` or `WITH` statement free of writing clauses is
    /// accepted. The primary date column, when present, is parsed into
    /// timestamps.
    pub async fn query_sql(&self, sql: &str, params: &[SqlValue]) -> LakehouseResult<RowSet> {
        check_read_only(sql)?;

        let query = params
            .iter()
            .enumerate()
            .fold(CompiledQuery::raw(sql, "run caller query"), |q, (i, v)| {
                q.bind(format!("p{}", i + 1), v.clone())
            });

        let mut rows = self.manager.execute(&query).await?;
        self.shaper.parse_dates(&mut rows);
        Ok(rows)
    }

    /// Fetch `spec` and write it to `path` as CSV. Returns the number of rows
    /// written. The extension is checked before anything is fetched.
    pub async fn export_to_file(&self, spec: &QuerySpec, path: &Path) -> LakehouseResult<usize> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(LakehouseError::UnsupportedFormat(path.display().to_string()));
        }

        let table = self.fetch_dataset(spec).await?;
        write_csv(&table, path)?;

        tracing::info!(path = %path.display(), rows = table.len(), "Exported dataset");
        Ok(table.len())
    }
}

/// Literals, quoted identifiers and comments, which may hold any word
fn inert_text() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*.*?\*/"#)
            .expect("inert text pattern is valid")
    })
}

fn writing_keyword() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|INTO|TRUNCATE)\b",
        )
        .expect("writing keyword pattern is valid")
    })
}

fn check_read_only(sql: &str) -> LakehouseResult<()> {
    let code = inert_text().replace_all(sql, " ");
    let reject = |reason: String| Err(LakehouseError::InvalidQuery(reason));

    let leading = code
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if leading != "SELECT" && leading != "WITH" {
        return reject("only SELECT or WITH statements are allowed".to_string());
    }

    if code.trim_end().trim_end_matches(';').contains(';') {
        return reject("only a single statement is allowed".to_string());
    }

    if let Some(found) = writing_keyword().find(&code) {
        return reject(format!(
            "statement contains a writing clause ({})",
            found.as_str().to_ascii_uppercase()
        ));
    }

    Ok(())
}

fn write_csv(table: &ResultTable, path: &Path) -> LakehouseResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let header = table.key_columns().iter().chain(table.value_columns());
    writer.write_record(header)?;

    for (key, payload) in table.iter() {
        let record = key.iter().chain(payload).map(csv_cell);
        writer.write_record(record)?;
    }

    writer.flush()?;
    Ok(())
}

fn csv_cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Timestamp(ts) => ts.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
        other => other.to_string(),
    }
}
