//! # Lakehouse
//!
//! Read-only access to append-only, soft-delete-versioned energy-market
//! time-series tables. Every fetch resolves the latest non-deleted revision
//! of each key as of query time.
//!
//! ## Features
//!
//! - **Catalog allow-list**: table and column names are checked before any SQL is built
//! - **Latest revision per key**: `DISTINCT ON` on Postgres, `ROW_NUMBER()` on SQLite
//! - **Credential rotation**: short-lived tokens are refreshed ahead of expiry and on auth failure
//! - **Key-indexed results**: typed tables ready for lookup or CSV export
//!
//! ## Modules
//!
//! - [`catalog`]: Table metadata and identifier validation
//! - [`query`]: Request specs, SQL compilation and result shaping
//! - [`connection`]: Drivers, credential sources and the connection manager
//! - [`client`]: The consumer-facing [`LakehouseClient`]
//! - [`datasets`]: Typed accessors for the curated CCEE and ONS tables
//! - [`config`]: TOML configuration and logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lakehouse::{Config, LakehouseClient, QuerySpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     lakehouse::config::init_tracing(&config.logging);
//!
//!     let client = LakehouseClient::from_config(&config).await?;
//!
//!     let spec = QuerySpec::new("ccee_spot_price")
//!         .keys(&["reference_date", "subsystem"])
//!         .values(&["spot_price"])
//!         .filter("subsystem", "SOUTHEAST")
//!         .between("2023-05-01 00:00:00", "2023-05-02 00:00:00")?;
//!
//!     let prices = client.fetch_dataset(&spec).await?;
//!     println!("Fetched {} prices", prices.len());
//!
//!     client.manager().dispose().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod datasets;
pub mod error;
pub mod query;

#[cfg(test)]
mod fixtures;

// Re-export top-level types for convenience
pub use catalog::{ColumnInfo, ColumnSchema, DataType, SchemaCatalog, TableSchema};

pub use client::LakehouseClient;

pub use config::Config;

pub use connection::{
    ConnectionManager, ConnectionState, CredentialSource, ManagerConfig, PostgresDriver,
    SqliteDriver, StaticCredentials, TokenCredentials,
};

pub use error::{LakehouseError, LakehouseResult};

pub use query::{
    CompiledQuery, Dialect, Filters, QueryCompiler, QuerySpec, ResultShaper, ResultTable,
    SqlValue, Versioning,
};
