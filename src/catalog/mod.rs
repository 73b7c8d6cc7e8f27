//! Schema Catalog
//!
//! Registry of known tables used to validate identifiers and describe
//! dataset shape:
//!
//! - **schema**: `TableSchema`, `ColumnSchema`, `DataType`, `ColumnInfo`
//! - **registry**: `SchemaCatalog` allow-list
//! - **builtin**: Curated CCEE / ONS datasets
//! - **live**: Discovery through the store's information schema

pub mod builtin;
pub mod live;
pub mod registry;
mod schema;

pub use live::CatalogQueries;
pub use registry::SchemaCatalog;
pub use schema::{ColumnInfo, ColumnSchema, DataType, TableSchema};
