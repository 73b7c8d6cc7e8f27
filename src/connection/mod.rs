//! Connection layer
//!
//! Credential sources, the driver seams with their Postgres and SQLite
//! implementations, and the [`ConnectionManager`] that rotates credentials.

pub mod credential;
mod driver;
pub mod identity;
mod manager;
pub mod postgres;
pub mod sqlite;

pub use credential::{
    ConnectionParams, Credential, CredentialSource, Endpoint, LocalFileSource, Secret, SslMode,
    StaticCredentials, TokenCredentials,
};
pub use driver::{Connection, Driver, DriverError, Pool, PoolOptions, RowSet};
pub use identity::{HttpIdentityClient, IdentityConfig};
pub use manager::{ConnectionManager, ConnectionState, ManagerConfig, ScopedConnection};
pub use postgres::PostgresDriver;
pub use sqlite::{SqliteDriver, SqlitePool};
