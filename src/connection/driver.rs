//! Driver seams
//!
//! A [`Driver`] opens a [`Pool`] for one set of connection parameters; a pool
//! hands out [`Connection`]s that return to it when dropped. Dropping is the
//! only release path, so a connection is released on success, error and
//! cancellation alike.

use crate::connection::credential::ConnectionParams;
use crate::query::{Dialect, SqlValue};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Raw result of a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&SqlValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }

    /// Text values of one column, skipping nulls
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.column(name)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

/// Failures reported by a driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// The store rejected the credential (expired token, bad password)
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connect(String),

    /// The statement failed
    #[error("{0}")]
    Statement(String),

    /// A result cell could not be converted
    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// No connection became available in time
    #[error("pool acquisition timed out")]
    PoolTimeout,
}

/// Pool sizing and acquisition bound
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens pools for a concrete store
#[async_trait]
pub trait Driver: Send + Sync {
    /// SQL flavour the pools speak
    fn dialect(&self) -> Dialect;

    /// Open a pool and verify the parameters by establishing one connection
    async fn open(
        &self,
        params: &ConnectionParams,
        options: &PoolOptions,
    ) -> Result<Arc<dyn Pool>, DriverError>;
}

/// A pool of live connections built from one credential
#[async_trait]
pub trait Pool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Connection>, DriverError>;

    /// Stop handing out connections and close idle ones
    async fn close(&self);
}

/// One checked-out connection; dropping it returns it to its pool
#[async_trait]
pub trait Connection: Send {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rowset_accessors() {
        let rows = RowSet {
            columns: vec!["table_name".into()],
            rows: vec![
                vec![SqlValue::from("ccee_spot_price")],
                vec![SqlValue::Null],
                vec![SqlValue::from("ons_stored_energy")],
            ],
        };

        assert_eq!(rows.len(), 3);
        assert_eq!(rows.column_index("table_name"), Some(0));
        assert_eq!(
            rows.strings("table_name"),
            vec!["ccee_spot_price", "ons_stored_energy"]
        );
        assert!(rows.strings("missing").is_empty());
    }
}
