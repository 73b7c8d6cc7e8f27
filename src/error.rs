//! Lakehouse error types
//!
//! Every public operation returns [`LakehouseResult`]. Validation errors are
//! raised before any network round-trip; driver failures are mapped into this
//! taxonomy by the connection manager.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the access layer
#[derive(Error, Debug)]
pub enum LakehouseError {
    /// Credentials missing or incomplete, or the manager was used before `configure`
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A connection-derived property was read before `configure`
    #[error("Connection manager not configured. Call configure() first.")]
    NotConfigured,

    /// Table or column name not present in the catalog
    #[error("Invalid identifier '{name}' for table '{table}'")]
    InvalidIdentifier { table: String, name: String },

    /// Requested table is not registered in the catalog
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Structurally invalid request (empty key set, inverted date range, ...)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Credential rejected and the single refresh attempt failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The store rejected the statement or the connection failed
    #[error("Query failed ({intent}): {message}")]
    QueryExecution { intent: String, message: String },

    /// Acquisition or execution exceeded the configured bound
    #[error("Timed out after {after:?} while trying to {operation}")]
    Timeout { operation: String, after: Duration },

    /// Export requested to a file extension other than `.csv`
    #[error("Unsupported export format: {0} (only .csv is supported)")]
    UnsupportedFormat(String),

    /// Integrity defect inside the access layer
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LakehouseError {
    pub fn invalid_identifier(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// True for errors raised before anything was sent to the store
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::TableNotFound(_)
                | Self::InvalidQuery(_)
                | Self::UnsupportedFormat(_)
        )
    }
}

/// Result type alias for lakehouse operations
pub type LakehouseResult<T> = Result<T, LakehouseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LakehouseError::invalid_identifier("ccee_spot_price", "price");
        assert_eq!(
            err.to_string(),
            "Invalid identifier 'price' for table 'ccee_spot_price'"
        );

        let err = LakehouseError::UnsupportedFormat("parquet".into());
        assert_eq!(
            err.to_string(),
            "Unsupported export format: parquet (only .csv is supported)"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(LakehouseError::TableNotFound("x".into()).is_validation());
        assert!(LakehouseError::InvalidQuery("x".into()).is_validation());
        assert!(!LakehouseError::NotConfigured.is_validation());
        assert!(!LakehouseError::Authentication("expired".into()).is_validation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LakehouseError = io_err.into();
        assert!(matches!(err, LakehouseError::Io(_)));
    }
}
