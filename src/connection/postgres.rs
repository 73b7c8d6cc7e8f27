//! Postgres driver backed by sqlx
//!
//! Results are decoded by Postgres type name into [`SqlValue`]s: numerics
//! become floats, `timestamptz` is normalized to UTC, enums and other
//! text-like types come back as text.

use crate::connection::credential::{ConnectionParams, SslMode};
use crate::connection::driver::{Connection, Driver, DriverError, Pool, PoolOptions, RowSet};
use crate::query::{Dialect, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use std::sync::Arc;

const APPLICATION_NAME: &str = "lakehouse";

/// SQLSTATE codes meaning the credential was rejected
const AUTH_FAILURE_CODES: [&str; 2] = ["28P01", "28000"];

/// Opens sqlx pools against a Postgres server
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn open(
        &self,
        params: &ConnectionParams,
        options: &PoolOptions,
    ) -> Result<Arc<dyn Pool>, DriverError> {
        // connect_with establishes the first connection, so bad credentials surface here
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options(params))
            .await
            .map_err(map_error)?;

        tracing::debug!(
            host = %params.endpoint.host,
            database = %params.endpoint.database,
            max_connections = options.max_connections,
            "Opened Postgres pool"
        );
        Ok(Arc::new(PostgresPool { pool }))
    }
}

fn connect_options(params: &ConnectionParams) -> PgConnectOptions {
    let endpoint = &params.endpoint;
    let mut options = PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .database(&endpoint.database)
        .username(&params.credential.username)
        .password(params.credential.secret.expose())
        .application_name(APPLICATION_NAME)
        .ssl_mode(ssl_mode(endpoint.ssl_mode))
        // Sessions never write
        .options([("default_transaction_read_only", "on")]);

    if let Some(cert) = &endpoint.ssl_root_cert {
        options = options.ssl_root_cert(cert);
    }
    options
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

struct PostgresPool {
    pool: sqlx::PgPool,
}

#[async_trait]
impl Pool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn Connection>, DriverError> {
        let conn = self.pool.acquire().await.map_err(map_error)?;
        Ok(Box::new(PostgresConnection { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// sqlx returns the connection to its pool when `PoolConnection` drops
struct PostgresConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, DriverError> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind(query, value));

        let rows = query.fetch_all(&mut *self.conn).await.map_err(map_error)?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RowSet { columns, rows })
    }
}

fn bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Timestamp(v) => query.bind(*v),
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<SqlValue>, DriverError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            decode_cell(row, idx, column.type_info().name()).map_err(|e| DriverError::Decode {
                column: column.name().to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match type_name {
        "BOOL" => SqlValue::Bool(row.try_get(idx)?),
        "INT2" => SqlValue::Int(i64::from(row.try_get::<i16, _>(idx)?)),
        "INT4" => SqlValue::Int(i64::from(row.try_get::<i32, _>(idx)?)),
        "INT8" => SqlValue::Int(row.try_get(idx)?),
        "FLOAT4" => SqlValue::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => SqlValue::Float(row.try_get(idx)?),
        "NUMERIC" => {
            let decimal: Decimal = row.try_get(idx)?;
            decimal
                .to_f64()
                .map(SqlValue::Float)
                .unwrap_or_else(|| SqlValue::Text(decimal.to_string()))
        }
        "TIMESTAMP" => SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?),
        "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get::<DateTime<Utc>, _>(idx)?.naive_utc()),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)?
            .and_hms_opt(0, 0, 0)
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        // Enums, text, varchar, name, json
        _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

fn map_error(e: sqlx::Error) -> DriverError {
    match e {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if AUTH_FAILURE_CODES.contains(&code.as_str()) {
                DriverError::Auth(db.message().to_string())
            } else {
                DriverError::Statement(db.message().to_string())
            }
        }
        sqlx::Error::PoolTimedOut => DriverError::PoolTimeout,
        sqlx::Error::ColumnDecode { index, source } => DriverError::Decode {
            column: index,
            message: source.to_string(),
        },
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_)) => DriverError::Connect(e.to_string()),
        other => DriverError::Statement(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::credential::{CredentialSource, StaticCredentials};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_connect_options_from_params() {
        let params = StaticCredentials::new("lake.example.com", 6432, "lakehouse", "reader", "pw")
            .ssl(SslMode::VerifyFull, Some(PathBuf::from("/etc/ssl/root.pem")))
            .resolve()
            .await
            .unwrap();

        let options = connect_options(&params);
        assert_eq!(options.get_host(), "lake.example.com");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_database(), Some("lakehouse"));
        assert_eq!(options.get_username(), "reader");
        assert!(matches!(options.get_ssl_mode(), PgSslMode::VerifyFull));
        assert!(options
            .get_options()
            .unwrap()
            .contains("default_transaction_read_only=on"));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_error(sqlx::Error::PoolTimedOut),
            DriverError::PoolTimeout
        ));
        assert!(matches!(
            map_error(sqlx::Error::PoolClosed),
            DriverError::Connect(_)
        ));
        assert!(matches!(
            map_error(sqlx::Error::RowNotFound),
            DriverError::Statement(_)
        ));
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(ssl_mode(SslMode::Require), PgSslMode::Require));
        assert!(matches!(ssl_mode(SslMode::Disable), PgSslMode::Disable));
    }
}
