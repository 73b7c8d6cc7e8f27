//! Embedded driver backed by SQLite
//!
//! Serves local snapshot files of the lakehouse tables. Connections are opened
//! read-only; statements run on the blocking pool so the async runtime never
//! waits on disk.

use crate::connection::credential::ConnectionParams;
use crate::connection::driver::{Connection, Driver, DriverError, Pool, PoolOptions, RowSet};
use crate::query::{Dialect, SqlValue, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{ErrorCode, OpenFlags, ToSql};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens read-only pools over a database file
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn open(
        &self,
        params: &ConnectionParams,
        options: &PoolOptions,
    ) -> Result<Arc<dyn Pool>, DriverError> {
        let pool = SqlitePool::open(&params.endpoint.database, options).await?;
        Ok(Arc::new(pool))
    }
}

struct PoolInner {
    path: PathBuf,
    idle: Mutex<Vec<rusqlite::Connection>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl PoolInner {
    fn release(&self, conn: rusqlite::Connection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }

    fn take_idle(&self) -> Option<rusqlite::Connection> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }
}

/// Bounded pool of read-only SQLite connections
pub struct SqlitePool {
    inner: Arc<PoolInner>,
}

impl SqlitePool {
    /// Open the pool, establishing one connection to prove the file is readable
    pub async fn open(path: impl AsRef<Path>, options: &PoolOptions) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();
        let first = open_blocking(path.clone()).await?;

        let max = options.max_connections.max(1) as usize;
        tracing::debug!(path = %path.display(), max_connections = max, "Opened SQLite pool");

        Ok(Self {
            inner: Arc::new(PoolInner {
                path,
                idle: Mutex::new(vec![first]),
                permits: Arc::new(Semaphore::new(max)),
                acquire_timeout: options.acquire_timeout,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connections currently parked in the pool
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Pool for SqlitePool {
    async fn acquire(&self) -> Result<Box<dyn Connection>, DriverError> {
        if self.is_closed() {
            return Err(DriverError::Connect("pool is closed".to_string()));
        }

        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| DriverError::PoolTimeout)?
        .map_err(|_| DriverError::Connect("pool is closed".to_string()))?;

        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => open_blocking(self.inner.path.clone()).await?,
        };

        Ok(Box::new(SqliteConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        }))
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.clear();
        }
    }
}

/// A checked-out connection; returns to the idle list on drop
struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, DriverError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DriverError::Connect("connection was lost".to_string()))?;
        let sql = sql.to_string();
        let params = params.to_vec();

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = run_query(&conn, &sql, &params);
            (conn, result)
        })
        .await
        .map_err(|e| DriverError::Connect(format!("query worker failed: {}", e)))?;

        self.conn = Some(conn);
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

async fn open_blocking(path: PathBuf) -> Result<rusqlite::Connection, DriverError> {
    tokio::task::spawn_blocking(move || open_read_only(&path))
        .await
        .map_err(|e| DriverError::Connect(format!("open worker failed: {}", e)))?
}

fn open_read_only(path: &Path) -> Result<rusqlite::Connection, DriverError> {
    let conn = rusqlite::Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| map_error(&e, true))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| map_error(&e, true))?;
    Ok(conn)
}

fn run_query(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<RowSet, DriverError> {
    let mut stmt = conn.prepare(sql).map_err(|e| map_error(&e, false))?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| map_error(&e, false))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| map_error(&e, false))? {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let cell = row.get_ref(idx).map_err(|e| DriverError::Decode {
                column: name.clone(),
                message: e.to_string(),
            })?;
            values.push(decode(name, cell)?);
        }
        out.push(values);
    }

    Ok(RowSet { columns, rows: out })
}

fn decode(column: &str, cell: ValueRef<'_>) -> Result<SqlValue, DriverError> {
    match cell {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(v) => Ok(SqlValue::Int(v)),
        ValueRef::Real(v) => Ok(SqlValue::Float(v)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|e| DriverError::Decode {
                column: column.to_string(),
                message: e.to_string(),
            }),
        ValueRef::Blob(_) => Err(DriverError::Decode {
            column: column.to_string(),
            message: "binary columns are not supported".to_string(),
        }),
    }
}

fn map_error(e: &rusqlite::Error, opening: bool) -> DriverError {
    match e.sqlite_error_code() {
        Some(ErrorCode::AuthorizationForStatementDenied) | Some(ErrorCode::PermissionDenied) => {
            DriverError::Auth(e.to_string())
        }
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
            DriverError::Connect(e.to_string())
        }
        _ if opening => DriverError::Connect(e.to_string()),
        _ => DriverError::Statement(e.to_string()),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Timestamp(v) => {
                ToSqlOutput::Owned(Value::Text(v.format(TIMESTAMP_FORMAT).to_string()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::credential::{CredentialSource, LocalFileSource};
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lake.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE readings (reference_date TEXT, subsystem TEXT, value REAL, raw BLOB);
             INSERT INTO readings VALUES ('2023-05-01 03:00:00', 'NORTH', 1.5, NULL);
             INSERT INTO readings VALUES ('2023-05-01 04:00:00', 'SOUTH', 2, x'00ff');",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_fetch_with_bound_params() {
        let (_dir, path) = fixture();
        let pool = SqlitePool::open(&path, &PoolOptions::default()).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let start = NaiveDateTime::parse_from_str("2023-05-01 03:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let rows = conn
            .fetch_all(
                "SELECT reference_date, subsystem, value FROM readings \
                 WHERE reference_date >= ?1 AND subsystem = ?2",
                &[SqlValue::Timestamp(start), SqlValue::from("SOUTH")],
            )
            .await
            .unwrap();

        assert_eq!(rows.columns, vec!["reference_date", "subsystem", "value"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0][2], SqlValue::Float(2.0));
    }

    #[tokio::test]
    async fn test_connection_returns_to_pool() {
        let (_dir, path) = fixture();
        let pool = SqlitePool::open(&path, &PoolOptions::default()).await.unwrap();
        assert_eq!(pool.idle_connections(), 1);

        {
            let mut conn = pool.acquire().await.unwrap();
            assert_eq!(pool.idle_connections(), 0);
            // Statement errors still release the connection
            assert!(conn.fetch_all("SELECT * FROM missing", &[]).await.is_err());
        }
        assert_eq!(pool.idle_connections(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (_dir, path) = fixture();
        let options = PoolOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(50),
        };
        let pool = SqlitePool::open(&path, &options).await.unwrap();

        let held = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await, Err(DriverError::PoolTimeout)));
        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_read_only() {
        let (_dir, path) = fixture();
        let pool = SqlitePool::open(&path, &PoolOptions::default()).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let result = conn
            .fetch_all("INSERT INTO readings VALUES ('x', 'y', 0, NULL)", &[])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_blob_rejected() {
        let (_dir, path) = fixture();
        let pool = SqlitePool::open(&path, &PoolOptions::default()).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let result = conn.fetch_all("SELECT raw FROM readings", &[]).await;
        assert!(matches!(result, Err(DriverError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_driver_open_and_close() {
        let (_dir, path) = fixture();
        let params = LocalFileSource::new(&path).resolve().await.unwrap();
        let pool = SqliteDriver
            .open(&params, &PoolOptions::default())
            .await
            .unwrap();

        pool.close().await;
        assert!(matches!(pool.acquire().await, Err(DriverError::Connect(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_connect_error() {
        let dir = TempDir::new().unwrap();
        let result = SqlitePool::open(dir.path().join("absent.db"), &PoolOptions::default()).await;
        assert!(matches!(result, Err(DriverError::Connect(_))));
    }
}
