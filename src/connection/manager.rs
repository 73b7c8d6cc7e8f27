//! Connection Manager
//!
//! Owns the credential source and the pool built from the current credential.
//!
//! ```text
//! Unconfigured --configure--> Configured <--rotate--> Reconnecting
//!       ^                         |
//!       +---------reset-----------+        any --dispose--> Disposed
//! ```
//!
//! Rotation happens in two cases: the credential is about to expire, or the
//! store rejected it. Either way the new pool is opened before the old one is
//! swapped out, and only one caller performs the rotation while the others
//! wait and reuse its result. Each operation retries at most once after an
//! authentication failure.

use crate::connection::credential::{ConnectionParams, CredentialSource};
use crate::connection::driver::{Connection, Driver, DriverError, Pool, PoolOptions, RowSet};
use crate::error::{LakehouseError, LakehouseResult};
use crate::query::{CompiledQuery, Dialect};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    Configured,
    Reconnecting,
    Disposed,
}

/// Timeouts and pool sizing
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub pool: PoolOptions,
    /// Bound on credential resolution and pool opening
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    /// Rotate credentials this long before they expire
    pub refresh_margin: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            connect_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(30),
            refresh_margin: Duration::from_secs(60),
        }
    }
}

/// Pool plus the credential it was opened with
struct Live {
    params: ConnectionParams,
    pool: Arc<dyn Pool>,
    generation: u64,
}

struct Slot {
    source: Arc<dyn CredentialSource>,
    live: Arc<Live>,
}

/// Mediates every database round-trip
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    config: ManagerConfig,
    slot: RwLock<Option<Slot>>,
    /// Serializes configure, rotation, reset and dispose
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    reconnecting: AtomicBool,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, config: ManagerConfig) -> Self {
        Self {
            driver,
            config,
            slot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        if self.disposed.load(Ordering::Acquire) {
            return ConnectionState::Disposed;
        }
        if self.slot.read().await.is_none() {
            ConnectionState::Unconfigured
        } else if self.reconnecting.load(Ordering::Acquire) {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Configured
        }
    }

    pub async fn is_configured(&self) -> bool {
        matches!(
            self.state().await,
            ConnectionState::Configured | ConnectionState::Reconnecting
        )
    }

    /// Resolve credentials from `source` and open a pool with them.
    ///
    /// Replaces any existing configuration; the previous pool is closed once
    /// the new one is in place.
    pub async fn configure(&self, source: Arc<dyn CredentialSource>) -> LakehouseResult<()> {
        let _guard = self.refresh_lock.lock().await;
        self.check_not_disposed()?;

        let live = self.open_live(source.as_ref()).await?;
        tracing::info!(
            source = source.kind(),
            host = %live.params.endpoint.host,
            database = %live.params.endpoint.database,
            user = %live.params.credential.username,
            "Connection manager configured"
        );

        let previous = self.slot.write().await.replace(Slot { source, live });
        if let Some(previous) = previous {
            retire(previous.live);
        }
        Ok(())
    }

    /// Check out a connection, rotating credentials first if they are about
    /// to expire. The connection goes back to the pool when dropped.
    pub async fn acquire_connection(&self) -> LakehouseResult<ScopedConnection> {
        let live = self.fresh_live().await?;
        match self.checkout(&live).await {
            Err(LakehouseError::Authentication(message)) => {
                tracing::warn!(generation = live.generation, %message, "Credential rejected on acquire, rotating");
                let rotated = self.rotate(live.generation).await?;
                self.checkout(&rotated).await
            }
            other => other,
        }
    }

    /// Run a compiled query on a pooled connection.
    ///
    /// An authentication failure triggers one rotation and one retry; a second
    /// failure is returned as `Authentication`.
    pub async fn execute(&self, query: &CompiledQuery) -> LakehouseResult<RowSet> {
        let live = self.fresh_live().await?;
        match self.execute_on(&live, query).await {
            Err(LakehouseError::Authentication(message)) => {
                tracing::warn!(generation = live.generation, %message, "Credential rejected, rotating");
                let rotated = self.rotate(live.generation).await?;
                self.execute_on(&rotated, query).await
            }
            other => other,
        }
    }

    /// Close the pool and forget the credential source
    pub async fn reset(&self) {
        let _guard = self.refresh_lock.lock().await;
        let previous = self.slot.write().await.take();
        if let Some(previous) = previous {
            retire(previous.live);
            tracing::info!("Connection manager reset");
        }
    }

    /// Close everything; the manager cannot be configured again.
    ///
    /// Waits at most `connect_timeout` for checked-out connections to come
    /// back; the refresh lock is not held while waiting.
    pub async fn dispose(&self) {
        let previous = {
            let _guard = self.refresh_lock.lock().await;
            self.disposed.store(true, Ordering::Release);
            self.slot.write().await.take()
        };

        if let Some(previous) = previous {
            let timeout = self.config.connect_timeout;
            if tokio::time::timeout(timeout, previous.live.pool.close())
                .await
                .is_err()
            {
                tracing::warn!(?timeout, "Pool close timed out with connections still checked out");
            }
            tracing::info!("Connection manager disposed");
        }
    }

    pub async fn host(&self) -> LakehouseResult<String> {
        self.with_params(|p| p.endpoint.host.clone()).await
    }

    pub async fn port(&self) -> LakehouseResult<u16> {
        self.with_params(|p| p.endpoint.port).await
    }

    pub async fn database(&self) -> LakehouseResult<String> {
        self.with_params(|p| p.endpoint.database.clone()).await
    }

    pub async fn user(&self) -> LakehouseResult<String> {
        self.with_params(|p| p.credential.username.clone()).await
    }

    /// Increments on every successful configure or rotation
    pub async fn generation(&self) -> Option<u64> {
        self.slot.read().await.as_ref().map(|s| s.live.generation)
    }

    async fn with_params<T>(&self, f: impl FnOnce(&ConnectionParams) -> T) -> LakehouseResult<T> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|slot| f(&slot.live.params))
            .ok_or(LakehouseError::NotConfigured)
    }

    fn check_not_disposed(&self) -> LakehouseResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(LakehouseError::Configuration(
                "connection manager has been disposed".to_string(),
            ));
        }
        Ok(())
    }

    async fn current(&self) -> LakehouseResult<(Arc<dyn CredentialSource>, Arc<Live>)> {
        self.check_not_disposed()?;
        self.slot
            .read()
            .await
            .as_ref()
            .map(|slot| (slot.source.clone(), slot.live.clone()))
            .ok_or_else(|| {
                LakehouseError::Configuration(
                    "Connection manager not configured. Call configure() first.".to_string(),
                )
            })
    }

    async fn fresh_live(&self) -> LakehouseResult<Arc<Live>> {
        let (_, live) = self.current().await?;
        let margin = chrono::Duration::from_std(self.config.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());

        if live.params.credential.expires_within(Utc::now(), margin) {
            tracing::info!(generation = live.generation, "Credential near expiry, rotating");
            return self.rotate(live.generation).await;
        }
        Ok(live)
    }

    /// Replace the pool built for `stale` with one using fresh credentials.
    ///
    /// Callers that lose the race find a newer generation in place and use it.
    async fn rotate(&self, stale: u64) -> LakehouseResult<Arc<Live>> {
        let _guard = self.refresh_lock.lock().await;
        let (source, current) = self.current().await?;
        if current.generation != stale {
            return Ok(current);
        }

        self.reconnecting.store(true, Ordering::Release);
        let opened = self.open_live(source.as_ref()).await;
        self.reconnecting.store(false, Ordering::Release);

        let live = match opened {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!(generation = stale, error = %e, "Credential rotation failed, keeping previous pool");
                return Err(match e {
                    LakehouseError::Timeout { .. } | LakehouseError::Authentication(_) => e,
                    other => LakehouseError::Authentication(format!(
                        "credential refresh failed: {}",
                        other
                    )),
                });
            }
        };

        tracing::info!(from = stale, to = live.generation, "Rotated credentials");
        let previous = self.slot.write().await.replace(Slot {
            source,
            live: live.clone(),
        });
        if let Some(previous) = previous {
            retire(previous.live);
        }
        Ok(live)
    }

    async fn open_live(&self, source: &dyn CredentialSource) -> LakehouseResult<Arc<Live>> {
        let timeout = self.config.connect_timeout;

        let params = tokio::time::timeout(timeout, source.resolve())
            .await
            .map_err(|_| LakehouseError::timeout("resolve credentials", timeout))??;

        let pool = tokio::time::timeout(timeout, self.driver.open(&params, &self.config.pool))
            .await
            .map_err(|_| LakehouseError::timeout("open connection pool", timeout))?
            .map_err(|e| map_driver_error(e, "open connection pool", timeout))?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Arc::new(Live {
            params,
            pool,
            generation,
        }))
    }

    async fn checkout(&self, live: &Arc<Live>) -> LakehouseResult<ScopedConnection> {
        let timeout = self.config.pool.acquire_timeout;
        let conn = tokio::time::timeout(timeout, live.pool.acquire())
            .await
            .map_err(|_| LakehouseError::timeout("acquire a connection", timeout))?
            .map_err(|e| map_driver_error(e, "acquire a connection", timeout))?;

        Ok(ScopedConnection {
            conn,
            live: live.clone(),
            query_timeout: self.config.query_timeout,
        })
    }

    async fn execute_on(&self, live: &Arc<Live>, query: &CompiledQuery) -> LakehouseResult<RowSet> {
        let mut conn = self.checkout(live).await?;
        conn.fetch_all(query).await
    }
}

/// A pooled connection checked out from the manager.
///
/// Keeps its pool alive even if the manager rotates meanwhile; dropping it
/// returns the connection.
pub struct ScopedConnection {
    conn: Box<dyn Connection>,
    live: Arc<Live>,
    query_timeout: Duration,
}

impl ScopedConnection {
    pub async fn fetch_all(&mut self, query: &CompiledQuery) -> LakehouseResult<RowSet> {
        tracing::debug!(intent = %query.intent, sql = %query.sql, "Executing query");
        let values = query.values();

        tokio::time::timeout(self.query_timeout, self.conn.fetch_all(&query.sql, &values))
            .await
            .map_err(|_| LakehouseError::timeout("execute query", self.query_timeout))?
            .map_err(|e| map_driver_error(e, &query.intent, self.query_timeout))
    }

    /// Generation of the credential this connection was opened with
    pub fn generation(&self) -> u64 {
        self.live.generation
    }
}

fn retire(live: Arc<Live>) {
    let pool = live.pool.clone();
    tokio::spawn(async move {
        pool.close().await;
    });
}

fn map_driver_error(e: DriverError, intent: &str, after: Duration) -> LakehouseError {
    match e {
        DriverError::Auth(message) => LakehouseError::Authentication(message),
        DriverError::PoolTimeout => LakehouseError::timeout("acquire a connection", after),
        other => LakehouseError::QueryExecution {
            intent: intent.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::credential::{Credential, Endpoint, Secret, SslMode, StaticCredentials};
    use crate::query::SqlValue;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockState {
        rejected: std::sync::Mutex<HashSet<String>>,
        reject_all: AtomicBool,
        /// Rejected tokens fail at checkout instead of at query time
        reject_on_acquire: AtomicBool,
        /// `close` waits for every connection to come back, like `PgPool`
        close_waits: AtomicBool,
        opens: AtomicUsize,
        closes: AtomicUsize,
        outstanding: AtomicUsize,
    }

    impl MockState {
        fn reject(&self, token: &str) {
            self.rejected.lock().unwrap().insert(token.to_string());
        }

        fn is_rejected(&self, token: &str) -> bool {
            self.reject_all.load(Ordering::SeqCst) || self.rejected.lock().unwrap().contains(token)
        }
    }

    struct MockDriver {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl Driver for MockDriver {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn open(
            &self,
            params: &ConnectionParams,
            _options: &PoolOptions,
        ) -> Result<Arc<dyn Pool>, DriverError> {
            self.state.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockPool {
                token: params.credential.secret.expose().to_string(),
                state: self.state.clone(),
            }))
        }
    }

    struct MockPool {
        token: String,
        state: Arc<MockState>,
    }

    #[async_trait]
    impl Pool for MockPool {
        async fn acquire(&self) -> Result<Box<dyn Connection>, DriverError> {
            if self.state.reject_on_acquire.load(Ordering::SeqCst)
                && self.state.is_rejected(&self.token)
            {
                return Err(DriverError::Auth("token expired".into()));
            }
            self.state.outstanding.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                token: self.token.clone(),
                state: self.state.clone(),
            }))
        }

        async fn close(&self) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            if self.state.close_waits.load(Ordering::SeqCst) {
                while self.state.outstanding.load(Ordering::SeqCst) > 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
    }

    struct MockConnection {
        token: String,
        state: Arc<MockState>,
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn fetch_all(
            &mut self,
            sql: &str,
            _params: &[SqlValue],
        ) -> Result<RowSet, DriverError> {
            if self.state.is_rejected(&self.token) {
                return Err(DriverError::Auth("password authentication failed".into()));
            }
            match sql {
                "SLOW" => tokio::time::sleep(Duration::from_secs(5)).await,
                "FAIL" => return Err(DriverError::Statement("syntax error".into())),
                _ => {}
            }
            Ok(RowSet {
                columns: vec!["token".into()],
                rows: vec![vec![SqlValue::from(self.token.as_str())]],
            })
        }
    }

    impl Drop for MockConnection {
        fn drop(&mut self) {
            self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Issues tokens t1, t2, ... that expire after `ttl`
    struct MockSource {
        resolves: AtomicUsize,
        ttl: Option<chrono::Duration>,
        fail_after: Option<usize>,
        delay: Option<Duration>,
    }

    impl MockSource {
        fn new(ttl: Option<chrono::Duration>) -> Arc<Self> {
            Arc::new(Self {
                resolves: AtomicUsize::new(0),
                ttl,
                fail_after: None,
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                resolves: AtomicUsize::new(0),
                ttl: None,
                fail_after: None,
                delay: Some(delay),
            })
        }

        fn resolves(&self) -> usize {
            self.resolves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialSource for MockSource {
        fn kind(&self) -> &'static str {
            "mock"
        }

        async fn resolve(&self) -> LakehouseResult<ConnectionParams> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let n = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after.map_or(false, |limit| n > limit) {
                return Err(LakehouseError::Configuration("identity service down".into()));
            }
            Ok(ConnectionParams {
                endpoint: Endpoint {
                    host: "lake.example.com".into(),
                    port: 5432,
                    database: "lakehouse".into(),
                    ssl_mode: SslMode::Require,
                    ssl_root_cert: None,
                },
                credential: Credential {
                    username: "reader".into(),
                    secret: Secret::new(format!("t{}", n)),
                    expires_at: self.ttl.map(|ttl| Utc::now() + ttl),
                },
            })
        }
    }

    fn manager_with(config: ManagerConfig) -> (ConnectionManager, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let driver = Arc::new(MockDriver {
            state: state.clone(),
        });
        (ConnectionManager::new(driver, config), state)
    }

    fn manager() -> (ConnectionManager, Arc<MockState>) {
        manager_with(ManagerConfig::default())
    }

    fn ping() -> CompiledQuery {
        CompiledQuery::raw("SELECT 1", "ping")
    }

    fn token_of(rows: &RowSet) -> String {
        rows.strings("token").remove(0)
    }

    #[tokio::test]
    async fn test_unconfigured_manager() {
        let (mgr, _) = manager();
        assert_eq!(mgr.state().await, ConnectionState::Unconfigured);
        assert!(matches!(
            mgr.execute(&ping()).await,
            Err(LakehouseError::Configuration(_))
        ));
        assert!(matches!(
            mgr.acquire_connection().await,
            Err(LakehouseError::Configuration(_))
        ));
        assert!(matches!(mgr.host().await, Err(LakehouseError::NotConfigured)));
        assert!(matches!(mgr.port().await, Err(LakehouseError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_configure_and_execute() {
        let (mgr, state) = manager();
        mgr.configure(MockSource::new(None)).await.unwrap();

        assert_eq!(mgr.state().await, ConnectionState::Configured);
        assert_eq!(mgr.host().await.unwrap(), "lake.example.com");
        assert_eq!(mgr.port().await.unwrap(), 5432);
        assert_eq!(mgr.database().await.unwrap(), "lakehouse");
        assert_eq!(mgr.user().await.unwrap(), "reader");

        let rows = mgr.execute(&ping()).await.unwrap();
        assert_eq!(token_of(&rows), "t1");
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configure_rejects_incomplete_static_credentials() {
        let (mgr, state) = manager();
        let source = Arc::new(StaticCredentials::new("", 5432, "lakehouse", "reader", "pw"));

        assert!(matches!(
            mgr.configure(source).await,
            Err(LakehouseError::Configuration(_))
        ));
        assert_eq!(mgr.state().await, ConnectionState::Unconfigured);
        assert_eq!(state.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expiring_credential_rotated_before_use() {
        let (mgr, _) = manager();
        let source = MockSource::new(Some(chrono::Duration::seconds(30)));
        mgr.configure(source.clone()).await.unwrap();

        // 30s left is inside the 60s margin
        let rows = mgr.execute(&ping()).await.unwrap();
        assert_eq!(token_of(&rows), "t2");
        assert_eq!(source.resolves(), 2);
    }

    #[tokio::test]
    async fn test_long_lived_token_not_rotated() {
        let (mgr, _) = manager();
        let source = MockSource::new(Some(chrono::Duration::minutes(15)));
        mgr.configure(source.clone()).await.unwrap();

        mgr.execute(&ping()).await.unwrap();
        mgr.execute(&ping()).await.unwrap();
        assert_eq!(source.resolves(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_rotates_once_and_retries() {
        let (mgr, state) = manager();
        let source = MockSource::new(None);
        mgr.configure(source.clone()).await.unwrap();
        state.reject("t1");

        let rows = mgr.execute(&ping()).await.unwrap();
        assert_eq!(token_of(&rows), "t2");
        assert_eq!(source.resolves(), 2);
        assert_eq!(mgr.generation().await, Some(2));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_auth_failure_surfaces() {
        let (mgr, state) = manager();
        let source = MockSource::new(None);
        mgr.configure(source.clone()).await.unwrap();
        state.reject_all.store(true, Ordering::SeqCst);

        assert!(matches!(
            mgr.execute(&ping()).await,
            Err(LakehouseError::Authentication(_))
        ));
        assert_eq!(source.resolves(), 2);
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquire_rejection_rotates_once() {
        let (mgr, state) = manager();
        let source = MockSource::new(None);
        mgr.configure(source.clone()).await.unwrap();
        state.reject_on_acquire.store(true, Ordering::SeqCst);
        state.reject("t1");

        let mut conn = mgr.acquire_connection().await.unwrap();
        assert_eq!(conn.generation(), 2);
        assert_eq!(token_of(&conn.fetch_all(&ping()).await.unwrap()), "t2");
        assert_eq!(source.resolves(), 2);
    }

    #[tokio::test]
    async fn test_acquire_second_rejection_surfaces() {
        let (mgr, state) = manager();
        let source = MockSource::new(None);
        mgr.configure(source.clone()).await.unwrap();
        state.reject_on_acquire.store(true, Ordering::SeqCst);
        state.reject_all.store(true, Ordering::SeqCst);

        assert!(matches!(
            mgr.acquire_connection().await,
            Err(LakehouseError::Authentication(_))
        ));
        assert_eq!(source.resolves(), 2);
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_credential_resolution_timeout() {
        let (mgr, state) = manager_with(ManagerConfig {
            connect_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        match mgr.configure(MockSource::slow(Duration::from_secs(5))).await {
            Err(LakehouseError::Timeout { operation, .. }) => {
                assert_eq!(operation, "resolve credentials");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(mgr.state().await, ConnectionState::Unconfigured);
        assert_eq!(state.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_rejections_rotate_once() {
        let (mgr, state) = manager();
        let source = MockSource::new(None);
        mgr.configure(source.clone()).await.unwrap();
        state.reject("t1");

        let mgr = Arc::new(mgr);
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.execute(&ping()).await })
            })
            .collect();

        for task in tasks {
            let rows = task.await.unwrap().unwrap();
            assert_eq!(token_of(&rows), "t2");
        }
        assert_eq!(source.resolves(), 2);
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_previous_pool() {
        let (mgr, state) = manager();
        let source = Arc::new(MockSource {
            resolves: AtomicUsize::new(0),
            ttl: None,
            fail_after: Some(1),
            delay: None,
        });
        mgr.configure(source).await.unwrap();
        state.reject("t1");

        assert!(matches!(
            mgr.execute(&ping()).await,
            Err(LakehouseError::Authentication(_))
        ));
        assert_eq!(mgr.state().await, ConnectionState::Configured);
        assert_eq!(mgr.generation().await, Some(1));
        assert_eq!(state.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let (mgr, state) = manager_with(ManagerConfig {
            query_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        mgr.configure(MockSource::new(None)).await.unwrap();

        let result = mgr.execute(&CompiledQuery::raw("SLOW", "slow query")).await;
        assert!(matches!(result, Err(LakehouseError::Timeout { .. })));
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_statement_error_releases_connection() {
        let (mgr, state) = manager();
        mgr.configure(MockSource::new(None)).await.unwrap();

        match mgr.execute(&CompiledQuery::raw("FAIL", "broken query")).await {
            Err(LakehouseError::QueryExecution { intent, message }) => {
                assert_eq!(intent, "broken query");
                assert!(message.contains("syntax error"));
            }
            other => panic!("expected query error, got {:?}", other.map(|r| r.len())),
        }
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scoped_connection_released_on_drop() {
        let (mgr, state) = manager();
        mgr.configure(MockSource::new(None)).await.unwrap();

        let mut conn = mgr.acquire_connection().await.unwrap();
        assert_eq!(conn.generation(), 1);
        conn.fetch_all(&ping()).await.unwrap();
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 1);
        drop(conn);
        assert_eq!(state.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_and_reconfigure() {
        let (mgr, _) = manager();
        mgr.configure(MockSource::new(None)).await.unwrap();
        mgr.reset().await;

        assert_eq!(mgr.state().await, ConnectionState::Unconfigured);
        assert!(matches!(
            mgr.execute(&ping()).await,
            Err(LakehouseError::Configuration(_))
        ));

        mgr.configure(MockSource::new(None)).await.unwrap();
        assert!(mgr.execute(&ping()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let (mgr, state) = manager();
        mgr.configure(MockSource::new(None)).await.unwrap();
        mgr.dispose().await;

        assert_eq!(mgr.state().await, ConnectionState::Disposed);
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            mgr.configure(MockSource::new(None)).await,
            Err(LakehouseError::Configuration(_))
        ));
        assert!(matches!(mgr.user().await, Err(LakehouseError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_dispose_bounded_while_connection_held() {
        let (mgr, state) = manager_with(ManagerConfig {
            connect_timeout: Duration::from_millis(300),
            ..Default::default()
        });
        mgr.configure(MockSource::new(None)).await.unwrap();
        state.close_waits.store(true, Ordering::SeqCst);

        let held = mgr.acquire_connection().await.unwrap();
        let mgr = Arc::new(mgr);
        let disposing = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.dispose().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The refresh lock is free while the pool drains
        let configure = tokio::time::timeout(
            Duration::from_millis(200),
            mgr.configure(MockSource::new(None)),
        )
        .await
        .expect("configure blocked behind dispose");
        assert!(matches!(configure, Err(LakehouseError::Configuration(_))));

        tokio::time::timeout(Duration::from_secs(2), disposing)
            .await
            .expect("dispose did not finish")
            .unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Disposed);
        drop(held);
    }
}
