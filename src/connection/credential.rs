//! Credentials and where they come from
//!
//! A [`CredentialSource`] resolves a complete [`ConnectionParams`] value:
//! the endpoint plus one immutable [`Credential`]. Rotation replaces the whole
//! value; nothing is mutated field by field.

use crate::connection::identity::{SecretsProvider, TokenIssuer};
use crate::error::{LakehouseError, LakehouseResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A secret string that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// TLS requirement for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    /// Require TLS and verify the server against the root certificate
    VerifyFull,
}

/// Where the store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Database name, or file path for embedded stores
    pub database: String,
    pub ssl_mode: SslMode,
    pub ssl_root_cert: Option<PathBuf>,
}

/// Who we authenticate as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: Secret,
    /// Set for short-lived tokens
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Long-lived credential (password)
    pub fn permanent(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
            expires_at: None,
        }
    }

    /// True when the credential expires within `margin` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + margin,
            None => false,
        }
    }
}

/// Endpoint and credential, resolved together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub endpoint: Endpoint,
    pub credential: Credential,
}

/// Produces fresh connection parameters on demand
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short label for logs ("static", "token", "file")
    fn kind(&self) -> &'static str;

    async fn resolve(&self) -> LakehouseResult<ConnectionParams>;
}

/// Plain host/port/database/user/password credentials
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Secret,
    pub ssl_mode: SslMode,
    pub ssl_root_cert: Option<PathBuf>,
}

impl StaticCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: Secret::new(password),
            ssl_mode: SslMode::default(),
            ssl_root_cert: None,
        }
    }

    /// Builder method: TLS settings
    pub fn ssl(mut self, mode: SslMode, root_cert: Option<PathBuf>) -> Self {
        self.ssl_mode = mode;
        self.ssl_root_cert = root_cert;
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn resolve(&self) -> LakehouseResult<ConnectionParams> {
        let required = [
            ("host", self.host.is_empty()),
            ("database", self.database.is_empty()),
            ("user", self.user.is_empty()),
            ("password", self.password.is_empty()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, empty)| *empty)
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(LakehouseError::Configuration(format!(
                "missing required connection fields: {}",
                missing.join(", ")
            )));
        }
        if self.port == 0 {
            return Err(LakehouseError::Configuration(
                "port must be non-zero".to_string(),
            ));
        }

        Ok(ConnectionParams {
            endpoint: Endpoint {
                host: self.host.clone(),
                port: self.port,
                database: self.database.clone(),
                ssl_mode: self.ssl_mode,
                ssl_root_cert: self.ssl_root_cert.clone(),
            },
            credential: Credential {
                username: self.user.clone(),
                secret: self.password.clone(),
                expires_at: None,
            },
        })
    }
}

/// Secrets-service endpoint plus a freshly minted short-lived token
pub struct TokenCredentials {
    secrets: Arc<dyn SecretsProvider>,
    issuer: Arc<dyn TokenIssuer>,
    ssl_root_cert: Option<PathBuf>,
}

impl TokenCredentials {
    pub fn new(secrets: Arc<dyn SecretsProvider>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            secrets,
            issuer,
            ssl_root_cert: None,
        }
    }

    /// Builder method: trusted root certificate for the server
    pub fn root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_root_cert = Some(path.into());
        self
    }
}

#[async_trait]
impl CredentialSource for TokenCredentials {
    fn kind(&self) -> &'static str {
        "token"
    }

    async fn resolve(&self) -> LakehouseResult<ConnectionParams> {
        let secret = self.secrets.fetch_secret().await?;
        let endpoint = Endpoint {
            host: secret.host,
            port: secret.port,
            database: secret.dbname,
            // Tokens are only accepted over TLS
            ssl_mode: if self.ssl_root_cert.is_some() {
                SslMode::VerifyFull
            } else {
                SslMode::Require
            },
            ssl_root_cert: self.ssl_root_cert.clone(),
        };

        let token = self.issuer.issue_token(&endpoint, &secret.username).await?;
        tracing::debug!(
            host = %endpoint.host,
            user = %secret.username,
            expires_at = %token.expires_at,
            "Issued database auth token"
        );

        Ok(ConnectionParams {
            endpoint,
            credential: Credential {
                username: secret.username,
                secret: token.token,
                expires_at: Some(token.expires_at),
            },
        })
    }
}

/// Embedded database file; no authentication
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialSource for LocalFileSource {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn resolve(&self) -> LakehouseResult<ConnectionParams> {
        if self.path.as_os_str().is_empty() {
            return Err(LakehouseError::Configuration(
                "database file path is empty".to_string(),
            ));
        }

        Ok(ConnectionParams {
            endpoint: Endpoint {
                host: "localhost".to_string(),
                port: 0,
                database: self.path.to_string_lossy().to_string(),
                ssl_mode: SslMode::Disable,
                ssl_root_cert: None,
            },
            credential: Credential::permanent("local", ""),
        })
    }
}
