//! Identity service client
//!
//! Token-based authentication needs two things from outside the database: the
//! connection secret (`{username, host, port, dbname}`) and a short-lived auth
//! token minted for that user. Both come from an HTTP identity service.

use crate::connection::credential::{Endpoint, Secret};
use crate::error::{LakehouseError, LakehouseResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Connection secret stored by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSecret {
    pub username: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
}

/// A minted auth token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Secret,
    pub expires_at: DateTime<Utc>,
}

/// Looks up the database connection secret
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn fetch_secret(&self) -> LakehouseResult<DatabaseSecret>;
}

/// Mints short-lived database auth tokens
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, endpoint: &Endpoint, username: &str)
        -> LakehouseResult<IssuedToken>;
}

/// Configuration for the identity service client
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Base URL of the identity service (e.g., "https://identity.internal")
    pub base_url: String,
    /// Name of the stored database secret
    pub secret_name: String,
    /// Requested token lifetime
    pub token_ttl_secs: i64,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8200".to_string(),
            secret_name: "lakehouse/reader".to_string(),
            token_ttl_secs: 900,
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    ttl_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_in: i64,
}

/// HTTP client for the identity service; implements both provider traits
pub struct HttpIdentityClient {
    client: Client,
    config: IdentityConfig,
}

impl HttpIdentityClient {
    pub fn new(config: IdentityConfig) -> LakehouseResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                LakehouseError::Configuration(format!("cannot build identity client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.request_timeout_ms)
    }

    fn map_transport(&self, operation: &str, e: reqwest::Error) -> LakehouseError {
        if e.is_timeout() {
            LakehouseError::timeout(operation, self.request_timeout())
        } else if e.is_connect() {
            LakehouseError::Configuration(format!("identity service unavailable: {}", e))
        } else {
            LakehouseError::Configuration(format!("identity request failed: {}", e))
        }
    }
}

fn check_status(operation: &str, status: StatusCode) -> LakehouseResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LakehouseError::Authentication(
            format!("identity service denied {}: {}", operation, status),
        )),
        _ => Err(LakehouseError::Configuration(format!(
            "identity service returned {} for {}",
            status, operation
        ))),
    }
}

#[async_trait]
impl SecretsProvider for HttpIdentityClient {
    async fn fetch_secret(&self) -> LakehouseResult<DatabaseSecret> {
        let url = self.url(&format!("v1/secrets/{}", self.config.secret_name));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport("fetch database secret", e))?;
        check_status("secret lookup", response.status())?;

        let secret: DatabaseSecret = response
            .json()
            .await
            .map_err(|e| LakehouseError::Configuration(format!("malformed secret: {}", e)))?;
        tracing::debug!(secret = %self.config.secret_name, host = %secret.host, "Fetched database secret");
        Ok(secret)
    }
}

#[async_trait]
impl TokenIssuer for HttpIdentityClient {
    async fn issue_token(
        &self,
        endpoint: &Endpoint,
        username: &str,
    ) -> LakehouseResult<IssuedToken> {
        let body = TokenRequest {
            host: &endpoint.host,
            port: endpoint.port,
            username,
            ttl_seconds: self.config.token_ttl_secs,
        };

        let response = self
            .client
            .post(self.url("v1/tokens"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport("issue auth token", e))?;
        check_status("token request", response.status())?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LakehouseError::Authentication(format!("malformed token response: {}", e)))?;
        Ok(token.into_issued(Utc::now()))
    }
}

impl TokenResponse {
    fn into_issued(self, now: DateTime<Utc>) -> IssuedToken {
        IssuedToken {
            token: Secret::new(self.token),
            expires_at: now + Duration::seconds(self.expires_in),
        }
    }
}
