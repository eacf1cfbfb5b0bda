//! Vault client bootstrap
//!
//! [`VaultClient`] is configured through [`VaultClientBuilder`], which
//! validates eagerly and performs no I/O. [`VaultClient::connect`] then
//! resolves the TLS material, builds the HTTP client and proves the server is
//! reachable with a `sys/health` call before anything else may use it.
//!
//! # Examples
//!
//! ```no_run
//! use auth_bootstrap::{Context, VaultClient};
//!
//! # async fn example() -> auth_bootstrap::Result<()> {
//! let mut vault = VaultClient::builder()
//!     .address("https://vault.internal:8200")
//!     .token("s.token")
//!     .tls_config("./certs/ca.pem", "./certs/client.pem", "./certs/client-key.pem")
//!     .build()?;
//!
//! let ctx = Context::background();
//! vault.connect(&ctx).await?;
//! // ...
//! vault.stop(&ctx)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! `connect` and `stop` take `&mut self`; callers sharing a client across
//! tasks have to serialise access themselves (for example behind a mutex).
//! Calling `connect` again re-runs the whole sequence and replaces the
//! previous handle.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::context::Context;
use crate::endpoints::{Endpoints, HEALTH_QUERY};
use crate::errors::{BoxError, Error, Result};
use crate::models::HealthResponse;
use crate::tls::TlsMaterial;
use crate::util::generate_request_id;

const USER_AGENT_PREFIX: &str = "auth-bootstrap-rust";

/// Header carrying the Vault token
pub const TOKEN_HEADER: &str = "x-vault-token";

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builder for [`VaultClient`]
///
/// Empty strings mean "not set", mirroring how the values arrive from the
/// configuration file.
#[derive(Debug, Default)]
pub struct VaultClientBuilder {
    address: String,
    token: Option<SecretString>,
    insecure_skip_tls: bool,
    ca_path: String,
    client_cert_path: String,
    client_key_path: String,
    timeout_ms: Option<u64>,
}

impl VaultClientBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Vault address, e.g. `"https://vault.internal:8200"`
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the token sent with every request
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::new(token.into()));
        self
    }

    /// Skip server certificate verification (development only)
    pub fn insecure_skip_tls(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls = insecure;
        self
    }

    /// Set the CA, client certificate and client key paths in one go
    pub fn tls_config(
        mut self,
        ca_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        self.ca_path = ca_path.into();
        self.client_cert_path = client_cert_path.into();
        self.client_key_path = client_key_path.into();
        self
    }

    /// Set the request timeout in milliseconds
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Validate and build the (not yet connected) client
    ///
    /// Checks run in a fixed order and the first failure wins:
    /// address, token, CA certificate unless TLS verification is skipped,
    /// then certificate/key pairing.
    pub fn build(self) -> Result<VaultClient> {
        if self.address.is_empty() {
            return Err(Error::config("address is required"));
        }

        let token = match self.token {
            Some(token) if !token.expose_secret().is_empty() => token,
            _ => return Err(Error::config("token is required")),
        };

        if !self.insecure_skip_tls && self.ca_path.is_empty() {
            return Err(Error::config("CA certificate is required"));
        }

        if self.client_cert_path.is_empty() != self.client_key_path.is_empty() {
            return Err(Error::config(
                "client certificate and key must be provided together",
            ));
        }

        Ok(VaultClient {
            endpoints: Endpoints::new(&self.address),
            address: self.address,
            token,
            insecure_skip_tls: self.insecure_skip_tls,
            ca_path: self.ca_path,
            client_cert_path: self.client_cert_path,
            client_key_path: self.client_key_path,
            timeout: Duration::from_millis(self.timeout_ms.unwrap_or(crate::DEFAULT_TIMEOUT_MS)),
            http: None,
            tls: None,
            last_health: None,
        })
    }
}

/// Vault client descriptor and, once connected, live HTTP handle
pub struct VaultClient {
    address: String,
    token: SecretString,
    insecure_skip_tls: bool,
    ca_path: String,
    client_cert_path: String,
    client_key_path: String,
    timeout: Duration,
    endpoints: Endpoints,
    http: Option<HttpClient>,
    tls: Option<TlsMaterial>,
    last_health: Option<HealthResponse>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address)
            .field("insecure_skip_tls", &self.insecure_skip_tls)
            .field("ca_path", &self.ca_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_key_path", &self.client_key_path)
            .field("connected", &self.http.is_some())
            .finish()
    }
}

impl VaultClient {
    /// Start building a client
    pub fn builder() -> VaultClientBuilder {
        VaultClientBuilder::new()
    }

    /// Configured address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Configured token
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Whether server certificate verification is skipped
    pub fn insecure_skip_tls(&self) -> bool {
        self.insecure_skip_tls
    }

    /// Configured CA path, empty when unset
    pub fn ca_path(&self) -> &str {
        &self.ca_path
    }

    /// Configured client certificate path, empty when unset
    pub fn client_cert_path(&self) -> &str {
        &self.client_cert_path
    }

    /// Configured client key path, empty when unset
    pub fn client_key_path(&self) -> &str {
        &self.client_key_path
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a live handle is held
    pub fn is_connected(&self) -> bool {
        self.http.is_some()
    }

    /// Live HTTP handle, if connected
    pub fn http(&self) -> Option<&HttpClient> {
        self.http.as_ref()
    }

    /// TLS material resolved by the last successful connect
    pub fn tls_material(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Health reported by the last successful connect
    pub fn last_health(&self) -> Option<&HealthResponse> {
        self.last_health.as_ref()
    }

    /// Build the HTTP client and verify that Vault answers
    ///
    /// Nothing is stored unless every step succeeds. There is no retry.
    ///
    /// # Errors
    ///
    /// * `Error::FileNotFound` if a configured TLS file is missing
    /// * `Error::Tls` if TLS material cannot be loaded or is rejected by the
    ///   TLS backend when the client is built
    /// * `Error::ClientBuild` if the HTTP client cannot be built otherwise
    /// * `Error::Connection` if the health call fails
    /// * `Error::Cancelled` / `Error::DeadlineExceeded` if `ctx` finishes first
    pub async fn connect(&mut self, ctx: &Context) -> Result<()> {
        let (http, tls) = self.create_http_client()?;
        let health = ctx.run(self.verify_connection(&http)).await?;

        self.http = Some(http);
        self.tls = Some(tls);
        self.last_health = Some(health);

        Ok(())
    }

    /// Release the live handle
    ///
    /// Returns immediately when not connected. Otherwise the handle is
    /// dropped first, which closes its pooled idle connections, and only then
    /// is `ctx` checked: a done context is reported even though the release
    /// already happened.
    pub fn stop(&mut self, ctx: &Context) -> Result<()> {
        let Some(http) = self.http.take() else {
            return Ok(());
        };
        drop(http);

        info!("vault client stopped");

        match ctx.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn create_http_client(&self) -> Result<(HttpClient, TlsMaterial)> {
        let tls = TlsMaterial::assemble(
            self.insecure_skip_tls,
            &self.ca_path,
            &self.client_cert_path,
            &self.client_key_path,
        )?;

        let mut token = HeaderValue::from_str(self.token.expose_secret())
            .map_err(|_| Error::ClientBuild("token is not a valid header value".to_string()))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        let _ = headers.insert(TOKEN_HEADER, token);

        let builder = HttpClient::builder()
            .user_agent(format!("{}/{}", USER_AGENT_PREFIX, crate::VERSION))
            .timeout(self.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers);

        // Client identities are only checked by the TLS backend at build time.
        let http = tls.apply(builder)?.build().map_err(|e| {
            if tls.is_custom() {
                Error::Tls(error_chain(&e))
            } else {
                Error::ClientBuild(error_chain(&e))
            }
        })?;

        Ok((http, tls))
    }

    async fn verify_connection(&self, http: &HttpClient) -> Result<HealthResponse> {
        info!(
            address = %self.address,
            insecure_skip_tls = self.insecure_skip_tls,
            "trying to connect to vault..."
        );

        let response = http
            .get(self.endpoints.health())
            .query(HEALTH_QUERY)
            .header(REQUEST_ID_HEADER, generate_request_id())
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.connection_error(format!(
                "unexpected status {} from health endpoint",
                status
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| self.connection_error(e))?;

        info!(
            address = %self.address,
            version = %health.version,
            sealed = health.sealed,
            "connected to vault"
        );

        Ok(health)
    }

    fn connection_error(&self, source: impl Into<BoxError>) -> Error {
        Error::Connection {
            address: self.address.clone(),
            source: source.into(),
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
