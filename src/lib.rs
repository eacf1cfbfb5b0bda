//! Auth service bootstrap
//!
//! Brings up the two backing stores the auth service depends on, Vault and
//! Redis, and tears them down again on shutdown.
//!
//! # Features
//!
//! - Validating Vault client builder with a fixed, documented check order
//! - Mutual TLS with CA bundles and client identities resolved from disk
//! - `sys/health` handshake before a Vault client is considered connected
//! - Single-node and cluster Redis behind one cache service
//! - Exactly-once Redis connect under concurrent callers
//! - Cancellation and deadlines on every blocking call via [`Context`]
//! - YAML configuration with environment overrides
//!
//! # Example
//!
//! ```no_run
//! use auth_bootstrap::{App, BuildInfo, Config, Context};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("./config.yaml")?;
//!     let mut app = App::new(&config, BuildInfo::current())?;
//!
//!     let ctx = Context::background();
//!     app.start(&ctx).await?;
//!     // ... serve ...
//!     app.shutdown(&ctx.with_timeout(config.server.shutdown_timeout())).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
compile_error!("enable either the `rustls-tls` or the `native-tls` feature");

mod bootstrap;
mod cache;
mod config;
mod context;
mod endpoints;
mod errors;
mod models;
mod redis;
mod supervisor;
mod telemetry;
mod tls;
mod util;
mod vault;

pub use bootstrap::{App, BuildInfo};
pub use cache::{CacheService, CacheServiceBuilder};
pub use config::{
    Config, LogFormat, RedisConfig, RedisType, ServerConfig, VaultConfig, ENV_PREFIX,
};
pub use context::Context;
pub use errors::{Artifact, BoxError, Error, ErrorKind, Result};
pub use models::HealthResponse;
pub use crate::redis::{CacheClient, ClientFactory, ClusterClient, RedisClientFactory, SingleClient};
pub use supervisor::Supervisor;
pub use telemetry::init_tracing;
pub use tls::{resolve_path, ClientIdentityPaths, TlsMaterial};
pub use util::generate_id;
pub use vault::{VaultClient, VaultClientBuilder, REQUEST_ID_HEADER, TOKEN_HEADER};

// Re-export commonly used types
pub use secrecy::SecretString;
pub use tokio_util::sync::CancellationToken;

/// Crate version, matches Cargo.toml version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Vault request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
