//! Service bootstrap
//!
//! [`App`] wires the Vault client and the Redis cache service from a loaded
//! [`Config`], connects them in order and tears them down again.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{error, info};

use crate::cache::CacheService;
use crate::config::Config;
use crate::context::Context;
use crate::errors::Result;
use crate::redis::{ClientFactory, RedisClientFactory};
use crate::supervisor::Supervisor;
use crate::vault::VaultClient;

/// Build metadata reported at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// Crate version
    pub version: String,
    /// Commit the binary was built from
    pub git_commit: String,
    /// Build timestamp
    pub build_date: String,
}

impl BuildInfo {
    /// Metadata baked in at compile time
    ///
    /// `GIT_COMMIT` and `BUILD_DATE` are read from the build environment and
    /// fall back to `"unknown"`.
    pub fn current() -> Self {
        Self {
            version: crate::VERSION.to_string(),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
            build_date: option_env!("BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// The running service: its backing clients and background tasks
#[derive(Debug)]
pub struct App {
    build: BuildInfo,
    vault: VaultClient,
    cache: Arc<CacheService>,
    supervisor: Supervisor,
}

impl App {
    /// Build every client from `cfg`; nothing connects yet
    pub fn new(cfg: &Config, build: BuildInfo) -> Result<Self> {
        Self::with_cache_factory(cfg, build, Arc::new(RedisClientFactory))
    }

    /// Like [`App::new`], with a custom factory for the Redis clients
    pub fn with_cache_factory(
        cfg: &Config,
        build: BuildInfo,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self> {
        let vault_cfg = &cfg.vault;
        info!(
            address = %vault_cfg.address,
            insecure_skip_tls = vault_cfg.insecure_skip_tls,
            ca_path = %vault_cfg.ca_path,
            client_cert = %vault_cfg.client_cert_path,
            client_key = %vault_cfg.client_key_path,
            "initializing vault client"
        );

        let mut builder = VaultClient::builder()
            .address(&vault_cfg.address)
            .token(vault_cfg.token.expose_secret().as_str())
            .timeout_ms(vault_cfg.timeout_ms);
        if vault_cfg.insecure_skip_tls {
            builder = builder.insecure_skip_tls(true);
        }
        if vault_cfg.has_tls_paths() {
            builder = builder.tls_config(
                &vault_cfg.ca_path,
                &vault_cfg.client_cert_path,
                &vault_cfg.client_key_path,
            );
        }
        let vault = builder.build()?;

        let cache = CacheService::builder()
            .cfg(cfg.redis.clone())
            .factory(factory)
            .build()?;

        Ok(Self {
            build,
            vault,
            cache: Arc::new(cache),
            supervisor: Supervisor::new(),
        })
    }

    /// Build metadata
    pub fn build_info(&self) -> &BuildInfo {
        &self.build
    }

    /// Vault client
    pub fn vault(&self) -> &VaultClient {
        &self.vault
    }

    /// Redis cache service
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    /// Background task supervisor
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Connect Vault, then Redis
    ///
    /// Stops at the first failure; nothing is rolled back.
    pub async fn start(&mut self, ctx: &Context) -> Result<()> {
        self.vault.connect(ctx).await?;
        self.cache.connect(ctx).await?;
        Ok(())
    }

    /// Stop Vault, stop Redis, then wait for background tasks
    ///
    /// Every step runs even if an earlier one failed. Failures are logged and
    /// the first one is returned.
    pub async fn shutdown(&mut self, ctx: &Context) -> Result<()> {
        let mut first = None;

        if let Err(err) = self.vault.stop(ctx) {
            error!(error = %err, "error stopping vault client");
            first.get_or_insert(err);
        }

        if let Err(err) = self.cache.stop(ctx).await {
            error!(error = %err, "error stopping redis");
            first.get_or_insert(err);
        }

        match ctx.run(async {
            self.supervisor.wait().await;
            Ok(())
        })
        .await
        {
            Ok(()) => info!("shutdown"),
            Err(err) => {
                error!(error = %err, tasks = self.supervisor.len(), "background tasks did not finish");
                first.get_or_insert(err);
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
