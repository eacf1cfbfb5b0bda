//! Redis cache service
//!
//! [`CacheService`] hides the single-node/cluster split behind one connect and
//! one stop. Connecting happens at most once per service: the first caller
//! runs the whole sequence and every caller, concurrent or later, gets the
//! outcome it recorded. A failed first connect stays failed for the life of
//! the service.

use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use crate::config::{RedisConfig, RedisType};
use crate::context::Context;
use crate::errors::{Error, Result};
use crate::redis::{CacheClient, ClientFactory, RedisClientFactory};

type Outcome = std::result::Result<(), Arc<Error>>;

/// Builder for [`CacheService`]
#[derive(Default)]
pub struct CacheServiceBuilder {
    cfg: Option<RedisConfig>,
    factory: Option<Arc<dyn ClientFactory>>,
}

impl std::fmt::Debug for CacheServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheServiceBuilder")
            .field("cfg", &self.cfg)
            .field("custom_factory", &self.factory.is_some())
            .finish()
    }
}

impl CacheServiceBuilder {
    /// Set the Redis configuration (required)
    pub fn cfg(mut self, cfg: RedisConfig) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Replace the factory that constructs concrete clients
    pub fn factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the service; the configuration is assumed to be validated already
    pub fn build(self) -> Result<CacheService> {
        let cfg = self.cfg.ok_or_else(|| Error::config("cfg is required"))?;
        Ok(CacheService {
            cfg,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(RedisClientFactory)),
            gate: OnceCell::new(),
            client: Mutex::new(None),
        })
    }
}

/// Redis connection lifecycle for one configuration
pub struct CacheService {
    cfg: RedisConfig,
    factory: Arc<dyn ClientFactory>,
    gate: OnceCell<Outcome>,
    client: Mutex<Option<Box<dyn CacheClient>>>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("cfg", &self.cfg)
            .field("attempted", &self.gate.initialized())
            .finish()
    }
}

impl CacheService {
    /// Start building a service
    pub fn builder() -> CacheServiceBuilder {
        CacheServiceBuilder::default()
    }

    /// Service using the real Redis clients
    pub fn new(cfg: RedisConfig) -> Self {
        Self {
            cfg,
            factory: Arc::new(RedisClientFactory),
            gate: OnceCell::new(),
            client: Mutex::new(None),
        }
    }

    /// Stored configuration
    pub fn config(&self) -> &RedisConfig {
        &self.cfg
    }

    /// Whether a connected client is held
    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Connect, exactly once
    ///
    /// Concurrent callers wait for the first one to finish and then share its
    /// outcome. Errors are returned as [`Error::Shared`], so every caller sees
    /// the very same error value.
    pub async fn connect(&self, ctx: &Context) -> Result<()> {
        let outcome = self
            .gate
            .get_or_init(|| async { self.connect_once(ctx).await.map_err(Arc::new) })
            .await;

        outcome.clone().map_err(Error::Shared)
    }

    async fn connect_once(&self, ctx: &Context) -> Result<()> {
        let mut slot = self.client.lock().await;

        let mut client = match self.cfg.kind {
            RedisType::Single => self
                .factory
                .single(&self.cfg.host, self.cfg.port)
                .map_err(|e| Error::CacheClientCreate {
                    kind: RedisType::Single.to_string(),
                    source: Box::new(e),
                })?,
            RedisType::Cluster => {
                self.factory
                    .cluster(&self.cfg.addrs)
                    .map_err(|e| Error::CacheClientCreate {
                        kind: RedisType::Cluster.to_string(),
                        source: Box::new(e),
                    })?
            }
            RedisType::Unknown(ref other) => return Err(Error::UnknownType(other.clone())),
        };

        client
            .connect(ctx)
            .await
            .map_err(|e| Error::CacheConnect(Box::new(e)))?;

        info!(
            "type" = %self.cfg.kind,
            host = %self.cfg.host,
            port = self.cfg.port,
            addrs = ?self.cfg.addrs,
            "successfully connected redis"
        );

        *slot = Some(client);
        Ok(())
    }

    /// Close the connected client
    ///
    /// A no-op when nothing is connected, including after a failed connect or
    /// a previous stop. Otherwise the client's close result is returned
    /// unchanged. Waits for an in-flight connect to finish.
    pub async fn stop(&self, ctx: &Context) -> Result<()> {
        info!(
            "type" = %self.cfg.kind,
            host = %self.cfg.host,
            port = self.cfg.port,
            addrs = ?self.cfg.addrs,
            "stopping redis"
        );

        let mut slot = self.client.lock().await;
        match slot.take() {
            Some(mut client) => client.close(ctx).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::redis::MockCacheClient;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        connected: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeClient {
        counters: Arc<Counters>,
        fail_connect: bool,
    }

    #[async_trait::async_trait]
    impl CacheClient for FakeClient {
        async fn connect(&mut self, _ctx: &Context) -> Result<()> {
            self.counters.connected.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_connect {
                return Err(Error::Other("connection refused".to_string()));
            }
            Ok(())
        }

        async fn close(&mut self, _ctx: &Context) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        counters: Arc<Counters>,
        fail_create: bool,
        fail_connect: bool,
    }

    impl FakeFactory {
        fn make(&self) -> Result<Box<dyn CacheClient>> {
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(Error::Other("bad address".to_string()));
            }
            Ok(Box::new(FakeClient {
                counters: self.counters.clone(),
                fail_connect: self.fail_connect,
            }))
        }
    }

    impl ClientFactory for FakeFactory {
        fn single(&self, _host: &str, _port: u16) -> Result<Box<dyn CacheClient>> {
            self.make()
        }

        fn cluster(&self, _addrs: &[String]) -> Result<Box<dyn CacheClient>> {
            self.make()
        }
    }

    /// Hands out one prepared client
    struct PreparedFactory(std::sync::Mutex<Option<Box<dyn CacheClient>>>);

    impl PreparedFactory {
        fn take(&self) -> Result<Box<dyn CacheClient>> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Other("already taken".to_string()))
        }
    }

    fn prepared(client: impl CacheClient + 'static) -> Arc<PreparedFactory> {
        let client: Box<dyn CacheClient> = Box::new(client);
        Arc::new(PreparedFactory(std::sync::Mutex::new(Some(client))))
    }

    impl ClientFactory for PreparedFactory {
        fn single(&self, _host: &str, _port: u16) -> Result<Box<dyn CacheClient>> {
            self.take()
        }

        fn cluster(&self, _addrs: &[String]) -> Result<Box<dyn CacheClient>> {
            self.take()
        }
    }

    fn service(cfg: RedisConfig, factory: Arc<dyn ClientFactory>) -> CacheService {
        CacheService::builder()
            .cfg(cfg)
            .factory(factory)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_cfg() {
        let err = CacheService::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("cfg is required"));
    }

    #[tokio::test]
    async fn test_build_stores_cfg_without_client() {
        let cfg = RedisConfig::of_type("single");
        let svc = CacheService::builder().cfg(cfg.clone()).build().unwrap();
        assert_eq!(svc.config(), &cfg);
        assert!(!svc.is_connected().await);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            ..Default::default()
        });
        let svc = service(RedisConfig::of_type("unknown"), factory);

        let err = svc.connect(&Context::background()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownType);
        assert!(matches!(err.root(), Error::UnknownType(t) if t == "unknown"));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_connects_run_once() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            ..Default::default()
        });
        let svc = Arc::new(service(RedisConfig::single("localhost", 6379), factory));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.connect(&Context::background()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.connected.load(Ordering::SeqCst), 1);
        assert!(svc.is_connected().await);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_error() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            fail_connect: true,
            ..Default::default()
        });
        let svc = Arc::new(service(RedisConfig::cluster(["a:7000"]), factory));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.connect(&Context::background()).await })
            })
            .collect();

        let mut errors = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Err(Error::Shared(err)) => errors.push(err),
                other => panic!("expected shared error, got {:?}", other),
            }
        }

        assert!(errors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.connected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_permanent() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            fail_connect: true,
            ..Default::default()
        });
        let svc = service(RedisConfig::single("localhost", 6379), factory);
        let ctx = Context::background();

        let first = svc.connect(&ctx).await.unwrap_err();
        let second = svc.connect(&ctx).await.unwrap_err();

        assert_eq!(
            first.to_string(),
            "error connecting to redis: other: connection refused"
        );
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(counters.connected.load(Ordering::SeqCst), 1);
        assert!(!svc.is_connected().await);
        svc.stop(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_failure_names_type() {
        let factory = Arc::new(FakeFactory {
            fail_create: true,
            ..Default::default()
        });
        let single = service(RedisConfig::single("localhost", 6379), factory.clone());
        let err = single.connect(&Context::background()).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("error creating redis client (single):"));

        let cluster = service(RedisConfig::cluster(["a:7000"]), factory);
        let err = cluster.connect(&Context::background()).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("error creating redis client (cluster):"));
    }

    #[tokio::test]
    async fn test_stop_never_connected() {
        let svc = CacheService::new(RedisConfig::single("localhost", 6379));
        svc.stop(&Context::background()).await.unwrap();
        svc.stop(&Context::background()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_once() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            ..Default::default()
        });
        let svc = service(RedisConfig::single("localhost", 6379), factory);
        let ctx = Context::background();

        svc.connect(&ctx).await.unwrap();
        svc.stop(&ctx).await.unwrap();
        svc.stop(&ctx).await.unwrap();

        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(!svc.is_connected().await);
    }

    #[tokio::test]
    async fn test_stop_during_connect_closes_new_client() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(FakeFactory {
            counters: counters.clone(),
            ..Default::default()
        });
        let svc = Arc::new(service(RedisConfig::single("localhost", 6379), factory));

        let connecting = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.connect(&Context::background()).await })
        };
        // The fake client counts the connect before it starts sleeping.
        while counters.connected.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        svc.stop(&Context::background()).await.unwrap();
        connecting.await.unwrap().unwrap();

        assert_eq!(counters.connected.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(!svc.is_connected().await);

        svc.stop(&Context::background()).await.unwrap();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_returns_close_error_verbatim() {
        let mut mock = MockCacheClient::new();
        mock.expect_connect().times(1).returning(|_| Ok(()));
        mock.expect_close()
            .times(1)
            .returning(|_| Err(Error::Other("close failed".to_string())));

        let svc = service(RedisConfig::single("localhost", 6379), prepared(mock));
        let ctx = Context::background();

        svc.connect(&ctx).await.unwrap();
        let err = svc.stop(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Other(ref m) if m == "close failed"));

        svc.stop(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_passes_context_through() {
        let mut mock = MockCacheClient::new();
        mock.expect_connect().returning(|_| Ok(()));
        mock.expect_close()
            .withf(|ctx: &Context| ctx.is_done())
            .times(1)
            .returning(|ctx| Err(ctx.err().unwrap_or(Error::Cancelled)));

        let svc = service(RedisConfig::cluster(["a:7000"]), prepared(mock));

        svc.connect(&Context::background()).await.unwrap();
        let ctx = Context::background();
        ctx.cancel();
        let err = svc.stop(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
