//! Concrete Redis clients
//!
//! [`CacheClient`] is the capability the cache service drives: connect once,
//! close on shutdown. [`SingleClient`] talks to one node through a
//! [`ConnectionManager`]; [`ClusterClient`] talks to a cluster through an async
//! cluster connection. Both prove reachability with `PING` before reporting
//! success.

use async_trait::async_trait;
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::cluster::ClusterClient as RedisClusterClient;
use ::redis::cluster_async::ClusterConnection;
use tracing::debug;

use crate::context::Context;
use crate::errors::Result;

/// Connect/close capability of a concrete Redis client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Open the connection and verify it with `PING`
    async fn connect(&mut self, ctx: &Context) -> Result<()>;

    /// Release the connection; closing an unconnected client is a no-op
    async fn close(&mut self, ctx: &Context) -> Result<()>;
}

/// Constructs concrete clients for the cache service
pub trait ClientFactory: Send + Sync {
    /// Client for a single node at `host:port`
    fn single(&self, host: &str, port: u16) -> Result<Box<dyn CacheClient>>;

    /// Client for a cluster seeded with `addrs` (`host:port` each)
    fn cluster(&self, addrs: &[String]) -> Result<Box<dyn CacheClient>>;
}

/// Factory producing real Redis clients
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisClientFactory;

impl ClientFactory for RedisClientFactory {
    fn single(&self, host: &str, port: u16) -> Result<Box<dyn CacheClient>> {
        Ok(Box::new(SingleClient::new(host, port)?))
    }

    fn cluster(&self, addrs: &[String]) -> Result<Box<dyn CacheClient>> {
        Ok(Box::new(ClusterClient::new(addrs)?))
    }
}

fn node_url(addr: &str) -> String {
    format!("redis://{}/", addr)
}

/// Single-node client
pub struct SingleClient {
    url: String,
    client: ::redis::Client,
    conn: Option<ConnectionManager>,
}

impl SingleClient {
    /// Parse the address; no I/O happens until [`CacheClient::connect`]
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let url = node_url(&format!("{}:{}", host, port));
        let client = ::redis::Client::open(url.as_str())?;
        Ok(Self {
            url,
            client,
            conn: None,
        })
    }

    /// Connection URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a connection is held
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl std::fmt::Debug for SingleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleClient")
            .field("url", &self.url)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

#[async_trait]
impl CacheClient for SingleClient {
    async fn connect(&mut self, ctx: &Context) -> Result<()> {
        let client = self.client.clone();
        let conn = ctx
            .run(async move {
                // Reconnects are left to the caller.
                let config = ConnectionManagerConfig::new().set_number_of_retries(0);
                let mut conn = ConnectionManager::new_with_config(client, config).await?;
                let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
                Ok(conn)
            })
            .await?;

        debug!(url = %self.url, "redis node answered PING");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self, _ctx: &Context) -> Result<()> {
        drop(self.conn.take());
        Ok(())
    }
}

/// Cluster client
pub struct ClusterClient {
    nodes: Vec<String>,
    client: RedisClusterClient,
    conn: Option<ClusterConnection>,
}

impl ClusterClient {
    /// Parse the seed nodes; no I/O happens until [`CacheClient::connect`]
    pub fn new(addrs: &[String]) -> Result<Self> {
        let nodes: Vec<String> = addrs.iter().map(|addr| node_url(addr)).collect();
        let client = RedisClusterClient::new(nodes.clone())?;
        Ok(Self {
            nodes,
            client,
            conn: None,
        })
    }

    /// Seed node URLs
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Whether a connection is held
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("nodes", &self.nodes)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

#[async_trait]
impl CacheClient for ClusterClient {
    async fn connect(&mut self, ctx: &Context) -> Result<()> {
        let client = self.client.clone();
        let conn = ctx
            .run(async move {
                let mut conn = client.get_async_connection().await?;
                let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
                Ok(conn)
            })
            .await?;

        debug!(nodes = ?self.nodes, "redis cluster answered PING");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self, _ctx: &Context) -> Result<()> {
        drop(self.conn.take());
        Ok(())
    }
}
