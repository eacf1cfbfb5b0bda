//! Wire models for the Vault API

use serde::{Deserialize, Serialize};

/// Response of `GET /v1/sys/health`
///
/// Only the fields the bootstrap layer reports on are required; the rest are
/// optional so that older and newer Vault versions both decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Whether the node has been initialised
    #[serde(default)]
    pub initialized: bool,
    /// Whether the node is sealed
    pub sealed: bool,
    /// Whether the node is a standby
    #[serde(default)]
    pub standby: bool,
    /// Whether the node is a performance standby (enterprise)
    #[serde(default)]
    pub performance_standby: bool,
    /// Server time, seconds since epoch
    #[serde(default)]
    pub server_time_utc: Option<i64>,
    /// Vault version string
    pub version: String,
    /// Cluster name
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Cluster id
    #[serde(default)]
    pub cluster_id: Option<String>,
}
