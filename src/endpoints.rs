//! Vault API endpoint URL construction

/// Vault API v1 base path
pub const API_V1_BASE: &str = "/v1";

/// Query parameters that make `sys/health` answer 2xx for every node state
/// a client can still talk to (standby, sealed, uninitialised, DR secondary,
/// performance standby), so reachability is judged on transport alone.
pub const HEALTH_QUERY: &[(&str, &str)] = &[
    ("standbyok", "true"),
    ("perfstandbyok", "true"),
    ("uninitcode", "299"),
    ("sealedcode", "299"),
    ("standbycode", "299"),
    ("drsecondarycode", "299"),
    ("performancestandbycode", "299"),
];

/// Endpoint builder
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    /// Create a new endpoints builder
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /v1/sys/health`
    pub fn health(&self) -> String {
        self.url(&format!("{}/sys/health", API_V1_BASE))
    }
}
