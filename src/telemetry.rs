//! Logging setup

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;
use crate::errors::{Error, Result};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing: {}", e)))
}
