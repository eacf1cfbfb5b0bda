//! Error types for the bootstrap layer
//!
//! Every failure raised while building or tearing down the Vault and Redis
//! clients is reported through [`Error`]. Messages carry a short, greppable
//! prefix naming the subsystem (`config:`, `vault:`, `error creating redis
//! client (...)`) so that a fatal bootstrap log line points straight at the
//! failing piece.
//!
//! # Error Categories
//!
//! - **Config**: a required field is missing or a pairing rule is violated.
//!   Always detected before any I/O.
//! - **FileNotFound**: a referenced TLS artifact does not exist on disk.
//! - **Tls**: TLS material exists but could not be loaded.
//! - **Connection**: the health handshake or client construction failed.
//! - **UnknownType**: an unrecognised Redis deployment type reached runtime.
//! - **Cancelled / DeadlineExceeded**: the caller's [`Context`](crate::Context)
//!   was done.
//!
//! # Example
//!
//! ```
//! use auth_bootstrap::{ErrorKind, VaultClient};
//!
//! let err = VaultClient::builder().token("t").build().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Config);
//! assert!(err.to_string().contains("address is required"));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying cause
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Kind of TLS artifact referenced by a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// Trusted CA bundle used to verify the server
    CaCertificate,
    /// Client certificate presented for mutual TLS
    ClientCertificate,
    /// Private key matching the client certificate
    ClientKey,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Artifact::CaCertificate => "CA certificate",
            Artifact::ClientCertificate => "client certificate",
            Artifact::ClientKey => "client key",
        })
    }
}

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("config: {0}")]
    Config(String),

    /// A referenced TLS artifact does not exist
    #[error("vault: {kind} file not found: {}", path.display())]
    FileNotFound {
        /// Which artifact was missing
        kind: Artifact,
        /// Absolute path that was checked
        path: PathBuf,
    },

    /// A TLS artifact path could not be made absolute
    #[error("vault: error resolving {kind} path: {source}")]
    ResolvePath {
        /// Which artifact was being resolved
        kind: Artifact,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TLS material could not be loaded
    #[error("vault: error configuring TLS: {0}")]
    Tls(String),

    /// The HTTP client for Vault could not be built
    #[error("vault: error creating client: {0}")]
    ClientBuild(String),

    /// The Vault health handshake failed
    #[error("vault: failed to connect to vault at {address}: {source}")]
    Connection {
        /// Target address
        address: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// A concrete Redis client could not be constructed
    #[error("error creating redis client ({kind}): {source}")]
    CacheClientCreate {
        /// Deployment type being constructed (`single` or `cluster`)
        kind: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// The concrete Redis client failed to connect
    #[error("error connecting to redis: {0}")]
    CacheConnect(#[source] Box<Error>),

    /// Unrecognised Redis deployment type
    #[error("unknown redis type: {0}")]
    UnknownType(String),

    /// Redis driver error
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// The caller's context was cancelled
    #[error("context canceled")]
    Cancelled,

    /// The caller's context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// An outcome recorded once and handed to every caller
    #[error(transparent)]
    Shared(Arc<Error>),

    /// Other errors
    #[error("other: {0}")]
    Other(String),
}

/// Error categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing field or violated pairing rule
    Config,
    /// Referenced TLS artifact missing
    FileNotFound,
    /// TLS material unusable
    Tls,
    /// Backing store unreachable or client construction failed
    Connection,
    /// Unrecognised Redis deployment type
    UnknownType,
    /// Caller cancelled
    Cancelled,
    /// Caller deadline passed
    DeadlineExceeded,
    /// Other/unknown error
    Other,
}

impl Error {
    /// Get the error kind for categorization
    ///
    /// Wrapping variants report the kind of what they wrap, except that a
    /// failed Redis connect is always a connection problem.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::FileNotFound { .. } => ErrorKind::FileNotFound,
            Error::ResolvePath { .. } => ErrorKind::FileNotFound,
            Error::Tls(_) => ErrorKind::Tls,
            Error::ClientBuild(_) | Error::Connection { .. } | Error::Redis(_) => {
                ErrorKind::Connection
            }
            Error::CacheClientCreate { .. } | Error::CacheConnect(_) => ErrorKind::Connection,
            Error::UnknownType(_) => ErrorKind::UnknownType,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Shared(inner) => inner.kind(),
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if the error is retryable
    ///
    /// Nothing in this crate retries on its own and no failure is classified
    /// as transient; retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Innermost error, looking through shared and wrapping variants
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            Error::CacheClientCreate { source, .. } => source.root(),
            Error::CacheConnect(source) => source.root(),
            other => other,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
