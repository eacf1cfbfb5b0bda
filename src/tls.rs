//! TLS material for the Vault client
//!
//! Paths to PEM files are resolved against the process working directory and
//! checked for existence before anything is loaded. The resolved, absolute
//! paths are what gets stored and logged.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use reqwest::ClientBuilder as HttpClientBuilder;
use tracing::debug;

use crate::errors::{Artifact, Error, Result};

/// Resolve `path` to an absolute path and make sure it exists
///
/// Relative paths are joined onto the current working directory, and the
/// result is cleaned lexically: `.` segments are dropped and `..` removes the
/// segment before it. Symlinks are not followed.
///
/// # Errors
///
/// * `Error::ResolvePath` if the working directory cannot be determined
/// * `Error::FileNotFound` if nothing exists at the resolved path
pub fn resolve_path(path: impl AsRef<Path>, kind: Artifact) -> Result<PathBuf> {
    let path = path.as_ref();
    let abs = if path.is_absolute() {
        clean(path)
    } else {
        let cwd = std::env::current_dir().map_err(|source| Error::ResolvePath { kind, source })?;
        clean(&cwd.join(path))
    };

    match fs::metadata(&abs) {
        Err(e) if e.kind() == IoErrorKind::NotFound => Err(Error::FileNotFound { kind, path: abs }),
        _ => Ok(abs),
    }
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // `..` at the root stays at the root
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    let _ = out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolved client certificate and key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentityPaths {
    /// Client certificate (PEM)
    pub cert: PathBuf,
    /// Client private key (PEM)
    pub key: PathBuf,
}

/// TLS settings assembled for one connection attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Skip server certificate verification
    pub insecure: bool,
    /// Trusted CA bundle
    pub ca_path: Option<PathBuf>,
    /// Client certificate pair for mutual TLS
    pub identity: Option<ClientIdentityPaths>,
}

impl TlsMaterial {
    /// Resolve and validate the configured TLS paths
    ///
    /// Empty strings mean "not configured". The certificate and key are
    /// checked for pairing again here even though the builder already did.
    pub fn assemble(insecure: bool, ca_path: &str, cert_path: &str, key_path: &str) -> Result<Self> {
        let mut material = TlsMaterial {
            insecure,
            ..Default::default()
        };

        if !ca_path.is_empty() {
            let ca = resolve_path(ca_path, Artifact::CaCertificate)?;
            debug!(ca_path = %ca.display(), "using CA certificate for server verification");
            material.ca_path = Some(ca);
        }

        let has_cert = !cert_path.is_empty();
        let has_key = !key_path.is_empty();
        if has_cert != has_key {
            return Err(Error::config("client certificate and key must be provided together"));
        }

        if has_cert {
            let cert = resolve_path(cert_path, Artifact::ClientCertificate)?;
            let key = resolve_path(key_path, Artifact::ClientKey)?;
            debug!(
                client_cert = %cert.display(),
                client_key = %key.display(),
                "using client certificate and key"
            );
            material.identity = Some(ClientIdentityPaths { cert, key });
        }

        Ok(material)
    }

    /// Whether any TLS customisation was requested
    ///
    /// When nothing is set the HTTP client keeps its stock TLS behaviour,
    /// including full server verification against the built-in roots.
    pub fn is_custom(&self) -> bool {
        self.insecure || self.ca_path.is_some() || self.identity.is_some()
    }

    /// Apply the material to an HTTP client builder
    pub fn apply(&self, builder: HttpClientBuilder) -> Result<HttpClientBuilder> {
        if !self.is_custom() {
            return Ok(builder);
        }

        let mut builder = builder.danger_accept_invalid_certs(self.insecure);

        if let Some(ca_path) = &self.ca_path {
            let pem = read_pem(ca_path, Artifact::CaCertificate)?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| Error::Tls(format!("invalid CA certificate {}: {}", ca_path.display(), e)))?;
            if certs.is_empty() {
                return Err(Error::Tls(format!(
                    "no certificates found in CA certificate {}",
                    ca_path.display()
                )));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(identity) = &self.identity {
            builder = apply_identity(builder, identity)?;
        }

        Ok(builder)
    }
}

fn read_pem(path: &Path, kind: Artifact) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("reading {} {}: {}", kind, path.display(), e)))
}

#[cfg(feature = "rustls-tls")]
fn apply_identity(builder: HttpClientBuilder, paths: &ClientIdentityPaths) -> Result<HttpClientBuilder> {
    let mut pem = read_pem(&paths.cert, Artifact::ClientCertificate)?;
    pem.push(b'\n');
    pem.extend(read_pem(&paths.key, Artifact::ClientKey)?);

    let identity = reqwest::Identity::from_pem(&pem)
        .map_err(|e| Error::Tls(format!("invalid client certificate or key: {}", e)))?;
    Ok(builder.use_rustls_tls().identity(identity))
}

#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
fn apply_identity(builder: HttpClientBuilder, paths: &ClientIdentityPaths) -> Result<HttpClientBuilder> {
    let cert = read_pem(&paths.cert, Artifact::ClientCertificate)?;
    let key = read_pem(&paths.key, Artifact::ClientKey)?;

    let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
        .map_err(|e| Error::Tls(format!("invalid client certificate or key: {}", e)))?;
    Ok(builder.identity(identity))
}
