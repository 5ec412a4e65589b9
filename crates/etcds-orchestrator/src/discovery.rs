//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Cluster bootstrap through a shared discovery token.
//!
//! The token is fetched once, on the first `init`, and persisted next to the
//! certificates. Every later start reads it back; it is never regenerated,
//! because members started with a different token cannot find the running
//! cluster. Whether a stored token is still known to the rendezvous service
//! is not checked.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::time::Duration;

use etcds_common::CertStore;
use etcds_logging::{log_fleet_event, FleetEventOutcome, LogContext};
use reqwest::blocking::Client;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::DiscoveryError;

/// Identifier shared by every member bootstrapping into one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryToken(String);

impl DiscoveryToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscoveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rendezvous service handing out fresh tokens.
pub trait DiscoveryService {
    /// Request a new token for a cluster of `size` members.
    fn new_token(&self, size: usize) -> Result<String, DiscoveryError>;
}

/// `GET {endpoint}?size={n}` against an etcd discovery service.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    endpoint: String,
    client: Client,
}

impl HttpDiscovery {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DiscoveryError> {
        let endpoint = endpoint.into();
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DiscoveryError::Request {
                endpoint: endpoint.clone(),
                detail: err.to_string(),
            })?;
        Ok(Self { endpoint, client })
    }
}

impl DiscoveryService for HttpDiscovery {
    fn new_token(&self, size: usize) -> Result<String, DiscoveryError> {
        let request_failed = |detail: String| DiscoveryError::Request {
            endpoint: self.endpoint.clone(),
            detail,
        };
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("size", size)])
            .send()
            .map_err(|err| request_failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(request_failed(format!("status {status}")));
        }
        let body = response
            .text()
            .map_err(|err| request_failed(err.to_string()))?;
        let token = body.trim();
        if token.is_empty() {
            return Err(DiscoveryError::EmptyResponse {
                endpoint: self.endpoint.clone(),
            });
        }
        Ok(token.to_owned())
    }
}

/// Read the stored token, if any. Never contacts the discovery service.
pub fn read_discovery_token(store: &CertStore) -> Result<Option<DiscoveryToken>, DiscoveryError> {
    let path = store.discovery();
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let token = raw.trim();
            if token.is_empty() {
                return Err(DiscoveryError::EmptyToken(path));
            }
            Ok(Some(DiscoveryToken::new(token)))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DiscoveryError::Io { path, source }),
    }
}

/// Like [`read_discovery_token`], but a missing token is an error.
pub fn require_discovery_token(store: &CertStore) -> Result<DiscoveryToken, DiscoveryError> {
    read_discovery_token(store)?.ok_or_else(|| DiscoveryError::Missing(store.discovery()))
}

/// Return the stored token, fetching and persisting one on first use.
///
/// Persisting is create-if-absent: when two first runs race, the loser
/// discards its own token and returns the one already on disk.
pub fn ensure_discovery_token(
    store: &CertStore,
    service: &dyn DiscoveryService,
    size: usize,
) -> Result<DiscoveryToken, DiscoveryError> {
    if let Some(token) = read_discovery_token(store)? {
        debug!(path = %store.discovery().display(), "reusing discovery token");
        return Ok(token);
    }

    let fresh = service.new_token(size)?;
    let path = store.discovery();
    let io_err = |source: io::Error| DiscoveryError::Io {
        path: path.clone(),
        source,
    };
    store.ensure_dir().map_err(io_err)?;
    let mut staged = NamedTempFile::new_in(store.root()).map_err(io_err)?;
    staged
        .write_all(format!("{fresh}\n").as_bytes())
        .map_err(io_err)?;
    match staged.persist_noclobber(&path) {
        Ok(_) => {
            log_fleet_event(
                Some(&LogContext::new().with_operation("discovery")),
                "discovery.token",
                &format!("new discovery token stored at {}", path.display()),
                FleetEventOutcome::Success,
            );
            Ok(DiscoveryToken::new(fresh))
        }
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            log_fleet_event(
                Some(&LogContext::new().with_operation("discovery")),
                "discovery.token",
                "another run stored a token first; using it",
                FleetEventOutcome::Warning,
            );
            require_discovery_token(store)
        }
        Err(err) => Err(io_err(err.error)),
    }
}
