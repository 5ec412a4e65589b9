//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::path::PathBuf;

use etcds_common::ConfigError;
use etcds_security::CaWorkflowError;
use thiserror::Error;

/// Failures talking to a node's container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime endpoint did not answer. Reported per node.
    #[error("runtime at {endpoint} is unreachable for {node}: {detail}")]
    Unreachable {
        node: String,
        endpoint: String,
        detail: String,
    },
    /// The runtime refused to start the container.
    #[error("launch rejected at {node}: {detail}")]
    Launch { node: String, detail: String },
    #[error("`docker {command}` failed at {node}: {detail}")]
    Command {
        node: String,
        command: String,
        detail: String,
    },
    #[error("unable to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected listing from {node}: {detail}")]
    Parse { node: String, detail: String },
}

impl RuntimeError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RuntimeError::Unreachable { .. })
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery request to {endpoint} failed: {detail}")]
    Request { endpoint: String, detail: String },
    #[error("discovery service at {endpoint} returned an empty token")]
    EmptyResponse { endpoint: String },
    #[error("discovery token file {0} is empty")]
    EmptyToken(PathBuf),
    #[error("no discovery token at {0}; run init first")]
    Missing(PathBuf),
    #[error("unable to access discovery token {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("key '{0}' is not of the form node:path")]
    BadKey(String),
    #[error("unable to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to load client credentials {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS setup for {node} failed: {detail}")]
    Tls { node: String, detail: String },
    #[error("request to {url} failed: {detail}")]
    Request { url: String, detail: String },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unable to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed for host {host}: {detail}")]
    Remote {
        host: String,
        command: String,
        detail: String,
    },
    #[error("local file {0} is missing; run init first")]
    MissingLocal(PathBuf),
}

/// Umbrella error for fleet operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    CaWorkflow(#[from] CaWorkflowError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("certificate bundle for {node} is incomplete ({path} missing); run init")]
    MissingCertificate { node: String, path: PathBuf },
}

impl FleetError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FleetError::Runtime(err) if err.is_unreachable())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
