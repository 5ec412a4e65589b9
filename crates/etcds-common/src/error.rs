//! ---
//! etcds_section: "01-core-functionality"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Shared primitives and utilities for the fleet tooling."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Inventory and settings failures. Always fatal for the invocation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("inventory {0} not found")]
    InventoryMissing(PathBuf),
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed inventory {path}: {source}")]
    MalformedInventory {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("node '{node}' in {path} has no ip")]
    MissingAddress { node: String, path: PathBuf },
    #[error("inventory {0} declares no nodes")]
    EmptyInventory(PathBuf),
    #[error("node name '{0}' is reserved for the client identity")]
    ReservedName(String),
    #[error("malformed settings {path}: {source}")]
    MalformedSettings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
}
