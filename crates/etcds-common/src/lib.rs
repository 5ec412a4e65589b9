//! ---
//! etcds_section: "01-core-functionality"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Shared primitives and utilities for the fleet tooling."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Core shared primitives for the etcds workspace.
//! This crate exposes settings loading, the node inventory, and the
//! certificate store layout consumed across the workspace.

pub mod config;
pub mod error;
pub mod inventory;
pub mod store;

pub use config::{
    DiscoveryConfig, FleetConfig, LoadedFleetConfig, LoggingConfig, RuntimeConfig, TimingConfig,
};
pub use error::ConfigError;
pub use inventory::{Inventory, NodeSpec, CLIENT_PORT, PEER_PORT};
pub use store::{CertStore, CLIENT_IDENTITY};
