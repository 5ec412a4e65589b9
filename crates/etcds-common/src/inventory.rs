//! ---
//! etcds_section: "01-core-functionality"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Shared primitives and utilities for the fleet tooling."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Static node inventory. Loaded once per invocation and never mutated.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::store::CLIENT_IDENTITY;

/// Default inventory file, relative to the working directory.
pub const DEFAULT_INVENTORY: &str = "etcds.yml";
/// Environment override for the inventory path.
pub const ENV_INVENTORY_PATH: &str = "ETCDS_INVENTORY";
/// Port etcd serves clients on.
pub const CLIENT_PORT: u16 = 2379;
/// Port etcd peers talk to each other on.
pub const PEER_PORT: u16 = 2380;

/// One cluster member as declared by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Unique key, stable for the lifetime of the cluster.
    pub name: String,
    /// Network-reachable IP or hostname.
    pub address: String,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// URL clients use to reach this node.
    pub fn client_url(&self) -> String {
        format!("https://{}:{}", self.address, CLIENT_PORT)
    }

    /// URL other members use to reach this node.
    pub fn peer_url(&self) -> String {
        format!("https://{}:{}", self.address, PEER_PORT)
    }

    /// Endpoint of the container runtime managing this node.
    pub fn docker_host(&self, port: u16) -> String {
        format!("tcp://{}:{}", self.address, port)
    }
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    ip: Option<String>,
}

/// Read-only mapping from node name to [`NodeSpec`], in file order.
#[derive(Debug, Clone)]
pub struct Inventory {
    source: PathBuf,
    nodes: IndexMap<String, NodeSpec>,
}

impl Inventory {
    /// Pick the inventory path: explicit flag, then `ETCDS_INVENTORY`, then `etcds.yml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(ENV_INVENTORY_PATH) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_INVENTORY),
        }
    }

    /// Load and validate an inventory file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::InventoryMissing(path.to_path_buf()));
        }
        debug!(inventory = %path.display(), "loading inventory");
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw, path)
    }

    /// Parse inventory YAML; `source` is only used for diagnostics.
    pub fn from_yaml_str(raw: &str, source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref().to_path_buf();
        let parsed: Option<IndexMap<String, RawNode>> =
            serde_yaml::from_str(raw).map_err(|err| ConfigError::MalformedInventory {
                path: source.clone(),
                source: err,
            })?;
        let parsed = parsed.unwrap_or_default();
        if parsed.is_empty() {
            return Err(ConfigError::EmptyInventory(source));
        }

        let mut nodes = IndexMap::with_capacity(parsed.len());
        for (name, node) in parsed {
            if name == CLIENT_IDENTITY {
                return Err(ConfigError::ReservedName(name));
            }
            let address = node
                .ip
                .map(|ip| ip.trim().to_owned())
                .filter(|ip| !ip.is_empty())
                .ok_or_else(|| ConfigError::MissingAddress {
                    node: name.clone(),
                    path: source.clone(),
                })?;
            nodes.insert(name.clone(), NodeSpec::new(name, address));
        }
        Ok(Self { source, nodes })
    }

    /// Where this inventory was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn get(&self, name: &str) -> Result<&NodeSpec> {
        self.nodes
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNode(name.to_owned()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve operator-supplied names. Unknown names fail the whole selection.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&NodeSpec>> {
        names.iter().map(|name| self.get(name.as_ref())).collect()
    }

    /// Like [`Inventory::select`], but an empty list means every node.
    pub fn select_or_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&NodeSpec>> {
        if names.is_empty() {
            Ok(self.nodes().collect())
        } else {
            self.select(names)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODES: &str = "a:\n  ip: 10.0.0.1\nb:\n  ip: 10.0.0.2\n  zone: east\n";

    #[test]
    fn parses_nodes_in_file_order_and_ignores_extra_fields() {
        let inventory = Inventory::from_yaml_str(TWO_NODES, "etcds.yml").unwrap();
        assert_eq!(inventory.names().collect::<Vec<_>>(), vec!["a", "b"]);
        let b = inventory.get("b").unwrap();
        assert_eq!(b.address, "10.0.0.2");
        assert_eq!(b.client_url(), "https://10.0.0.2:2379");
        assert_eq!(b.peer_url(), "https://10.0.0.2:2380");
        assert_eq!(b.docker_host(2376), "tcp://10.0.0.2:2376");
    }

    #[test]
    fn missing_ip_is_rejected() {
        let err = Inventory::from_yaml_str("a:\n  zone: east\n", "etcds.yml").unwrap_err();
        assert!(matches!(err, ConfigError::MissingAddress { ref node, .. } if node == "a"));
    }

    #[test]
    fn malformed_and_empty_inventories_are_rejected() {
        assert!(matches!(
            Inventory::from_yaml_str("- a\n- b\n", "etcds.yml").unwrap_err(),
            ConfigError::MalformedInventory { .. }
        ));
        assert!(matches!(
            Inventory::from_yaml_str("", "etcds.yml").unwrap_err(),
            ConfigError::EmptyInventory(_)
        ));
    }

    #[test]
    fn client_name_is_reserved() {
        let err = Inventory::from_yaml_str("client:\n  ip: 10.0.0.9\n", "etcds.yml").unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Inventory::load(dir.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::InventoryMissing(_)));
    }

    #[test]
    fn select_rejects_unknown_names() {
        let inventory = Inventory::from_yaml_str(TWO_NODES, "etcds.yml").unwrap();
        assert_eq!(inventory.select_or_all::<&str>(&[]).unwrap().len(), 2);
        assert!(matches!(
            inventory.select(&["a", "z"]).unwrap_err(),
            ConfigError::UnknownNode(name) if name == "z"
        ));
    }

    #[test]
    fn explicit_path_wins_over_default() {
        let path = Inventory::resolve_path(Some(Path::new("other.yml")));
        assert_eq!(path, PathBuf::from("other.yml"));
    }
}
