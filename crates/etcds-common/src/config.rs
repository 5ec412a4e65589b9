//! ---
//! etcds_section: "01-core-functionality"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Shared primitives and utilities for the fleet tooling."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use etcds_logging::LogFormat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::store::CertStore;

fn default_certs_dir() -> PathBuf {
    PathBuf::from("./certs")
}

fn default_image() -> String {
    "quay.io/coreos/etcd".to_owned()
}

fn default_container_name() -> String {
    "etcd".to_owned()
}

fn default_label_base() -> String {
    "com.s21g.etcds".to_owned()
}

fn default_docker_port() -> u16 {
    2376
}

fn default_host_certs_dir() -> PathBuf {
    PathBuf::from("/etc/docker/certs.d")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/etcd")
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

fn default_election_timeout_ms() -> u64 {
    2500
}

fn default_discovery_endpoint() -> String {
    "https://discovery.etcd.io/new".to_owned()
}

/// Tool settings. Every field has a default, so the file is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_certs_dir")]
    pub certs_dir: PathBuf,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`FleetConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedFleetConfig {
    pub config: FleetConfig,
    /// `None` when no settings file was found and defaults apply.
    pub source: Option<PathBuf>,
}

impl FleetConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ETCDS_CONFIG";
    pub const DEFAULT_PATH: &'static str = "etcds.toml";

    /// Load settings: the explicit path, then `ETCDS_CONFIG`, then `etcds.toml`.
    ///
    /// An explicitly named file must exist; the default file may be absent.
    pub fn load_with_source(explicit: Option<&Path>) -> Result<LoadedFleetConfig> {
        let from_env = std::env::var_os(Self::ENV_CONFIG_PATH).map(PathBuf::from);
        Self::load_from(explicit, from_env)
    }

    fn load_from(explicit: Option<&Path>, from_env: Option<PathBuf>) -> Result<LoadedFleetConfig> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| from_env.filter(|path| !path.as_os_str().is_empty()));
        if let Some(path) = named {
            let config = Self::from_path(&path)?;
            return Ok(LoadedFleetConfig {
                config,
                source: Some(path),
            });
        }
        let fallback = PathBuf::from(Self::DEFAULT_PATH);
        if fallback.exists() {
            let config = Self::from_path(&fallback)?;
            return Ok(LoadedFleetConfig {
                config,
                source: Some(fallback),
            });
        }
        Ok(LoadedFleetConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading settings");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<FleetConfig>(&contents).map_err(|source| {
            ConfigError::MalformedSettings {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Certificate store rooted at `certs_dir`.
    pub fn store(&self) -> CertStore {
        CertStore::new(&self.certs_dir)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.image.trim().is_empty() {
            return Err(ConfigError::Invalid("runtime.image cannot be empty".into()));
        }
        if self.runtime.container_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.container_name cannot be empty".into(),
            ));
        }
        if self.runtime.docker_port == 0 {
            return Err(ConfigError::Invalid("runtime.docker_port cannot be 0".into()));
        }
        self.timing.validate()?;
        if self.discovery.size == Some(0) {
            return Err(ConfigError::Invalid("discovery.size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            certs_dir: default_certs_dir(),
            runtime: RuntimeConfig::default(),
            timing: TimingConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for FleetConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: FleetConfig =
            toml::from_str(content).map_err(|source| ConfigError::MalformedSettings {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

/// How node containers are launched and where the runtime lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Prefix of the label identifying managed containers (`{label_base}.name`).
    #[serde(default = "default_label_base")]
    pub label_base: String,
    #[serde(default = "default_docker_port")]
    pub docker_port: u16,
    #[serde(default)]
    pub docker_tls_verify: bool,
    #[serde(default)]
    pub docker_cert_path: Option<PathBuf>,
    /// Trust directory on each host, mounted into the container as `/certs`.
    #[serde(default = "default_host_certs_dir")]
    pub host_certs_dir: PathBuf,
    /// Persistent data directory, same path on host and in the container.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl RuntimeConfig {
    /// Full label key carrying the owning node name.
    pub fn name_label(&self) -> String {
        format!("{}.name", self.label_base)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            container_name: default_container_name(),
            label_base: default_label_base(),
            docker_port: default_docker_port(),
            docker_tls_verify: false,
            docker_cert_path: None,
            host_certs_dir: default_host_certs_dir(),
            data_dir: default_data_dir(),
        }
    }
}

/// Raft timing handed to every member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,
}

impl TimingConfig {
    /// etcd refuses to start unless the election timeout exceeds five heartbeats.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.heartbeat_interval_ms cannot be 0".into(),
            ));
        }
        let floor = self.heartbeat_interval_ms.checked_mul(5).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "timing.heartbeat_interval_ms ({}) is out of range",
                self.heartbeat_interval_ms
            ))
        })?;
        if self.election_timeout_ms <= floor {
            return Err(ConfigError::Invalid(format!(
                "timing.election_timeout_ms ({}) must exceed 5x heartbeat ({})",
                self.election_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            election_timeout_ms: default_election_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_endpoint")]
    pub endpoint: String,
    /// Expected cluster size; the inventory size when unset.
    #[serde(default)]
    pub size: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_discovery_endpoint(),
            size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: FleetConfig = "".parse().unwrap();
        assert_eq!(config.certs_dir, PathBuf::from("./certs"));
        assert_eq!(config.runtime.image, "quay.io/coreos/etcd");
        assert_eq!(config.runtime.name_label(), "com.s21g.etcds.name");
        assert_eq!(config.runtime.docker_port, 2376);
        assert_eq!(config.timing.heartbeat_interval_ms, 100);
        assert_eq!(config.timing.election_timeout_ms, 2500);
        assert_eq!(config.discovery.size, None);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: FleetConfig = r#"
certs_dir = "/srv/etcds/certs"

[runtime]
image = "quay.io/coreos/etcd:v2.3.8"

[logging]
format = "json"
"#
        .parse()
        .unwrap();
        assert_eq!(config.store().root(), Path::new("/srv/etcds/certs"));
        assert_eq!(config.runtime.image, "quay.io/coreos/etcd:v2.3.8");
        assert_eq!(config.runtime.container_name, "etcd");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn election_timeout_must_exceed_five_heartbeats() {
        let err = "[timing]\nheartbeat_interval_ms = 100\nelection_timeout_ms = 500\n"
            .parse::<FleetConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("5x heartbeat"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = FleetConfig::load_with_source(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etcds.toml");
        fs::write(&path, "[discovery]\nsize = 3\n").unwrap();
        let loaded = FleetConfig::load_with_source(Some(&path)).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.discovery.size, Some(3));
    }

    #[test]
    fn oversized_heartbeat_is_rejected() {
        let err = "[timing]\nheartbeat_interval_ms = 4611686018427387904\n"
            .parse::<FleetConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("out of range")));
    }

    #[test]
    fn explicit_path_wins_over_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("env.toml");
        let flag_path = dir.path().join("flag.toml");
        fs::write(&env_path, "[discovery]\nsize = 1\n").unwrap();
        fs::write(&flag_path, "[discovery]\nsize = 5\n").unwrap();

        let loaded = FleetConfig::load_from(Some(&flag_path), Some(env_path.clone())).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(flag_path.as_path()));
        assert_eq!(loaded.config.discovery.size, Some(5));

        let loaded = FleetConfig::load_from(None, Some(env_path.clone())).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(env_path.as_path()));
        assert_eq!(loaded.config.discovery.size, Some(1));
    }
}
