//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use etcds_common::{FleetConfig, NodeSpec, CLIENT_PORT, PEER_PORT};

use crate::discovery::DiscoveryToken;

/// Where the host trust directory is mounted inside the container.
pub const CONTAINER_CERTS_DIR: &str = "/certs";

/// Fully resolved description of one member container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub container_name: String,
    /// `(host, container)` port pairs.
    pub ports: Vec<(u16, u16)>,
    pub env: Vec<(String, String)>,
    /// `(host, container)` bind mounts.
    pub volumes: Vec<(PathBuf, PathBuf)>,
    pub labels: Vec<(String, String)>,
    /// Arguments handed to the etcd entrypoint.
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Resolve the launch description for `node` joining the cluster behind `token`.
    pub fn for_node(node: &NodeSpec, config: &FleetConfig, token: &DiscoveryToken) -> Self {
        let runtime = &config.runtime;
        let cert = |suffix: &str| format!("{CONTAINER_CERTS_DIR}/{}.{suffix}", node.name);
        let env = vec![
            ("ETCD_TRUSTED_CA_FILE", cert("ca.crt")),
            ("ETCD_CERT_FILE", cert("crt")),
            ("ETCD_KEY_FILE", cert("key")),
            ("ETCD_CLIENT_CERT_AUTH", "1".to_owned()),
            ("ETCD_PEER_TRUSTED_CA_FILE", cert("ca.crt")),
            ("ETCD_PEER_CERT_FILE", cert("crt")),
            ("ETCD_PEER_KEY_FILE", cert("key")),
            ("ETCD_PEER_CLIENT_CERT_AUTH", "1".to_owned()),
            (
                "ETCD_HEARTBEAT_INTERVAL",
                config.timing.heartbeat_interval_ms.to_string(),
            ),
            (
                "ETCD_ELECTION_TIMEOUT",
                config.timing.election_timeout_ms.to_string(),
            ),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();

        let data_dir = runtime.data_dir.display().to_string();
        let args = [
            ("-name", node.name.clone()),
            ("-data-dir", data_dir),
            ("-listen-client-urls", format!("https://0.0.0.0:{CLIENT_PORT}")),
            ("-listen-peer-urls", format!("https://0.0.0.0:{PEER_PORT}")),
            ("-advertise-client-urls", node.client_url()),
            ("-initial-advertise-peer-urls", node.peer_url()),
            ("-discovery", token.as_str().to_owned()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_owned(), value])
        .collect();

        Self {
            image: runtime.image.clone(),
            container_name: runtime.container_name.clone(),
            ports: vec![(CLIENT_PORT, CLIENT_PORT), (PEER_PORT, PEER_PORT)],
            env,
            volumes: vec![
                (
                    runtime.host_certs_dir.clone(),
                    PathBuf::from(CONTAINER_CERTS_DIR),
                ),
                (runtime.data_dir.clone(), runtime.data_dir.clone()),
            ],
            labels: vec![(runtime.name_label(), node.name.clone())],
            args,
        }
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value following `flag` in the entrypoint arguments.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    /// Arguments for `docker`, starting with `run -d`.
    pub fn to_run_args(&self) -> Vec<String> {
        let mut out = vec![
            "run".to_owned(),
            "-d".to_owned(),
            "--name".to_owned(),
            self.container_name.clone(),
        ];
        for (host, container) in &self.ports {
            out.push("-p".to_owned());
            out.push(format!("{host}:{container}"));
        }
        for (key, value) in &self.env {
            out.push("-e".to_owned());
            out.push(format!("{key}={value}"));
        }
        for (host, container) in &self.volumes {
            out.push("-v".to_owned());
            out.push(format!("{}:{}", display(host), display(container)));
        }
        for (key, value) in &self.labels {
            out.push("-l".to_owned());
            out.push(format!("{key}={value}"));
        }
        out.push(self.image.clone());
        out.extend(self.args.iter().cloned());
        out
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        let token = DiscoveryToken::new("https://discovery.etcd.io/abc123");
        LaunchSpec::for_node(
            &NodeSpec::new("a", "10.0.0.1"),
            &FleetConfig::default(),
            &token,
        )
    }

    #[test]
    fn launch_spec_wires_certificates_and_timing() {
        let spec = spec();
        assert_eq!(spec.env_value("ETCD_TRUSTED_CA_FILE"), Some("/certs/a.ca.crt"));
        assert_eq!(spec.env_value("ETCD_PEER_KEY_FILE"), Some("/certs/a.key"));
        assert_eq!(spec.env_value("ETCD_CLIENT_CERT_AUTH"), Some("1"));
        assert_eq!(spec.env_value("ETCD_HEARTBEAT_INTERVAL"), Some("100"));
        assert_eq!(spec.env_value("ETCD_ELECTION_TIMEOUT"), Some("2500"));
        assert_eq!(
            spec.labels,
            vec![("com.s21g.etcds.name".to_owned(), "a".to_owned())]
        );
    }

    #[test]
    fn launch_spec_advertises_node_address_and_token() {
        let spec = spec();
        assert_eq!(spec.arg_value("-name"), Some("a"));
        assert_eq!(spec.arg_value("-listen-client-urls"), Some("https://0.0.0.0:2379"));
        assert_eq!(spec.arg_value("-advertise-client-urls"), Some("https://10.0.0.1:2379"));
        assert_eq!(
            spec.arg_value("-initial-advertise-peer-urls"),
            Some("https://10.0.0.1:2380")
        );
        assert_eq!(
            spec.arg_value("-discovery"),
            Some("https://discovery.etcd.io/abc123")
        );
    }

    #[test]
    fn run_args_place_image_before_entrypoint_args() {
        let args = spec().to_run_args();
        assert_eq!(&args[..4], ["run", "-d", "--name", "etcd"]);
        let image = args.iter().position(|a| a == "quay.io/coreos/etcd").unwrap();
        assert_eq!(args[image + 1], "-name");
        assert!(args.contains(&"2379:2379".to_owned()));
        assert!(args.contains(&"/etc/docker/certs.d:/certs".to_owned()));
        assert!(args.contains(&"com.s21g.etcds.name=a".to_owned()));
    }
}
