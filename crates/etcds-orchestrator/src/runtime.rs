//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Remote container runtime client.
//!
//! The runtime managing a node's container listens on that node's own
//! address. Every call is a fresh, independent `docker` process pointed at
//! that endpoint; nothing is pooled or cached. Output parsing stays in this
//! module so callers only ever see [`ContainerListing`].

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Output};

use etcds_common::{NodeSpec, RuntimeConfig};
use etcds_logging::{etcds_warn, LogContext};
use serde::Deserialize;
use tracing::debug;

use crate::error::RuntimeError;
use crate::launch::LaunchSpec;

const DOCKER: &str = "docker";

/// Stderr fragments the docker CLI emits when the daemon cannot be reached.
const UNREACHABLE_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "error during connect",
    "connection refused",
    "no such host",
    "i/o timeout",
    "no route to host",
];

/// Which containers a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerScope {
    Running,
    All,
    Exited,
}

/// Label selector plus scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFilter {
    /// `key` or `key=value`.
    pub label: String,
    pub scope: ContainerScope,
}

impl ContainerFilter {
    /// Containers labelled as belonging to `node`.
    pub fn owned_by(label_key: &str, node: &str, scope: ContainerScope) -> Self {
        Self {
            label: format!("{label_key}={node}"),
            scope,
        }
    }

    /// Every container carrying `label_key`, whatever node it belongs to.
    pub fn managed(label_key: &str, scope: ContainerScope) -> Self {
        Self {
            label: label_key.to_owned(),
            scope,
        }
    }
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Typed result of a container query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerListing {
    pub containers: Vec<ContainerSummary>,
}

impl ContainerListing {
    pub fn new(containers: Vec<ContainerSummary>) -> Self {
        Self { containers }
    }

    /// Parse `docker ps --format '{{json .}}'` output, one object per line.
    pub fn from_json_lines(raw: &str) -> Result<Self, serde_json::Error> {
        let containers = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<ContainerSummary>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { containers })
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.containers.iter().map(|c| c.id.clone()).collect()
    }
}

impl fmt::Display for ContainerListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14}{:<28}{:<32}{}",
            "CONTAINER ID", "IMAGE", "STATUS", "NAMES"
        )?;
        for container in &self.containers {
            let short_id: String = container.id.chars().take(12).collect();
            writeln!(
                f,
                "{:<14}{:<28}{:<32}{}",
                short_id, container.image, container.status, container.names
            )?;
        }
        Ok(())
    }
}

/// Command-and-query access to the runtime hosting a node's container.
pub trait ContainerRuntime {
    fn query_containers(
        &self,
        node: &NodeSpec,
        filter: &ContainerFilter,
    ) -> Result<ContainerListing, RuntimeError>;

    /// Start a container and return its id.
    fn start_container(&self, node: &NodeSpec, spec: &LaunchSpec) -> Result<String, RuntimeError>;

    /// Stopping an already stopped container is not an error.
    fn stop_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError>;

    /// Removing an already removed container is not an error.
    fn remove_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError>;
}

/// [`ContainerRuntime`] backed by the docker CLI and `DOCKER_HOST`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    port: u16,
    tls_verify: bool,
    cert_path: Option<PathBuf>,
}

impl DockerCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            program: DOCKER.to_owned(),
            port: config.docker_port,
            tls_verify: config.docker_tls_verify,
            cert_path: config.docker_cert_path.clone(),
        }
    }

    /// Use a different docker binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, node: &NodeSpec) -> Command {
        let mut command = Command::new(&self.program);
        command.env("DOCKER_HOST", node.docker_host(self.port));
        if self.tls_verify {
            command.env("DOCKER_TLS_VERIFY", "1");
        }
        if let Some(path) = &self.cert_path {
            command.env("DOCKER_CERT_PATH", path);
        }
        command
    }

    fn run(&self, node: &NodeSpec, args: &[String]) -> Result<String, RuntimeError> {
        debug!(node = %node.name, args = ?args, "invoking docker");
        let output = self
            .command(node)
            .args(args)
            .output()
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        self.check(node, args, output)
    }

    fn check(&self, node: &NodeSpec, args: &[String], output: Output) -> Result<String, RuntimeError> {
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let lowered = detail.to_lowercase();
        if UNREACHABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            etcds_warn!(
                context = LogContext::new()
                    .with_node(&node.name)
                    .with_operation("docker"),
                "runtime at {} did not answer",
                node.docker_host(self.port)
            );
            return Err(RuntimeError::Unreachable {
                node: node.name.clone(),
                endpoint: node.docker_host(self.port),
                detail,
            });
        }
        Err(RuntimeError::Command {
            node: node.name.clone(),
            command: args.first().cloned().unwrap_or_default(),
            detail,
        })
    }
}

fn ps_args(filter: &ContainerFilter) -> Vec<String> {
    let mut args = vec![
        "ps".to_owned(),
        "--no-trunc".to_owned(),
        "--format".to_owned(),
        "{{json .}}".to_owned(),
        "--filter".to_owned(),
        format!("label={}", filter.label),
    ];
    match filter.scope {
        ContainerScope::Running => {}
        ContainerScope::All => args.push("-a".to_owned()),
        ContainerScope::Exited => {
            args.push("-a".to_owned());
            args.push("--filter".to_owned());
            args.push("status=exited".to_owned());
        }
    }
    args
}

fn is_missing_container(err: &RuntimeError) -> bool {
    matches!(err, RuntimeError::Command { detail, .. } if detail.to_lowercase().contains("no such container"))
}

impl ContainerRuntime for DockerCli {
    fn query_containers(
        &self,
        node: &NodeSpec,
        filter: &ContainerFilter,
    ) -> Result<ContainerListing, RuntimeError> {
        let raw = self.run(node, &ps_args(filter))?;
        ContainerListing::from_json_lines(&raw).map_err(|err| RuntimeError::Parse {
            node: node.name.clone(),
            detail: err.to_string(),
        })
    }

    fn start_container(&self, node: &NodeSpec, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let stdout = self
            .run(node, &spec.to_run_args())
            .map_err(|err| match err {
                RuntimeError::Command { node, detail, .. } => RuntimeError::Launch { node, detail },
                other => other,
            })?;
        let id = stdout.lines().last().unwrap_or_default().trim().to_owned();
        if id.is_empty() {
            return Err(RuntimeError::Launch {
                node: node.name.clone(),
                detail: "runtime returned no container id".to_owned(),
            });
        }
        Ok(id)
    }

    fn stop_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError> {
        match self.run(node, &["stop".to_owned(), id.to_owned()]) {
            Ok(_) => Ok(()),
            Err(err) if is_missing_container(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn remove_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError> {
        match self.run(node, &["rm".to_owned(), id.to_owned()]) {
            Ok(_) => Ok(()),
            Err(err) if is_missing_container(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS_OUTPUT: &str = r#"{"Command":"\"/etcd\"","ID":"4f1c0a7d9e2b44c1","Image":"quay.io/coreos/etcd","Labels":"com.s21g.etcds.name=a","Names":"etcd","State":"running","Status":"Up 3 minutes"}
{"ID":"9a8b7c6d5e4f3a2b","Image":"quay.io/coreos/etcd","Names":"etcd-old","Status":"Exited (0) 2 days ago"}
"#;

    #[test]
    fn parses_json_lines_listing() {
        let listing = ContainerListing::from_json_lines(PS_OUTPUT).unwrap();
        assert_eq!(listing.ids(), vec!["4f1c0a7d9e2b44c1", "9a8b7c6d5e4f3a2b"]);
        assert_eq!(listing.containers[0].state, "running");
        assert_eq!(listing.containers[1].state, "");
    }

    #[test]
    fn empty_output_is_an_empty_listing() {
        assert!(ContainerListing::from_json_lines("\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_rejected() {
        assert!(ContainerListing::from_json_lines("CONTAINER ID   IMAGE").is_err());
    }

    #[test]
    fn render_truncates_ids() {
        let rendered = ContainerListing::from_json_lines(PS_OUTPUT)
            .unwrap()
            .to_string();
        assert!(rendered.starts_with("CONTAINER ID"));
        assert!(rendered.contains("4f1c0a7d9e2b "));
        assert!(!rendered.contains("4f1c0a7d9e2b44c1"));
    }

    #[test]
    fn ps_args_follow_scope() {
        let running = ps_args(&ContainerFilter::owned_by(
            "com.s21g.etcds.name",
            "a",
            ContainerScope::Running,
        ));
        assert!(running.contains(&"label=com.s21g.etcds.name=a".to_owned()));
        assert!(!running.contains(&"-a".to_owned()));

        let exited = ps_args(&ContainerFilter::managed(
            "com.s21g.etcds.name",
            ContainerScope::Exited,
        ));
        assert!(exited.contains(&"-a".to_owned()));
        assert!(exited.contains(&"status=exited".to_owned()));
    }

    #[cfg(unix)]
    #[test]
    fn daemon_connection_errors_are_unreachable() {
        use std::os::unix::process::ExitStatusExt;
        let cli = DockerCli::new(&RuntimeConfig::default());
        let node = NodeSpec::new("c", "10.0.0.3");
        let output = Output {
            status: std::process::ExitStatus::from_raw(256),
            stdout: Vec::new(),
            stderr: b"Cannot connect to the Docker daemon at tcp://10.0.0.3:2376. Is the docker daemon running?".to_vec(),
        };
        let err = cli.check(&node, &["ps".to_owned()], output).unwrap_err();
        assert!(err.is_unreachable());
        assert!(err.to_string().contains("tcp://10.0.0.3:2376"));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let cli = DockerCli::new(&RuntimeConfig::default()).with_program("/nonexistent/docker");
        let node = NodeSpec::new("a", "10.0.0.1");
        let err = cli
            .query_containers(
                &node,
                &ContainerFilter::owned_by("l", "a", ContainerScope::Running),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
