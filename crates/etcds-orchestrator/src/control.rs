//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Cluster control surface: admin commands, the read path and fan-out.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use etcds_common::{CertStore, NodeSpec, CLIENT_IDENTITY};
use etcds_logging::{log_fleet_event, FleetEventOutcome, LogContext};
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity};
use tracing::debug;
use url::Url;

use crate::error::{ControlError, FleetError, RuntimeError};
use crate::lifecycle::{Lifecycle, NodeState};

const ETCDCTL: &str = "etcdctl";

/// Raw result of an admin command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Administrative access to one node's control endpoint.
pub trait ControlClient {
    fn run(&self, node: &NodeSpec, args: &[String]) -> Result<CommandOutput, ControlError>;
}

/// [`ControlClient`] running `etcdctl` with the shared client bundle.
#[derive(Debug, Clone)]
pub struct Etcdctl {
    program: String,
    store: CertStore,
}

impl Etcdctl {
    pub fn new(store: CertStore) -> Self {
        Self {
            program: ETCDCTL.to_owned(),
            store,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Full argument list, credentials first.
    pub fn command_args(&self, node: &NodeSpec, args: &[String]) -> Vec<String> {
        let mut out = vec![
            "--endpoints".to_owned(),
            node.client_url(),
            "--cert-file".to_owned(),
            path_arg(&self.store.cert(CLIENT_IDENTITY)),
            "--key-file".to_owned(),
            path_arg(&self.store.key(CLIENT_IDENTITY)),
            "--ca-file".to_owned(),
            path_arg(&self.store.ca_chain(&node.name)),
        ];
        out.extend(args.iter().cloned());
        out
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl ControlClient for Etcdctl {
    fn run(&self, node: &NodeSpec, args: &[String]) -> Result<CommandOutput, ControlError> {
        let full = self.command_args(node, args);
        debug!(node = %node.name, args = ?full, "invoking etcdctl");
        let output = Command::new(&self.program)
            .args(&full)
            .output()
            .map_err(|source| ControlError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// `node:path` address of a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKey {
    pub node: String,
    pub path: String,
}

impl NodeKey {
    /// Split at the first `:`; the path always comes back rooted.
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        let (node, path) = raw
            .split_once(':')
            .ok_or_else(|| ControlError::BadKey(raw.to_owned()))?;
        let node = node.trim();
        if node.is_empty() || path.is_empty() {
            return Err(ControlError::BadKey(raw.to_owned()));
        }
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        Ok(Self {
            node: node.to_owned(),
            path,
        })
    }
}

/// Read path into a node's client endpoint.
pub trait ValueReader {
    fn read(&self, node: &NodeSpec, path: &str) -> Result<String, ControlError>;
}

/// HTTPS GET authenticated with the client bundle.
///
/// Only the node's own CA chain is trusted; the system roots are not.
#[derive(Debug, Clone)]
pub struct HttpsReader {
    store: CertStore,
    timeout: Duration,
}

impl HttpsReader {
    pub fn new(store: CertStore) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(30),
        }
    }

    fn read_pem(path: PathBuf) -> Result<Vec<u8>, ControlError> {
        fs::read(&path).map_err(|source| ControlError::Credentials { path, source })
    }

    fn client_for(&self, node: &NodeSpec) -> Result<Client, ControlError> {
        let tls = |detail: String| ControlError::Tls {
            node: node.name.clone(),
            detail,
        };
        let mut identity_pem = Self::read_pem(self.store.cert(CLIENT_IDENTITY))?;
        identity_pem.push(b'\n');
        identity_pem.extend(Self::read_pem(self.store.key(CLIENT_IDENTITY))?);
        let identity = Identity::from_pem(&identity_pem).map_err(|err| tls(err.to_string()))?;
        let root = Certificate::from_pem(&Self::read_pem(self.store.ca_chain(&node.name))?)
            .map_err(|err| tls(err.to_string()))?;

        Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(root)
            .identity(identity)
            .timeout(self.timeout)
            .build()
            .map_err(|err| tls(err.to_string()))
    }
}

/// The path only replaces the path and query of the node's client URL, so the
/// host always stays the node's own.
pub fn value_url(node: &NodeSpec, path: &str) -> Result<Url, ControlError> {
    let base = node.client_url();
    let mut url = Url::parse(&base).map_err(|err| ControlError::Request {
        url: format!("{base}{path}"),
        detail: err.to_string(),
    })?;
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

impl ValueReader for HttpsReader {
    fn read(&self, node: &NodeSpec, path: &str) -> Result<String, ControlError> {
        let url = value_url(node, path)?;
        let client = self.client_for(node)?;
        let request_failed = |detail: String| ControlError::Request {
            url: url.to_string(),
            detail,
        };
        let response = client
            .get(url.clone())
            .send()
            .map_err(|err| request_failed(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| request_failed(err.to_string()))?;
        if !status.is_success() {
            return Err(ControlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// What happened at one node during a fan-out.
#[derive(Debug)]
pub enum FanOutOutcome<T> {
    Completed(T),
    /// Not contacted.
    NotRunning(NodeState),
    Unreachable(RuntimeError),
    Failed(FleetError),
}

#[derive(Debug)]
pub struct FanOutEntry<T> {
    pub node: String,
    pub outcome: FanOutOutcome<T>,
}

impl<T> FanOutEntry<T> {
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            FanOutOutcome::Unreachable(_) | FanOutOutcome::Failed(_)
        )
    }
}

/// Run `operation` on every running node, one at a time.
///
/// A node that is not running, unreachable or failing is recorded and the
/// loop moves on.
pub fn fan_out<'n, T, I, F>(
    lifecycle: &Lifecycle<'_>,
    nodes: I,
    operation_name: &str,
    mut operation: F,
) -> Vec<FanOutEntry<T>>
where
    I: IntoIterator<Item = &'n NodeSpec>,
    F: FnMut(&NodeSpec) -> Result<T, FleetError>,
{
    let mut entries = Vec::new();
    for node in nodes {
        let ctx = LogContext::new()
            .with_node(&node.name)
            .with_operation(operation_name);
        let outcome = match lifecycle.classify(node) {
            Ok(NodeState::Running) => match operation(node) {
                Ok(value) => FanOutOutcome::Completed(value),
                Err(err) => {
                    log_fleet_event(
                        Some(&ctx),
                        "fanout.failed",
                        &err.to_string(),
                        FleetEventOutcome::Fault,
                    );
                    FanOutOutcome::Failed(err)
                }
            },
            Ok(state) => {
                debug!(node = %node.name, state = %state, "skipping node");
                FanOutOutcome::NotRunning(state)
            }
            Err(err) if err.is_unreachable() => {
                log_fleet_event(
                    Some(&ctx),
                    "fanout.unreachable",
                    &err.to_string(),
                    FleetEventOutcome::Fault,
                );
                FanOutOutcome::Unreachable(err)
            }
            Err(err) => {
                log_fleet_event(
                    Some(&ctx),
                    "fanout.failed",
                    &err.to_string(),
                    FleetEventOutcome::Fault,
                );
                FanOutOutcome::Failed(err.into())
            }
        };
        entries.push(FanOutEntry {
            node: node.name.clone(),
            outcome,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    const LABEL: &str = "com.s21g.etcds.name";

    #[test]
    fn node_key_splits_at_first_colon() {
        let key = NodeKey::parse("a:/v2/keys/app:config").unwrap();
        assert_eq!(key.node, "a");
        assert_eq!(key.path, "/v2/keys/app:config");
        assert_eq!(NodeKey::parse("b:version").unwrap().path, "/version");
    }

    #[test]
    fn malformed_node_keys_are_rejected() {
        for raw in ["no-colon", ":/v2/keys", "a:", ""] {
            assert!(
                matches!(NodeKey::parse(raw), Err(ControlError::BadKey(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn value_url_targets_client_port() {
        let url = value_url(&NodeSpec::new("a", "10.0.0.1"), "/v2/keys/foo").unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1:2379/v2/keys/foo");
    }

    #[test]
    fn value_url_keeps_the_node_host() {
        let node = NodeSpec::new("a", "10.0.0.1");
        let key = NodeKey::parse("a://elsewhere.example/v2/keys/x").unwrap();
        let url = value_url(&node, &key.path).unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.1"));
        assert_eq!(url.port(), Some(2379));
        assert_eq!(url.path(), "//elsewhere.example/v2/keys/x");

        let url = value_url(&node, "/v2/keys/dir?recursive=true").unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1:2379/v2/keys/dir?recursive=true");
    }

    #[test]
    fn etcdctl_uses_client_bundle_and_node_chain() {
        let ctl = Etcdctl::new(CertStore::new("/srv/certs"));
        let args = ctl.command_args(
            &NodeSpec::new("b", "10.0.0.2"),
            &["member".to_owned(), "list".to_owned()],
        );
        assert_eq!(
            args,
            [
                "--endpoints",
                "https://10.0.0.2:2379",
                "--cert-file",
                "/srv/certs/client.crt",
                "--key-file",
                "/srv/certs/client.key",
                "--ca-file",
                "/srv/certs/b.ca.crt",
                "member",
                "list",
            ]
        );
    }

    #[test]
    fn reader_reports_missing_client_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let reader = HttpsReader::new(CertStore::new(dir.path()));
        let err = reader
            .read(&NodeSpec::new("a", "127.0.0.1"), "/version")
            .unwrap_err();
        assert!(matches!(err, ControlError::Credentials { .. }));
    }

    #[test]
    fn fan_out_isolates_each_node() {
        let runtime = FakeRuntime::new()
            .with_running("a", "ca")
            .with_stopped("b", "cb")
            .unreachable("c");
        let nodes = [
            NodeSpec::new("a", "10.0.0.1"),
            NodeSpec::new("b", "10.0.0.2"),
            NodeSpec::new("c", "10.0.0.3"),
        ];
        let lifecycle = Lifecycle::new(&runtime, LABEL);
        let mut contacted = Vec::new();
        let entries = fan_out(&lifecycle, &nodes, "health", |node| {
            contacted.push(node.name.clone());
            Ok(format!("{} is healthy", node.name))
        });

        assert_eq!(contacted, ["a"]);
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0].outcome, FanOutOutcome::Completed(msg) if msg == "a is healthy"));
        assert!(matches!(
            entries[1].outcome,
            FanOutOutcome::NotRunning(NodeState::Stopped)
        ));
        assert!(matches!(entries[2].outcome, FanOutOutcome::Unreachable(_)));
        assert!(entries[2].is_failure());
        assert!(!entries[1].is_failure());
    }

    #[test]
    fn failing_operation_does_not_stop_the_loop() {
        let runtime = FakeRuntime::new()
            .with_running("a", "ca")
            .with_running("b", "cb");
        let nodes = [NodeSpec::new("a", "10.0.0.1"), NodeSpec::new("b", "10.0.0.2")];
        let lifecycle = Lifecycle::new(&runtime, LABEL);
        let entries = fan_out(&lifecycle, &nodes, "member", |node| {
            if node.name == "a" {
                Err(ControlError::BadKey("boom".to_owned()).into())
            } else {
                Ok(())
            }
        });
        assert!(matches!(entries[0].outcome, FanOutOutcome::Failed(_)));
        assert!(matches!(entries[1].outcome, FanOutOutcome::Completed(())));
    }
}
