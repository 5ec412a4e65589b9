//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Recording in-memory fakes for every external seam.
//!
//! Each fake is cheap to clone and clones share state, so a test can hand
//! one copy to a [`crate::Fleet`] and inspect the other afterwards.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use etcds_common::{NodeSpec, RuntimeConfig};
use parking_lot::Mutex;

use crate::control::{CommandOutput, ControlClient, ValueReader};
use crate::discovery::DiscoveryService;
use crate::error::{ControlError, DiscoveryError, InstallError, RuntimeError};
use crate::install::HostShell;
use crate::launch::LaunchSpec;
use crate::runtime::{
    ContainerFilter, ContainerListing, ContainerRuntime, ContainerScope, ContainerSummary,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Query { node: String, scope: ContainerScope },
    Start { node: String, spec: Box<LaunchSpec> },
    Stop { node: String, id: String },
    Remove { node: String, id: String },
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    labels: Vec<(String, String)>,
    image: String,
    running: bool,
}

impl FakeContainer {
    fn matches(&self, filter: &ContainerFilter) -> bool {
        let labelled = match filter.label.split_once('=') {
            Some((key, value)) => self.labels.iter().any(|(k, v)| k == key && v == value),
            None => self.labels.iter().any(|(k, _)| *k == filter.label),
        };
        let in_scope = match filter.scope {
            ContainerScope::Running => self.running,
            ContainerScope::All => true,
            ContainerScope::Exited => !self.running,
        };
        labelled && in_scope
    }

    fn summary(&self) -> ContainerSummary {
        let state = if self.running { "running" } else { "exited" };
        ContainerSummary {
            id: self.id.clone(),
            names: "etcd".to_owned(),
            image: self.image.clone(),
            state: state.to_owned(),
            status: if self.running {
                "Up 1 second".to_owned()
            } else {
                "Exited (0) 1 second ago".to_owned()
            },
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    containers: HashMap<String, Vec<FakeContainer>>,
    unreachable: HashSet<String>,
    rejected: HashSet<String>,
    calls: Vec<RuntimeCall>,
    started: usize,
}

/// In-memory container runtime keyed by node name.
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    label_key: String,
    state: Arc<Mutex<RuntimeState>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Seeded containers carry the default node label.
    pub fn new() -> Self {
        Self {
            label_key: RuntimeConfig::default().name_label(),
            state: Arc::new(Mutex::new(RuntimeState::default())),
        }
    }

    fn seed(self, node: &str, id: &str, running: bool) -> Self {
        let container = FakeContainer {
            id: id.to_owned(),
            labels: vec![(self.label_key.clone(), node.to_owned())],
            image: RuntimeConfig::default().image,
            running,
        };
        self.state
            .lock()
            .containers
            .entry(node.to_owned())
            .or_default()
            .push(container);
        self
    }

    pub fn with_running(self, node: &str, id: &str) -> Self {
        self.seed(node, id, true)
    }

    pub fn with_stopped(self, node: &str, id: &str) -> Self {
        self.seed(node, id, false)
    }

    /// Every call against `node` fails as unreachable.
    pub fn unreachable(self, node: &str) -> Self {
        self.state.lock().unreachable.insert(node.to_owned());
        self
    }

    /// Launches at `node` are rejected.
    pub fn reject_launch(self, node: &str) -> Self {
        self.state.lock().rejected.insert(node.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    /// Launch specs started at `node`, oldest first.
    pub fn launches(&self, node: &str) -> Vec<LaunchSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Start { node: n, spec } if n == node => Some(*spec),
                _ => None,
            })
            .collect()
    }

    fn check_reachable(state: &RuntimeState, node: &NodeSpec) -> Result<(), RuntimeError> {
        if state.unreachable.contains(&node.name) {
            return Err(RuntimeError::Unreachable {
                node: node.name.clone(),
                endpoint: format!("tcp://{}:2376", node.address),
                detail: "connection refused".to_owned(),
            });
        }
        Ok(())
    }
}

impl ContainerRuntime for FakeRuntime {
    fn query_containers(
        &self,
        node: &NodeSpec,
        filter: &ContainerFilter,
    ) -> Result<ContainerListing, RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Query {
            node: node.name.clone(),
            scope: filter.scope,
        });
        Self::check_reachable(&state, node)?;
        let containers = state
            .containers
            .get(&node.name)
            .map(|all| {
                all.iter()
                    .filter(|c| c.matches(filter))
                    .map(FakeContainer::summary)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ContainerListing::new(containers))
    }

    fn start_container(&self, node: &NodeSpec, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Start {
            node: node.name.clone(),
            spec: Box::new(spec.clone()),
        });
        Self::check_reachable(&state, node)?;
        if state.rejected.contains(&node.name) {
            return Err(RuntimeError::Launch {
                node: node.name.clone(),
                detail: format!("Unable to find image '{}' locally", spec.image),
            });
        }
        if state
            .containers
            .get(&node.name)
            .is_some_and(|containers| !containers.is_empty())
        {
            return Err(RuntimeError::Launch {
                node: node.name.clone(),
                detail: format!("container name \"/{}\" is already in use", spec.container_name),
            });
        }
        state.started += 1;
        let id = format!("{}-{:04}", node.name, state.started);
        state
            .containers
            .entry(node.name.clone())
            .or_default()
            .push(FakeContainer {
                id: id.clone(),
                labels: spec.labels.clone(),
                image: spec.image.clone(),
                running: true,
            });
        Ok(id)
    }

    fn stop_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Stop {
            node: node.name.clone(),
            id: id.to_owned(),
        });
        Self::check_reachable(&state, node)?;
        if let Some(containers) = state.containers.get_mut(&node.name) {
            for container in containers.iter_mut().filter(|c| c.id == id) {
                container.running = false;
            }
        }
        Ok(())
    }

    fn remove_container(&self, node: &NodeSpec, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Remove {
            node: node.name.clone(),
            id: id.to_owned(),
        });
        Self::check_reachable(&state, node)?;
        if let Some(containers) = state.containers.get_mut(&node.name) {
            if containers.iter().any(|c| c.id == id && c.running) {
                return Err(RuntimeError::Command {
                    node: node.name.clone(),
                    command: "rm".to_owned(),
                    detail: format!("cannot remove running container {id}"),
                });
            }
            containers.retain(|c| c.id != id);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DiscoveryState {
    requests: Vec<usize>,
    issued: usize,
}

/// Discovery service handing out a distinct token on every request.
#[derive(Debug, Clone, Default)]
pub struct FakeDiscovery {
    fail: bool,
    state: Arc<Mutex<DiscoveryState>>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sizes requested so far.
    pub fn requests(&self) -> Vec<usize> {
        self.state.lock().requests.clone()
    }
}

impl DiscoveryService for FakeDiscovery {
    fn new_token(&self, size: usize) -> Result<String, DiscoveryError> {
        let mut state = self.state.lock();
        state.requests.push(size);
        if self.fail {
            return Err(DiscoveryError::Request {
                endpoint: "https://discovery.test/new".to_owned(),
                detail: "service unavailable".to_owned(),
            });
        }
        state.issued += 1;
        Ok(format!("https://discovery.test/{:08x}", state.issued))
    }
}

/// Control client echoing its arguments.
#[derive(Debug, Clone, Default)]
pub struct FakeControl {
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }
}

impl ControlClient for FakeControl {
    fn run(&self, node: &NodeSpec, args: &[String]) -> Result<CommandOutput, ControlError> {
        self.calls.lock().push((node.name.clone(), args.to_vec()));
        Ok(CommandOutput {
            status: Some(0),
            stdout: format!("{}: {}\n", node.name, args.join(" ")),
            stderr: String::new(),
        })
    }
}

/// Value reader over a fixed `(node, path) -> body` table.
#[derive(Debug, Clone, Default)]
pub struct FakeReader {
    values: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, node: &str, path: &str, body: &str) -> Self {
        self.values
            .lock()
            .insert((node.to_owned(), path.to_owned()), body.to_owned());
        self
    }
}

impl ValueReader for FakeReader {
    fn read(&self, node: &NodeSpec, path: &str) -> Result<String, ControlError> {
        self.values
            .lock()
            .get(&(node.name.clone(), path.to_owned()))
            .cloned()
            .ok_or_else(|| ControlError::Status {
                url: format!("{}{path}", node.client_url()),
                status: 404,
                body: "Key not found".to_owned(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCall {
    Copy { host: String, local: String, remote_dir: String },
    Exec { host: String, command: String },
}

#[derive(Debug, Default)]
struct ShellState {
    calls: Vec<ShellCall>,
    failing: HashSet<String>,
}

/// Host shell recording every copy and command.
#[derive(Debug, Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call against `host` fails.
    pub fn failing_host(self, host: &str) -> Self {
        self.state.lock().failing.insert(host.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.state.lock().calls.clone()
    }

    fn record(&self, host: &str, call: ShellCall) -> Result<(), InstallError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(host) {
            return Err(InstallError::Remote {
                host: host.to_owned(),
                command: "scp".to_owned(),
                detail: "Host does not exist".to_owned(),
            });
        }
        Ok(())
    }
}

impl HostShell for FakeShell {
    fn copy_to(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), InstallError> {
        self.record(
            host,
            ShellCall::Copy {
                host: host.to_owned(),
                local: local.display().to_string(),
                remote_dir: remote_dir.to_owned(),
            },
        )
    }

    fn exec_as_root(&self, host: &str, command: &str) -> Result<(), InstallError> {
        self.record(
            host,
            ShellCall::Exec {
                host: host.to_owned(),
                command: command.to_owned(),
            },
        )
    }
}
