//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Operator-facing fleet operations.
//!
//! Whole-cluster steps (CA provisioning, discovery token) halt on the first
//! failure. Per-node steps are isolated: each node gets its own
//! [`NodeOutcome`] and the loop always reaches the last node.

use std::fmt;

use etcds_common::{FleetConfig, Inventory, NodeSpec};
use etcds_logging::{etcds_info, log_fleet_event, FleetEventOutcome, LogContext};
use etcds_security::{CaWorkflow, ProvisionReport};

use crate::control::{
    fan_out, CommandOutput, ControlClient, Etcdctl, FanOutEntry, HttpsReader, NodeKey,
    ValueReader,
};
use crate::discovery::{
    ensure_discovery_token, require_discovery_token, DiscoveryService, DiscoveryToken,
    HttpDiscovery,
};
use crate::error::{FleetError, Result};
use crate::install::{install_certificates, DockerMachine, HostShell};
use crate::launch::LaunchSpec;
use crate::lifecycle::{Lifecycle, NodeState, Transition, UpReport};
use crate::runtime::{ContainerFilter, ContainerListing, ContainerRuntime, ContainerScope, DockerCli};

/// Arguments passed to the control client by [`Fleet::health`].
pub const HEALTH_ARGS: &[&str] = &["cluster-health"];
/// Arguments passed to the control client by [`Fleet::member`].
pub const MEMBER_ARGS: &[&str] = &["member", "list"];

/// The external collaborators a [`Fleet`] drives.
pub struct Backends {
    /// Container runtime on each node.
    pub runtime: Box<dyn ContainerRuntime>,
    /// Rendezvous service used on the first `init`.
    pub discovery: Box<dyn DiscoveryService>,
    /// Admin command channel.
    pub control: Box<dyn ControlClient>,
    /// `node:path` read path.
    pub reader: Box<dyn ValueReader>,
    /// Remote copy/execute used by `install`.
    pub shell: Box<dyn HostShell>,
}

impl Backends {
    /// Real implementations: docker, the discovery endpoint, etcdctl, HTTPS
    /// and docker-machine.
    pub fn live(config: &FleetConfig) -> Result<Self> {
        let store = config.store();
        Ok(Self {
            runtime: Box::new(DockerCli::new(&config.runtime)),
            discovery: Box::new(HttpDiscovery::new(config.discovery.endpoint.clone())?),
            control: Box::new(Etcdctl::new(store.clone())),
            reader: Box::new(HttpsReader::new(store)),
            shell: Box::new(DockerMachine::new()),
        })
    }
}

/// Result of one per-node step.
#[derive(Debug)]
pub struct NodeOutcome<T> {
    /// Node name.
    pub node: String,
    /// What happened there.
    pub result: Result<T>,
}

impl<T> NodeOutcome<T> {
    /// `true` when the step failed at this node.
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

/// One line of `ls`.
#[derive(Debug)]
pub struct NodeStatus {
    /// Node name.
    pub name: String,
    /// Inventory address.
    pub address: String,
    /// Derived lifecycle state, or why it could not be derived.
    pub state: Result<NodeState>,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Ok(state) => write!(f, "{}: ip={} {state}", self.name, self.address),
            Err(err) => write!(f, "{}: ip={} unknown ({err})", self.name, self.address),
        }
    }
}

/// Output of [`Fleet::init`].
#[derive(Debug)]
pub struct InitReport {
    /// Certificates written.
    pub provision: ProvisionReport,
    /// Token every member will boot with.
    pub token: DiscoveryToken,
}

/// Inventory, settings and backends for one invocation.
pub struct Fleet {
    inventory: Inventory,
    config: FleetConfig,
    backends: Backends,
}

impl Fleet {
    /// Assemble a fleet. Settings are validated here.
    pub fn new(inventory: Inventory, config: FleetConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inventory,
            config,
            backends,
        })
    }

    /// The loaded inventory.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// The active settings.
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(
            self.backends.runtime.as_ref(),
            self.config.runtime.name_label(),
        )
    }

    /// Every node with its derived state, in inventory order.
    pub fn ls(&self) -> Vec<NodeStatus> {
        let lifecycle = self.lifecycle();
        self.inventory
            .nodes()
            .map(|node| NodeStatus {
                name: node.name.clone(),
                address: node.address.clone(),
                state: lifecycle.classify(node).map_err(FleetError::from),
            })
            .collect()
    }

    /// Provision the CA and every certificate bundle, then make sure a
    /// discovery token exists. Halts on the first failure.
    pub fn init(&self) -> Result<InitReport> {
        let store = self.config.store();
        let mut workflow = CaWorkflow::new(store.clone());
        let provision = workflow.provision(&self.inventory)?;
        let size = self.config.discovery.size.unwrap_or(self.inventory.len());
        let token = ensure_discovery_token(&store, self.backends.discovery.as_ref(), size)?;
        etcds_info!(
            context = LogContext::new().with_operation("init"),
            "fleet initialised: {} bundles, cluster size {size}",
            provision.subjects.len()
        );
        Ok(InitReport { provision, token })
    }

    /// Copy each named node's bundle to its host. No names means every node.
    pub fn install<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<NodeOutcome<Vec<String>>>> {
        let store = self.config.store();
        let nodes = self.inventory.select_or_all(names)?;
        Ok(nodes
            .into_iter()
            .map(|node| {
                let result = install_certificates(
                    self.backends.shell.as_ref(),
                    &store,
                    node,
                    &self.config.runtime.host_certs_dir,
                )
                .map(|paths| paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>())
                .map_err(FleetError::from);
                self.report(node, "install", result)
            })
            .collect())
    }

    /// Managed containers on every node. `all` includes stopped ones.
    pub fn ps(&self, all: bool) -> Vec<NodeOutcome<ContainerListing>> {
        let scope = if all {
            ContainerScope::All
        } else {
            ContainerScope::Running
        };
        let filter = ContainerFilter::managed(&self.config.runtime.name_label(), scope);
        self.inventory
            .nodes()
            .map(|node| {
                let result = self
                    .backends
                    .runtime
                    .query_containers(node, &filter)
                    .map_err(FleetError::from);
                self.report(node, "ps", result)
            })
            .collect()
    }

    /// Stop the named nodes. No names means every node.
    pub fn stop<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<NodeOutcome<Transition>>> {
        let lifecycle = self.lifecycle();
        let nodes = self.inventory.select_or_all(names)?;
        Ok(nodes
            .into_iter()
            .map(|node| self.report(node, "stop", lifecycle.down(node).map_err(FleetError::from)))
            .collect())
    }

    /// Remove the named nodes' exited containers.
    pub fn rm<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<NodeOutcome<Transition>>> {
        let lifecycle = self.lifecycle();
        let nodes = self.inventory.select(names)?;
        Ok(nodes
            .into_iter()
            .map(|node| self.report(node, "rm", lifecycle.reap(node).map_err(FleetError::from)))
            .collect())
    }

    /// (Re)start the named nodes with the stored discovery token.
    ///
    /// A missing token is fatal for the whole call. A node whose local
    /// bundle is incomplete is reported and skipped.
    pub fn up<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<NodeOutcome<UpReport>>> {
        let nodes = self.inventory.select(names)?;
        let store = self.config.store();
        let token = require_discovery_token(&store)?;
        let lifecycle = self.lifecycle();
        Ok(nodes
            .into_iter()
            .map(|node| {
                let result = self.check_bundle(node).and_then(|()| {
                    let spec = LaunchSpec::for_node(node, &self.config, &token);
                    lifecycle.ensure_up(node, &spec).map_err(FleetError::from)
                });
                self.report(node, "up", result)
            })
            .collect())
    }

    fn check_bundle(&self, node: &NodeSpec) -> Result<()> {
        let store = self.config.store();
        match store.bundle_files(&node.name).into_iter().find(|p| !p.is_file()) {
            Some(path) => Err(FleetError::MissingCertificate {
                node: node.name.clone(),
                path,
            }),
            None => Ok(()),
        }
    }

    /// `cluster-health` on every running node.
    pub fn health(&self) -> Vec<FanOutEntry<CommandOutput>> {
        self.fan_out_command("health", HEALTH_ARGS)
    }

    /// `member list` on every running node.
    pub fn member(&self) -> Vec<FanOutEntry<CommandOutput>> {
        self.fan_out_command("member", MEMBER_ARGS)
    }

    fn fan_out_command(&self, operation: &str, args: &[&str]) -> Vec<FanOutEntry<CommandOutput>> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        fan_out(&self.lifecycle(), self.inventory.nodes(), operation, |node| {
            self.backends
                .control
                .run(node, &args)
                .map_err(FleetError::from)
        })
    }

    /// Forward free-form arguments to the control client of one node.
    pub fn ctl<S: AsRef<str>>(&self, name: &str, args: &[S]) -> Result<CommandOutput> {
        let node = self.inventory.get(name)?;
        let args: Vec<String> = args.iter().map(|arg| arg.as_ref().to_owned()).collect();
        Ok(self.backends.control.run(node, &args)?)
    }

    /// Read `node:path` over the node's client endpoint.
    pub fn get(&self, key: &str) -> Result<String> {
        let key = NodeKey::parse(key)?;
        let node = self.inventory.get(&key.node)?;
        Ok(self.backends.reader.read(node, &key.path)?)
    }

    fn report<T>(&self, node: &NodeSpec, operation: &str, result: Result<T>) -> NodeOutcome<T> {
        if let Err(err) = &result {
            log_fleet_event(
                Some(
                    &LogContext::new()
                        .with_node(&node.name)
                        .with_operation(operation),
                ),
                "fleet.node_failed",
                &err.to_string(),
                FleetEventOutcome::Fault,
            );
        }
        NodeOutcome {
            node: node.name.clone(),
            result,
        }
    }
}
