//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Per-node lifecycle: `absent -> stopped -> running`.
//!
//! State is re-derived from the runtime on every call. Within one
//! transition, stop completes before remove and remove before start.

use std::fmt;

use etcds_common::NodeSpec;
use etcds_logging::{log_fleet_event, FleetEventOutcome, LogContext};
use tracing::debug;

use crate::error::RuntimeError;
use crate::launch::LaunchSpec;
use crate::runtime::{ContainerFilter, ContainerListing, ContainerRuntime, ContainerScope};

/// Derived state of a node's managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Absent,
    Stopped,
    Running,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Absent => "absent",
            NodeState::Stopped => "stopped",
            NodeState::Running => "running",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Stop,
    Remove,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Stop => f.write_str("stop"),
            TransitionKind::Remove => f.write_str("rm"),
        }
    }
}

/// A stop or remove that found nothing to act on. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleStateWarning {
    pub node: String,
    pub operation: TransitionKind,
}

impl fmt::Display for StaleStateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            TransitionKind::Stop => write!(f, "etcd is not running at {}", self.node),
            TransitionKind::Remove => {
                write!(f, "etcd is not stopped or existing at {}", self.node)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied { container_ids: Vec<String> },
    Skipped(StaleStateWarning),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Result of [`Lifecycle::ensure_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    pub previous: NodeState,
    pub container_id: String,
}

/// Drives lifecycle transitions against a [`ContainerRuntime`].
pub struct Lifecycle<'a> {
    runtime: &'a dyn ContainerRuntime,
    label_key: String,
}

impl<'a> Lifecycle<'a> {
    /// `label_key` is the label whose value names the owning node.
    pub fn new(runtime: &'a dyn ContainerRuntime, label_key: impl Into<String>) -> Self {
        Self {
            runtime,
            label_key: label_key.into(),
        }
    }

    fn query(&self, node: &NodeSpec, scope: ContainerScope) -> Result<ContainerListing, RuntimeError> {
        let filter = ContainerFilter::owned_by(&self.label_key, &node.name, scope);
        self.runtime.query_containers(node, &filter)
    }

    /// The "all" query is only issued when nothing is running.
    pub fn classify(&self, node: &NodeSpec) -> Result<NodeState, RuntimeError> {
        if !self.query(node, ContainerScope::Running)?.is_empty() {
            return Ok(NodeState::Running);
        }
        if !self.query(node, ContainerScope::All)?.is_empty() {
            return Ok(NodeState::Stopped);
        }
        Ok(NodeState::Absent)
    }

    /// Replace whatever runs at `node` with a fresh container from `spec`.
    ///
    /// A running node is stopped, removed and started again; calling this
    /// twice never short-circuits.
    pub fn ensure_up(&self, node: &NodeSpec, spec: &LaunchSpec) -> Result<UpReport, RuntimeError> {
        let ctx = LogContext::new().with_node(&node.name).with_operation("up");
        let running = self.query(node, ContainerScope::Running)?;
        let previous = if running.is_empty() {
            if self.query(node, ContainerScope::All)?.is_empty() {
                NodeState::Absent
            } else {
                NodeState::Stopped
            }
        } else {
            NodeState::Running
        };
        debug!(node = %node.name, state = %previous, "classified before up");

        for id in running.ids() {
            self.runtime.stop_container(node, &id)?;
        }
        if previous != NodeState::Absent {
            // Re-query so removal acts on ids observed after the stop.
            for id in self.query(node, ContainerScope::All)?.ids() {
                self.runtime.remove_container(node, &id)?;
            }
        }

        let container_id = self.runtime.start_container(node, spec)?;
        log_fleet_event(
            Some(&ctx),
            "lifecycle.up",
            &format!("etcd is started at {} ({previous} before)", node.name),
            FleetEventOutcome::Success,
        );
        Ok(UpReport {
            previous,
            container_id,
        })
    }

    /// `running -> stopped`.
    pub fn down(&self, node: &NodeSpec) -> Result<Transition, RuntimeError> {
        let ids = self.query(node, ContainerScope::Running)?.ids();
        self.apply(node, TransitionKind::Stop, ids)
    }

    /// `stopped -> absent`. Only exited containers are removed.
    pub fn reap(&self, node: &NodeSpec) -> Result<Transition, RuntimeError> {
        let ids = self.query(node, ContainerScope::Exited)?.ids();
        self.apply(node, TransitionKind::Remove, ids)
    }

    fn apply(
        &self,
        node: &NodeSpec,
        kind: TransitionKind,
        ids: Vec<String>,
    ) -> Result<Transition, RuntimeError> {
        let operation = kind.to_string();
        let ctx = LogContext::new()
            .with_node(&node.name)
            .with_operation(&operation);
        if ids.is_empty() {
            let warning = StaleStateWarning {
                node: node.name.clone(),
                operation: kind,
            };
            log_fleet_event(
                Some(&ctx),
                "lifecycle.stale",
                &warning.to_string(),
                FleetEventOutcome::Warning,
            );
            return Ok(Transition::Skipped(warning));
        }
        for id in &ids {
            match kind {
                TransitionKind::Stop => self.runtime.stop_container(node, id)?,
                TransitionKind::Remove => self.runtime.remove_container(node, id)?,
            }
        }
        let verb = match kind {
            TransitionKind::Stop => "stopped",
            TransitionKind::Remove => "removed",
        };
        log_fleet_event(
            Some(&ctx),
            "lifecycle.transition",
            &format!("etcd is {verb} at {}", node.name),
            FleetEventOutcome::Success,
        );
        Ok(Transition::Applied { container_ids: ids })
    }
}
