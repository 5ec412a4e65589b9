//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Node lifecycle and cluster bootstrap for an etcd fleet.
//!
//! Every operation reads state from the remote runtimes once and acts on it;
//! nothing is watched or cached between invocations. External systems sit
//! behind the traits re-exported here so the whole crate can be driven by the
//! fakes in [`testing`].

pub mod control;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod install;
pub mod launch;
pub mod lifecycle;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use control::{
    fan_out, CommandOutput, ControlClient, Etcdctl, FanOutEntry, FanOutOutcome, HttpsReader,
    NodeKey, ValueReader,
};
pub use discovery::{
    ensure_discovery_token, read_discovery_token, require_discovery_token, DiscoveryService,
    DiscoveryToken, HttpDiscovery,
};
pub use error::{ControlError, DiscoveryError, FleetError, InstallError, RuntimeError};
pub use fleet::{Backends, Fleet, InitReport, NodeOutcome, NodeStatus};
pub use install::{install_certificates, DockerMachine, HostShell};
pub use launch::LaunchSpec;
pub use lifecycle::{Lifecycle, NodeState, StaleStateWarning, Transition, TransitionKind, UpReport};
pub use runtime::{
    ContainerFilter, ContainerListing, ContainerRuntime, ContainerScope, ContainerSummary,
    DockerCli,
};
