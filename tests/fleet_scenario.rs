//! ---
//! etcds_section: "15-testing-qa-runbook"
//! etcds_subsection: "integration-tests"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Integration and validation tests for the etcds stack."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use etcds_common::{FleetConfig, Inventory};
use etcds_orchestrator::testing::{FakeControl, FakeDiscovery, FakeReader, FakeRuntime, FakeShell};
use etcds_orchestrator::{Backends, FanOutOutcome, Fleet, NodeState};
use tempfile::TempDir;

const INVENTORY: &str = "a:\n  ip: 10.0.0.1\nb:\n  ip: 10.0.0.2\n  role: spare\n";

struct Setup {
    fleet: Fleet,
    runtime: FakeRuntime,
    discovery: FakeDiscovery,
    dir: TempDir,
}

fn setup(runtime: FakeRuntime) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let mut config = FleetConfig::default();
    config.certs_dir = dir.path().join("certs");
    let discovery = FakeDiscovery::new();
    let backends = Backends {
        runtime: Box::new(runtime.clone()),
        discovery: Box::new(discovery.clone()),
        control: Box::new(FakeControl::new()),
        reader: Box::new(FakeReader::new()),
        shell: Box::new(FakeShell::new()),
    };
    let inventory = Inventory::from_yaml_str(INVENTORY, dir.path().join("etcds.yml")).unwrap();
    Setup {
        fleet: Fleet::new(inventory, config, backends).unwrap(),
        runtime,
        discovery,
        dir,
    }
}

#[test]
fn init_then_up_brings_both_nodes_into_one_cluster() {
    let s = setup(FakeRuntime::new());

    let report = s.fleet.init().unwrap();
    let certs = s.dir.path().join("certs");
    for file in [
        "a.crt",
        "a.key",
        "a.ca.crt",
        "b.crt",
        "b.key",
        "b.ca.crt",
        "client.crt",
        "client.key",
        "client.ca.crt",
        "discovery",
    ] {
        assert!(certs.join(file).is_file(), "{file} was not written");
    }
    assert_eq!(s.discovery.requests(), vec![2]);

    for name in ["a", "b"] {
        let outcomes = s.fleet.up(&[name]).unwrap();
        assert!(outcomes[0].result.is_ok(), "up {name}: {:?}", outcomes[0].result);
    }

    let a = &s.runtime.launches("a")[0];
    let b = &s.runtime.launches("b")[0];
    assert_eq!(a.arg_value("-advertise-client-urls"), Some("https://10.0.0.1:2379"));
    assert_eq!(b.arg_value("-advertise-client-urls"), Some("https://10.0.0.2:2379"));
    assert_eq!(a.arg_value("-discovery"), Some(report.token.as_str()));
    assert_eq!(a.arg_value("-discovery"), b.arg_value("-discovery"));

    let lines: Vec<String> = s.fleet.ls().iter().map(ToString::to_string).collect();
    assert_eq!(lines, ["a: ip=10.0.0.1 running", "b: ip=10.0.0.2 running"]);
}

#[test]
fn repeated_init_keeps_root_and_token() {
    let s = setup(FakeRuntime::new());
    let first = s.fleet.init().unwrap();
    let root = std::fs::read(s.dir.path().join("certs/ca.crt")).unwrap();
    let second = s.fleet.init().unwrap();

    assert_eq!(first.token, second.token);
    assert_eq!(std::fs::read(s.dir.path().join("certs/ca.crt")).unwrap(), root);
    assert_eq!(s.discovery.requests().len(), 1);
}

#[test]
fn lifecycle_round_trip_through_the_fleet() {
    let s = setup(FakeRuntime::new());
    s.fleet.init().unwrap();
    s.fleet.up(&["a", "b"]).unwrap();

    let stopped = s.fleet.stop(&["a"]).unwrap();
    assert!(stopped[0].result.as_ref().unwrap().is_applied());
    let removed = s.fleet.rm(&["a"]).unwrap();
    assert!(removed[0].result.as_ref().unwrap().is_applied());

    let states: Vec<_> = s
        .fleet
        .ls()
        .into_iter()
        .map(|status| status.state.unwrap())
        .collect();
    assert_eq!(states, [NodeState::Absent, NodeState::Running]);
}

#[test]
fn health_fan_out_survives_mixed_node_states() {
    let s = setup(
        FakeRuntime::new()
            .with_running("a", "ctr-a")
            .unreachable("b"),
    );
    let entries = s.fleet.health();
    assert_eq!(entries.len(), 2);
    assert!(matches!(entries[0].outcome, FanOutOutcome::Completed(_)));
    assert!(matches!(entries[1].outcome, FanOutOutcome::Unreachable(_)));
}
