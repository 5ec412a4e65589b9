//! ---
//! etcds_section: "15-testing-qa-runbook"
//! etcds_subsection: "integration-tests"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Integration and validation tests for the etcds stack."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::fs;

use etcds_common::{CertStore, Inventory, CLIENT_IDENTITY};
use etcds_security::{verify_chain, CaWorkflow, InitOutcome};
use tempfile::tempdir;

#[test]
fn every_exported_bundle_chains_to_the_client_root() {
    let dir = tempdir().unwrap();
    let store = CertStore::new(dir.path().join("certs"));
    let inventory = Inventory::from_yaml_str(
        "a:\n  ip: 10.0.0.1\nb:\n  ip: 10.0.0.2\nc:\n  ip: etcd-c.internal\n",
        "etcds.yml",
    )
    .unwrap();

    let report = CaWorkflow::new(store.clone()).provision(&inventory).unwrap();
    assert_eq!(report.root, InitOutcome::Created);

    let client = verify_chain(&store, CLIENT_IDENTITY).unwrap();
    let client_root = fs::read(store.ca_chain(CLIENT_IDENTITY)).unwrap();
    for name in ["a", "b", "c"] {
        let chain = verify_chain(&store, name).unwrap();
        assert_eq!(chain.root_fingerprint, client.root_fingerprint, "{name}");
        assert_eq!(fs::read(store.ca_chain(name)).unwrap(), client_root, "{name}");
    }
}

#[test]
fn reprovisioning_reuses_root_and_replaces_leaves() {
    let dir = tempdir().unwrap();
    let store = CertStore::new(dir.path());
    let inventory = Inventory::from_yaml_str("a:\n  ip: 10.0.0.1\n", "etcds.yml").unwrap();

    CaWorkflow::new(store.clone()).provision(&inventory).unwrap();
    let first_leaf = fs::read(store.cert("a")).unwrap();
    let report = CaWorkflow::new(store.clone()).provision(&inventory).unwrap();

    assert_eq!(report.root, InitOutcome::Reused);
    assert_ne!(fs::read(store.cert("a")).unwrap(), first_leaf);
    verify_chain(&store, "a").unwrap();
}
