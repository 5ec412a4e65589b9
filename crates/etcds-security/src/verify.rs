//! ---
//! etcds_section: "06-security-access-control"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Certificate authority workflow and trust material."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::fs;

use etcds_common::CertStore;
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

use crate::error::{CaStep, CaWorkflowError, Result};

/// Result of checking `{subject}.crt` against `{subject}.ca.crt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub subject: String,
    /// SHA-256 of the root certificate DER.
    pub root_fingerprint: String,
}

/// Verify that an exported certificate chains to the root in its chain file.
pub fn verify_chain(store: &CertStore, subject: &str) -> Result<ChainReport> {
    let fail = |detail: String| CaWorkflowError::new(CaStep::Verify, subject, detail);
    let leaf_path = store.cert(subject);
    let chain_path = store.ca_chain(subject);
    let leaf_raw = fs::read(&leaf_path)
        .map_err(|err| fail(format!("unable to read {}: {err}", leaf_path.display())))?;
    let chain_raw = fs::read(&chain_path)
        .map_err(|err| fail(format!("unable to read {}: {err}", chain_path.display())))?;

    let (_, leaf_pem) =
        parse_x509_pem(&leaf_raw).map_err(|err| fail(format!("leaf is not PEM: {err}")))?;
    let (_, root_pem) =
        parse_x509_pem(&chain_raw).map_err(|err| fail(format!("chain is not PEM: {err}")))?;
    let leaf = leaf_pem
        .parse_x509()
        .map_err(|err| fail(format!("leaf is not X.509: {err}")))?;
    let root = root_pem
        .parse_x509()
        .map_err(|err| fail(format!("chain root is not X.509: {err}")))?;

    if !root.is_ca() {
        return Err(fail("chain root is not a CA certificate".into()));
    }
    leaf.verify_signature(Some(root.public_key()))
        .map_err(|err| fail(format!("signature does not verify against root: {err}")))?;
    if !leaf.validity().is_valid() {
        return Err(fail("certificate is outside its validity window".into()));
    }

    Ok(ChainReport {
        subject: subject.to_owned(),
        root_fingerprint: fingerprint(&root_pem.contents),
    })
}

fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::CaWorkflow;
    use etcds_common::{Inventory, CLIENT_IDENTITY};

    #[test]
    fn every_subject_shares_the_client_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        let inventory =
            Inventory::from_yaml_str("a:\n  ip: 10.0.0.1\nb:\n  ip: 10.0.0.2\n", "etcds.yml")
                .unwrap();
        CaWorkflow::new(store.clone()).provision(&inventory).unwrap();

        let client = verify_chain(&store, CLIENT_IDENTITY).unwrap();
        for node in ["a", "b"] {
            let report = verify_chain(&store, node).unwrap();
            assert_eq!(report.root_fingerprint, client.root_fingerprint);
            assert_eq!(
                fs::read(store.ca_chain(node)).unwrap(),
                fs::read(store.ca_chain(CLIENT_IDENTITY)).unwrap()
            );
        }
    }

    #[test]
    fn foreign_root_is_rejected() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let inventory = Inventory::from_yaml_str("a:\n  ip: 10.0.0.1\n", "etcds.yml").unwrap();
        let store_a = CertStore::new(first.path());
        let store_b = CertStore::new(second.path());
        CaWorkflow::new(store_a.clone()).provision(&inventory).unwrap();
        CaWorkflow::new(store_b.clone()).provision(&inventory).unwrap();

        fs::copy(store_b.ca_chain("a"), store_a.ca_chain("a")).unwrap();
        let err = verify_chain(&store_a, "a").unwrap_err();
        assert_eq!(err.step, CaStep::Verify);
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_chain(&CertStore::new(dir.path()), "a").unwrap_err();
        assert!(err.detail.contains("unable to read"));
    }
}
