//! ---
//! etcds_section: "06-security-access-control"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Certificate authority workflow and trust material."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Trust material for an etcd fleet: one private root, a certificate triple
//! per member, and a shared `client` identity, all chaining to that root.

pub mod authority;
pub mod error;
pub mod verify;

pub use authority::{
    CaWorkflow, CertProfile, InitOutcome, PendingCertificate, ProvisionReport, SignedCertificate,
};
pub use error::{CaStep, CaWorkflowError};
pub use verify::{verify_chain, ChainReport};
