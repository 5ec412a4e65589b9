//! ---
//! etcds_section: "06-security-access-control"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Certificate authority workflow and trust material."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;

/// Workflow stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaStep {
    /// Creating or loading the root.
    InitCa,
    /// Generating a keypair and certificate request.
    Issue,
    /// Signing a request with the root.
    Sign,
    /// Writing certificate, key, and chain files.
    Export,
    /// Checking an exported certificate against its chain.
    Verify,
}

impl fmt::Display for CaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaStep::InitCa => "init",
            CaStep::Issue => "issue",
            CaStep::Sign => "sign",
            CaStep::Export => "export",
            CaStep::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Fatal certificate failure; provisioning halts on the first one.
#[derive(Debug, Error)]
#[error("certificate {step} failed for {subject}: {detail}")]
pub struct CaWorkflowError {
    pub step: CaStep,
    /// Node name, `client`, or `ca` for the root.
    pub subject: String,
    pub detail: String,
}

impl CaWorkflowError {
    pub fn new(step: CaStep, subject: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self {
            step,
            subject: subject.into(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaWorkflowError>;
