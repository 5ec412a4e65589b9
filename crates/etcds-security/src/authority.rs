//! ---
//! etcds_section: "06-security-access-control"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Certificate authority workflow and trust material."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
//! Private CA driving the certificate store top-down:
//! init root, then issue, sign, and export for every node and for `client`.
//!
//! There is no rollback. A failed step is reported and the run halts; the
//! operator re-runs `init` once the cause is fixed. Re-running on an
//! initialised store reuses the existing root and re-issues every leaf,
//! replacing the leaf files wholesale.

use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::Path;

use etcds_common::{CertStore, Inventory, NodeSpec, CLIENT_IDENTITY};
use etcds_logging::{log_fleet_event, FleetEventOutcome, LogContext};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequest,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CaStep, CaWorkflowError, Result};

/// Subject used in diagnostics for root operations.
pub const ROOT_SUBJECT: &str = "ca";
const ROOT_COMMON_NAME: &str = "etcds CA";

/// What [`CaWorkflow::init_ca`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new root was generated and written.
    Created,
    /// An existing root was loaded; nothing on disk changed.
    Reused,
}

/// Subject alternative names and key usages a leaf is signed with.
///
/// The profile comes from the inventory, not from the request, so a request
/// cannot widen its own identity.
#[derive(Debug, Clone)]
pub struct CertProfile {
    pub sans: Vec<SanType>,
    pub usages: Vec<ExtendedKeyUsagePurpose>,
}

impl CertProfile {
    /// Member profile: valid for client-facing and peer traffic.
    pub fn node(node: &NodeSpec) -> Self {
        let address = match node.address.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(node.address.clone()),
        };
        let mut sans = vec![address];
        if node.name != node.address {
            sans.push(SanType::DnsName(node.name.clone()));
        }
        Self {
            sans,
            usages: vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        }
    }

    /// Administrative client profile.
    pub fn client() -> Self {
        Self {
            sans: Vec::new(),
            usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
        }
    }
}

/// Keypair plus certificate request, not yet signed.
#[derive(Debug)]
pub struct PendingCertificate {
    pub subject: String,
    pub key_pem: String,
    pub csr_pem: String,
    pub profile: CertProfile,
}

/// Certificate signed by the root, not yet written to the store.
#[derive(Debug)]
pub struct SignedCertificate {
    pub subject: String,
    pub key_pem: String,
    pub cert_pem: String,
    /// Signer certificates from issuer up to the root, PEM encoded.
    pub chain_pem: String,
}

/// Summary of a full provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub root: InitOutcome,
    /// Every subject exported, nodes first, `client` last.
    pub subjects: Vec<String>,
}

/// Certificate authority bound to one certificate store.
pub struct CaWorkflow {
    store: CertStore,
    authority: Option<Certificate>,
    root_pem: String,
}

impl CaWorkflow {
    pub fn new(store: CertStore) -> Self {
        Self {
            store,
            authority: None,
            root_pem: String::new(),
        }
    }

    pub fn store(&self) -> &CertStore {
        &self.store
    }

    /// Create the root if absent, otherwise load it.
    ///
    /// A store holding only one of `ca.crt` / `ca.key` is inconsistent and
    /// rejected. The key is claimed with create-if-absent, so of two
    /// concurrent first runs only one writes a root.
    pub fn init_ca(&mut self) -> Result<InitOutcome> {
        let fail = |detail: String| CaWorkflowError::new(CaStep::InitCa, ROOT_SUBJECT, detail);
        self.store.ensure_dir().map_err(|err| {
            fail(format!(
                "unable to create store {}: {err}",
                self.store.root().display()
            ))
        })?;

        let cert_path = self.store.root_cert();
        let key_path = self.store.root_key();
        let outcome = match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                let key_pem = read(&key_path).map_err(fail)?;
                let cert_pem = read(&cert_path).map_err(fail)?;
                let key_pair = KeyPair::from_pem(&key_pem)
                    .map_err(|err| fail(format!("unreadable root key: {err}")))?;
                let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair)
                    .map_err(|err| fail(format!("unreadable root certificate: {err}")))?;
                let authority = Certificate::from_params(params).map_err(|err| fail(err.to_string()))?;
                self.authority = Some(authority);
                self.root_pem = cert_pem;
                InitOutcome::Reused
            }
            (false, false) => {
                let authority = Certificate::from_params(root_params())
                    .map_err(|err| fail(err.to_string()))?;
                let cert_pem = authority.serialize_pem().map_err(|err| fail(err.to_string()))?;
                let key_pem = authority.serialize_private_key_pem();
                write_new(self.store.root(), &key_path, &key_pem, true).map_err(|err| {
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        fail("root key created concurrently by another run; re-run init".into())
                    } else {
                        fail(format!("unable to write {}: {err}", key_path.display()))
                    }
                })?;
                write_new(self.store.root(), &cert_path, &cert_pem, false).map_err(|err| {
                    fail(format!("unable to write {}: {err}", cert_path.display()))
                })?;
                self.authority = Some(authority);
                self.root_pem = cert_pem;
                InitOutcome::Created
            }
            (has_cert, _) => {
                let (present, missing) = if has_cert {
                    (&cert_path, &key_path)
                } else {
                    (&key_path, &cert_path)
                };
                return Err(fail(format!(
                    "store is inconsistent: {} exists but {} does not",
                    present.display(),
                    missing.display()
                )));
            }
        };

        log_fleet_event(
            Some(&LogContext::new().with_operation("ca.init")),
            "ca.init",
            match outcome {
                InitOutcome::Created => "root certificate created",
                InitOutcome::Reused => "existing root certificate reused",
            },
            FleetEventOutcome::Success,
        );
        Ok(outcome)
    }

    /// Generate a keypair and request for an inventory node.
    pub fn issue_node_certificate(&self, node: &NodeSpec) -> Result<PendingCertificate> {
        issue(&node.name, CertProfile::node(node))
    }

    /// Generate a keypair and request for the shared `client` identity.
    pub fn issue_client_certificate(&self) -> Result<PendingCertificate> {
        issue(CLIENT_IDENTITY, CertProfile::client())
    }

    /// Sign a pending request with the root.
    pub fn sign_certificate(&self, pending: PendingCertificate) -> Result<SignedCertificate> {
        let fail = |detail: String| CaWorkflowError::new(CaStep::Sign, &pending.subject, detail);
        let authority = self
            .authority
            .as_ref()
            .ok_or_else(|| fail("root not initialised; run init_ca first".into()))?;
        let mut request = CertificateSigningRequest::from_pem(&pending.csr_pem)
            .map_err(|err| fail(format!("unreadable request: {err}")))?;
        request.params.subject_alt_names = pending.profile.sans.clone();
        request.params.extended_key_usages = pending.profile.usages.clone();
        request.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        let cert_pem = request
            .serialize_pem_with_signer(authority)
            .map_err(|err| fail(err.to_string()))?;
        debug!(subject = %pending.subject, "certificate signed");
        Ok(SignedCertificate {
            subject: pending.subject,
            key_pem: pending.key_pem,
            cert_pem,
            chain_pem: self.root_pem.clone(),
        })
    }

    /// Write `{subject}.crt`, `{subject}.key`, and `{subject}.ca.crt`.
    ///
    /// Each file is replaced atomically; existing files are never patched.
    pub fn export_certificate(&self, signed: &SignedCertificate) -> Result<()> {
        let subject = signed.subject.as_str();
        let root = self.store.root();
        let files = [
            (self.store.key(subject), signed.key_pem.as_str(), true),
            (self.store.cert(subject), signed.cert_pem.as_str(), false),
            (self.store.ca_chain(subject), signed.chain_pem.as_str(), false),
        ];
        for (path, contents, private) in files {
            write_replace(root, &path, contents, private).map_err(|err| {
                CaWorkflowError::new(
                    CaStep::Export,
                    subject,
                    format!("unable to write {}: {err}", path.display()),
                )
            })?;
        }
        log_fleet_event(
            Some(&LogContext::new().with_node(subject).with_operation("ca.export")),
            "ca.export",
            "certificate, key, and chain exported",
            FleetEventOutcome::Success,
        );
        Ok(())
    }

    /// Run the whole workflow: root, every node in inventory order, then `client`.
    pub fn provision(&mut self, inventory: &Inventory) -> Result<ProvisionReport> {
        let root = self.init_ca()?;
        let mut subjects = Vec::with_capacity(inventory.len() + 1);
        for node in inventory.nodes() {
            let pending = self.issue_node_certificate(node)?;
            let signed = self.sign_certificate(pending)?;
            self.export_certificate(&signed)?;
            subjects.push(node.name.clone());
        }
        let pending = self.issue_client_certificate()?;
        let signed = self.sign_certificate(pending)?;
        self.export_certificate(&signed)?;
        subjects.push(CLIENT_IDENTITY.to_owned());
        Ok(ProvisionReport { root, subjects })
    }
}

fn root_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, ROOT_COMMON_NAME);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

fn issue(subject: &str, profile: CertProfile) -> Result<PendingCertificate> {
    let fail = |detail: String| CaWorkflowError::new(CaStep::Issue, subject, detail);
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, subject);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.subject_alt_names = profile.sans.clone();
    let request = Certificate::from_params(params).map_err(|err| fail(err.to_string()))?;
    let csr_pem = request
        .serialize_request_pem()
        .map_err(|err| fail(err.to_string()))?;
    Ok(PendingCertificate {
        subject: subject.to_owned(),
        key_pem: request.serialize_private_key_pem(),
        csr_pem,
        profile,
    })
}

fn read(path: &Path) -> std::result::Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("unable to read {}: {err}", path.display()))
}

fn staged(dir: &Path, contents: &str, private: bool) -> io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !private {
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;
    Ok(tmp)
}

/// Atomic create-if-absent; fails with `AlreadyExists` when `path` is taken.
fn write_new(dir: &Path, path: &Path, contents: &str, private: bool) -> io::Result<()> {
    staged(dir, contents, private)?
        .persist_noclobber(path)
        .map(|_| ())
        .map_err(|err| err.error)
}

fn write_replace(dir: &Path, path: &Path, contents: &str, private: bool) -> io::Result<()> {
    staged(dir, contents, private)?
        .persist(path)
        .map(|_| ())
        .map_err(|err| err.error)
}
