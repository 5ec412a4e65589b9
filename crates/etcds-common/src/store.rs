//! ---
//! etcds_section: "01-core-functionality"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Shared primitives and utilities for the fleet tooling."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Distinguished identity used by administrative and read clients.
pub const CLIENT_IDENTITY: &str = "client";
/// File holding the cluster bootstrap token.
pub const DISCOVERY_FILE: &str = "discovery";
const ROOT_CERT: &str = "ca.crt";
const ROOT_KEY: &str = "ca.key";

/// Canonical paths inside the certificate store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStore {
    root: PathBuf,
}

impl CertStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// `{subject}.crt`
    pub fn cert(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}.crt"))
    }

    /// `{subject}.key`
    pub fn key(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}.key"))
    }

    /// `{subject}.ca.crt`, the signer chain validating `{subject}.crt`.
    pub fn ca_chain(&self, subject: &str) -> PathBuf {
        self.root.join(format!("{subject}.ca.crt"))
    }

    pub fn root_cert(&self) -> PathBuf {
        self.root.join(ROOT_CERT)
    }

    pub fn root_key(&self) -> PathBuf {
        self.root.join(ROOT_KEY)
    }

    pub fn discovery(&self) -> PathBuf {
        self.root.join(DISCOVERY_FILE)
    }

    /// The three files a node (or the client) needs for mutual TLS.
    pub fn bundle_files(&self, subject: &str) -> [PathBuf; 3] {
        [self.ca_chain(subject), self.cert(subject), self.key(subject)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_naming_convention() {
        let store = CertStore::new("certs");
        assert_eq!(store.cert("a"), PathBuf::from("certs/a.crt"));
        assert_eq!(store.key("a"), PathBuf::from("certs/a.key"));
        assert_eq!(store.ca_chain("a"), PathBuf::from("certs/a.ca.crt"));
        assert_eq!(store.discovery(), PathBuf::from("certs/discovery"));
        assert_eq!(
            store.bundle_files(CLIENT_IDENTITY)[0],
            PathBuf::from("certs/client.ca.crt")
        );
    }
}
