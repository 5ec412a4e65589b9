//! ---
//! etcds_section: "04-configuration-orchestration"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Node lifecycle and cluster bootstrap orchestration."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Command;

use etcds_common::{CertStore, NodeSpec};
use etcds_logging::{log_fleet_event, FleetEventOutcome, LogContext};
use tracing::debug;

use crate::error::InstallError;

const DOCKER_MACHINE: &str = "docker-machine";
const STAGING_DIR: &str = "/tmp";

/// Remote file copy and privileged execution on a managed host.
pub trait HostShell {
    fn copy_to(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), InstallError>;
    fn exec_as_root(&self, host: &str, command: &str) -> Result<(), InstallError>;
}

/// [`HostShell`] over `docker-machine scp` and `docker-machine ssh`.
#[derive(Debug, Clone)]
pub struct DockerMachine {
    program: String,
}

impl Default for DockerMachine {
    fn default() -> Self {
        Self {
            program: DOCKER_MACHINE.to_owned(),
        }
    }
}

impl DockerMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, host: &str, args: &[String]) -> Result<(), InstallError> {
        debug!(host, args = ?args, "invoking docker-machine");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| InstallError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(InstallError::Remote {
            host: host.to_owned(),
            command: args.join(" "),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

impl HostShell for DockerMachine {
    fn copy_to(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), InstallError> {
        self.run(
            host,
            &[
                "scp".to_owned(),
                local.display().to_string(),
                format!("{host}:{remote_dir}/"),
            ],
        )
    }

    fn exec_as_root(&self, host: &str, command: &str) -> Result<(), InstallError> {
        self.run(
            host,
            &[
                "ssh".to_owned(),
                host.to_owned(),
                format!("sudo -u root {command}"),
            ],
        )
    }
}

/// Copy the node's certificate triple into `host_certs_dir` on its host,
/// owned by root. Returns the installed remote paths.
pub fn install_certificates(
    shell: &dyn HostShell,
    store: &CertStore,
    node: &NodeSpec,
    host_certs_dir: &Path,
) -> Result<Vec<PathBuf>, InstallError> {
    let files = store.bundle_files(&node.name);
    if let Some(missing) = files.iter().find(|path| !path.is_file()) {
        return Err(InstallError::MissingLocal(missing.clone()));
    }

    let host = node.name.as_str();
    let mut installed = Vec::with_capacity(files.len());
    for local in &files {
        let Some(file_name) = local.file_name() else {
            return Err(InstallError::MissingLocal(local.clone()));
        };
        let staged = Path::new(STAGING_DIR).join(file_name);
        let target = host_certs_dir.join(file_name);
        shell.copy_to(host, local, STAGING_DIR)?;
        shell.exec_as_root(
            host,
            &format!("mv {} {}", staged.display(), host_certs_dir.display()),
        )?;
        shell.exec_as_root(host, &format!("chown root:root {}", target.display()))?;
        installed.push(target);
    }

    log_fleet_event(
        Some(&LogContext::new().with_node(host).with_operation("install")),
        "install.certificates",
        &format!("certificates installed to {}", host_certs_dir.display()),
        FleetEventOutcome::Success,
    );
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeShell, ShellCall};
    use std::fs;

    fn seeded_store(dir: &Path, subject: &str) -> CertStore {
        let store = CertStore::new(dir);
        for path in store.bundle_files(subject) {
            fs::write(path, "pem").unwrap();
        }
        store
    }

    #[test]
    fn installs_each_file_via_staging_then_chowns() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), "a");
        let shell = FakeShell::new();
        let installed = install_certificates(
            &shell,
            &store,
            &NodeSpec::new("a", "10.0.0.1"),
            Path::new("/etc/docker/certs.d"),
        )
        .unwrap();

        assert_eq!(
            installed,
            [
                PathBuf::from("/etc/docker/certs.d/a.ca.crt"),
                PathBuf::from("/etc/docker/certs.d/a.crt"),
                PathBuf::from("/etc/docker/certs.d/a.key"),
            ]
        );
        let calls = shell.calls();
        assert_eq!(calls.len(), 9);
        assert_eq!(
            calls[1],
            ShellCall::Exec {
                host: "a".to_owned(),
                command: "mv /tmp/a.ca.crt /etc/docker/certs.d".to_owned(),
            }
        );
        assert_eq!(
            calls[2],
            ShellCall::Exec {
                host: "a".to_owned(),
                command: "chown root:root /etc/docker/certs.d/a.ca.crt".to_owned(),
            }
        );
    }

    #[test]
    fn missing_local_bundle_copies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let shell = FakeShell::new();
        let err = install_certificates(
            &shell,
            &CertStore::new(dir.path()),
            &NodeSpec::new("a", "10.0.0.1"),
            Path::new("/etc/docker/certs.d"),
        )
        .unwrap_err();
        assert!(matches!(err, InstallError::MissingLocal(_)));
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn remote_failure_stops_that_host() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), "a");
        let shell = FakeShell::new().failing_host("a");
        let err = install_certificates(
            &shell,
            &store,
            &NodeSpec::new("a", "10.0.0.1"),
            Path::new("/etc/docker/certs.d"),
        )
        .unwrap_err();
        assert!(matches!(err, InstallError::Remote { .. }));
        assert_eq!(shell.calls().len(), 1);
    }
}
