//! DB2 helper script provisioning
//!
//! The namespace strategy drives the DB2 client through four small shell
//! wrappers that `su` into the instance owner. They are written once per
//! process into a working directory and reused by every session.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{error, info};

const SHELL_FILENAME: &str = "db2";
const CATALOG_NODE_FILENAME: &str = "db2catalognode";
const UNCATALOG_NODE_FILENAME: &str = "db2uncatalognode";
const CATALOG_DB_FILENAME: &str = "db2catalogdb";

const SCRIPT_MODE: u32 = 0o755;

const SHELL_TEMPLATE: &str = r#"#!/bin/bash
set -e
exec su - db2inst1 /bin/bash --command="db2"
"#;

const CATALOG_NODE_TEMPLATE: &str = r#"#!/bin/bash
set -e
exec su - db2inst1 /bin/bash --command="db2 catalog tcpip node ${NODENAME} remote ${HOSTNAME} server ${PORT}"
"#;

const UNCATALOG_NODE_TEMPLATE: &str = r#"#!/bin/bash
set -e
exec su - db2inst1 /bin/bash --command="db2 uncatalog node ${NODENAME}"
"#;

const CATALOG_DB_TEMPLATE: &str = r#"#!/bin/bash
set -e
exec su - db2inst1 /bin/bash --command="db2 catalog db ${DATABASE} at node ${NODENAME}"
"#;

/// Resolved helper locations; `None` means that helper is unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperPaths {
    pub shell: Option<PathBuf>,
    pub catalog_node: Option<PathBuf>,
    pub uncatalog_node: Option<PathBuf>,
    pub catalog_db: Option<PathBuf>,
}

/// Every helper the namespace strategy needs, all present
#[derive(Debug, Clone, Copy)]
pub struct NamespaceHelpers<'a> {
    pub shell: &'a Path,
    pub catalog_node: &'a Path,
    pub uncatalog_node: &'a Path,
    pub catalog_db: &'a Path,
}

impl HelperPaths {
    pub fn namespace_ready(&self) -> Option<NamespaceHelpers<'_>> {
        Some(NamespaceHelpers {
            shell: self.shell.as_deref()?,
            catalog_node: self.catalog_node.as_deref()?,
            uncatalog_node: self.uncatalog_node.as_deref()?,
            catalog_db: self.catalog_db.as_deref()?,
        })
    }
}

/// Writes the helper scripts exactly once per provisioner
///
/// Share one instance (behind an `Arc`) between all DB2 connections. The
/// first caller of [`ensure_provisioned`](Self::ensure_provisioned) does the
/// work; concurrent callers block until it finishes and see the same paths.
#[derive(Debug)]
pub struct HelperProvisioner {
    dir: PathBuf,
    paths: OnceLock<HelperPaths>,
}

impl HelperProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: OnceLock::new(),
        }
    }

    /// Provision into the current working directory
    pub fn in_current_dir() -> io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_provisioned(&self) -> &HelperPaths {
        self.paths.get_or_init(|| self.provision())
    }

    fn provision(&self) -> HelperPaths {
        if !cfg!(target_os = "linux") {
            info!("DB2 helper scripts are only provisioned on Linux");
            return HelperPaths::default();
        }

        HelperPaths {
            shell: self.ensure_script(SHELL_FILENAME, SHELL_TEMPLATE),
            catalog_node: self.ensure_script(CATALOG_NODE_FILENAME, CATALOG_NODE_TEMPLATE),
            uncatalog_node: self.ensure_script(UNCATALOG_NODE_FILENAME, UNCATALOG_NODE_TEMPLATE),
            catalog_db: self.ensure_script(CATALOG_DB_FILENAME, CATALOG_DB_TEMPLATE),
        }
    }

    /// Reuse an existing script or write the template. A failure only
    /// leaves this one path unresolved.
    fn ensure_script(&self, filename: &str, template: &str) -> Option<PathBuf> {
        let path = self.dir.join(filename);
        if path.is_file() {
            info!("DB2 helper already present: {:?}", path);
            return Some(path);
        }

        match write_script(&path, template) {
            Ok(()) => {
                info!("Initialized DB2 helper: {:?}", path);
                Some(path)
            }
            // Another process won the race
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_file() => Some(path),
            Err(e) => {
                error!("Failed to initialize DB2 helper {:?}: {}", path, e);
                None
            }
        }
    }
}

fn write_script(path: &Path, template: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SCRIPT_MODE)
        .open(path)?;
    file.write_all(template.as_bytes())?;
    file.sync_all()?;
    // umask may have stripped bits from the create mode
    fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE))
}
