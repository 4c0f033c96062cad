//! Control-plane boundary
//!
//! Everything this node asks of the central control plane goes through the
//! two traits here. [`client`] holds the HTTP implementations; tests and
//! storage code depend on the traits only.

pub mod auth;
pub mod client;
pub mod error;

use std::path::Path;

use async_trait::async_trait;

use crate::model::{AccessKey, Command, FtpLog};

pub use client::{JmsService, JmsServiceBuilder, RegistrationClient};
pub use error::ServiceError;

/// Node identity calls, usable before the node holds a valid key
#[async_trait]
pub trait TerminalRegistration: Send + Sync {
    /// Register this node and obtain a fresh access key
    async fn register_terminal_account(
        &self,
        name: &str,
        bootstrap_token: &str,
    ) -> Result<AccessKey, ServiceError>;

    /// Check `key` against the control plane. A rejected key is reported as
    /// [`ServiceError::Unauthorized`], distinct from transport failures.
    async fn valid_access_key(&self, key: &AccessKey) -> Result<(), ServiceError>;
}

/// Authenticated audit ingestion
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn upload_replay(&self, id: &str, archive: &Path) -> Result<(), ServiceError>;

    async fn push_ftp_log_file(&self, id: &str, archive: &Path) -> Result<(), ServiceError>;

    /// Ingest a whole batch in one request
    async fn push_session_command(&self, commands: &[Command]) -> Result<(), ServiceError>;

    async fn create_ftp_log(&self, log: &FtpLog) -> Result<(), ServiceError>;
}
