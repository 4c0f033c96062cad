//! Replay and audit storage
//!
//! Session archives and command batches leave this node through a
//! [`ReplayStorage`] / [`CommandStorage`]. Two variants exist: the control
//! plane itself ([`ServerStorage`]) and object storage
//! ([`ObsReplayStorage`]). Neither retries; a failure is returned to the
//! caller exactly once.

pub mod command;
pub mod error;
pub mod obs;
pub mod server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ReplayStorageConfig;
use crate::model::Command;
use crate::service::ControlPlane;

pub use command::{CommandRecorder, RecorderConfig};
pub use error::StorageError;
pub use obs::ObsReplayStorage;
pub use server::{replay_id, ServerStorage};

/// File-type tag for session replays
pub const FILE_TYPE_REPLAY: &str = "replay";
/// File-type tag for transferred-file archives
pub const FILE_TYPE_FTP: &str = "file";

/// Sink for finished session archives
#[async_trait]
pub trait ReplayStorage: Send + Sync {
    /// Ship `archive` to `target`. Not retried.
    async fn upload(&self, archive: &Path, target: &str) -> Result<(), StorageError>;

    fn type_name(&self) -> &str;
}

/// Sink for command audit batches
#[async_trait]
pub trait CommandStorage: Send + Sync {
    /// Persist the whole batch in one call
    async fn bulk_save(&self, commands: &[Command]) -> Result<(), StorageError>;

    fn type_name(&self) -> &str;
}

/// Build the configured replay storage for `file_type` archives
pub fn new_replay_storage(
    config: &ReplayStorageConfig,
    file_type: &str,
    service: Arc<dyn ControlPlane>,
    timeout: Duration,
) -> Result<Arc<dyn ReplayStorage>, StorageError> {
    let storage: Arc<dyn ReplayStorage> = match config {
        ReplayStorageConfig::Server => Arc::new(ServerStorage::new("server", file_type, service)),
        ReplayStorageConfig::Obs(obs) => Arc::new(ObsReplayStorage::new(obs, timeout)?),
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::server::tests::MockControlPlane;
    use super::*;
    use crate::config::ObsConfig;

    #[test]
    fn test_new_replay_storage_variants() {
        let service = Arc::new(MockControlPlane::default());
        let timeout = Duration::from_secs(5);

        let server =
            new_replay_storage(&ReplayStorageConfig::Server, FILE_TYPE_REPLAY, service.clone(), timeout)
                .unwrap();
        assert_eq!(server.type_name(), "server");

        let obs = ReplayStorageConfig::Obs(ObsConfig {
            endpoint: "obs.example.com".to_string(),
            bucket: "replays".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            path_style: false,
        });
        let obs = new_replay_storage(&obs, FILE_TYPE_REPLAY, service, timeout).unwrap();
        assert_eq!(obs.type_name(), "obs");
    }
}
