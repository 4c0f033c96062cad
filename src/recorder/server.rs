//! Control-plane storage variant

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{CommandStorage, ReplayStorage, StorageError, FILE_TYPE_FTP, FILE_TYPE_REPLAY};
use crate::model::Command;
use crate::service::ControlPlane;

/// Record id of an archive: its file name up to the first `.`
///
/// `/tmp/8f2c91a0.cast.gz` belongs to record `8f2c91a0`.
pub fn replay_id(archive: &Path) -> Result<String, StorageError> {
    let name = archive
        .file_name()
        .ok_or_else(|| StorageError::MissingFileName(archive.to_path_buf()))?
        .to_string_lossy();
    Ok(name.split('.').next().unwrap_or_default().to_string())
}

/// Pushes archives and command batches to the control plane
pub struct ServerStorage {
    storage_type: String,
    file_type: String,
    service: Arc<dyn ControlPlane>,
}

impl ServerStorage {
    pub fn new(
        storage_type: impl Into<String>,
        file_type: impl Into<String>,
        service: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            storage_type: storage_type.into(),
            file_type: file_type.into(),
            service,
        }
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }
}

#[async_trait]
impl ReplayStorage for ServerStorage {
    async fn upload(&self, archive: &Path, _target: &str) -> Result<(), StorageError> {
        let id = replay_id(archive)?;
        match self.file_type.as_str() {
            FILE_TYPE_REPLAY => self.service.upload_replay(&id, archive).await?,
            FILE_TYPE_FTP => self.service.push_ftp_log_file(&id, archive).await?,
            other => return Err(StorageError::UnknownFileType(other.to_string())),
        }
        info!("Uploaded {} archive {} to control plane", self.file_type, id);
        Ok(())
    }

    fn type_name(&self) -> &str {
        &self.storage_type
    }
}

#[async_trait]
impl CommandStorage for ServerStorage {
    async fn bulk_save(&self, commands: &[Command]) -> Result<(), StorageError> {
        Ok(self.service.push_session_command(commands).await?)
    }

    fn type_name(&self) -> &str {
        &self.storage_type
    }
}
