//! Replay/audit storage errors

use std::path::PathBuf;

use thiserror::Error;

use crate::service::ServiceError;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Configuration error: the storage was built for a file type it cannot route
    #[error("Cannot match file type '{0}' of server storage")]
    UnknownFileType(String),

    #[error("Control plane error: {0}")]
    Service(#[from] ServiceError),

    #[error("Object storage returned HTTP {status}: {body}")]
    Obs { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive path has no file name: {0:?}")]
    MissingFileName(PathBuf),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Invalid object storage endpoint: {0}")]
    InvalidEndpoint(String),
}
