//! Control-plane client errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The control plane rejected our credentials (HTTP 401)
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Control plane returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Client option not set: {0}")]
    MissingOption(&'static str),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
