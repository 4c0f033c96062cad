//! Backend connection errors

use thiserror::Error;

use crate::local::PtyError;

#[derive(Error, Debug)]
pub enum ConnError {
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    #[error("Cannot resolve OS account '{user}': {reason}")]
    Identity { user: String, reason: String },

    #[error("Login handshake failed: {0}")]
    Handshake(String),

    #[error("Connection not established")]
    NotConnected,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
