//! Backend server connections
//!
//! Every protocol backend hands the terminal layer a [`ServerConnection`]:
//! a raw byte stream plus resize, keepalive and close. Backends hide their
//! own process, credential and handshake details behind it.

pub mod db2;
pub mod error;
pub mod options;

use std::fmt::Display;
use std::io::{Read, Write};

pub use db2::{Db2Conn, Db2Settings, HelperPaths, HelperProvisioner};
pub use error::ConnError;
pub use options::{ConnectionOptions, SqlOption};

/// Uniform surface of a connected backend
///
/// Reads and writes go straight to the underlying terminal stream. A
/// connection is owned by exactly one session, which serializes its I/O and
/// only closes once reading and writing have stopped.
pub trait ServerConnection: Read + Write + Send {
    /// Forward a terminal resize. No-op when there is no real terminal.
    fn set_win_size(&mut self, width: u16, height: u16) -> Result<(), ConnError>;

    /// Called periodically by the owning session
    fn keep_alive(&mut self) -> Result<(), ConnError>;

    /// Log out (best effort) and release the process and its PTY.
    /// Calling it again, or on a connection that never came up, is a no-op.
    fn close(&mut self) -> Result<(), ConnError>;
}

/// Terminal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub width: u16,
    pub height: u16,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

/// Discard the outcome of an advisory step
///
/// Catalog helpers, handshake drains and logout writes are best effort: their
/// failures are logged at debug level and never reach the session layer.
pub fn ignore_err<T, E: Display>(context: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Ignored error during {}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_err() {
        assert_eq!(ignore_err::<_, String>("ok", Ok(3)), Some(3));
        assert_eq!(ignore_err::<u8, _>("fail", Err("boom")), None);
    }

    #[test]
    fn test_windows_default() {
        let win = Windows::default();
        assert_eq!((win.width, win.height), (80, 24));
    }
}
