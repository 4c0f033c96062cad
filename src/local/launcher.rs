//! Launcher seam
//!
//! Connection strategies start processes through [`ProcessLauncher`] so the
//! handshake logic can be driven by scripted processes in tests.

use std::io::{Read, Write};

use super::pty::{LaunchConfig, LocalCommand, PtyError};

/// A running PTY-attached process
pub trait PtyProcess: Read + Write + Send {
    /// Resize the terminal the process is attached to
    fn set_win_size(&mut self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Terminate and reap the process. Idempotent.
    fn close(&mut self) -> Result<(), PtyError>;
}

/// Starts PTY-attached processes
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        program: &str,
        args: &[String],
        config: &LaunchConfig,
    ) -> Result<Box<dyn PtyProcess>, PtyError>;
}

impl PtyProcess for LocalCommand {
    fn set_win_size(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        LocalCommand::set_win_size(self, cols, rows)
    }

    fn close(&mut self) -> Result<(), PtyError> {
        LocalCommand::close(self)
    }
}

/// Launches real processes on OS pseudo-terminals
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLauncher;

impl ProcessLauncher for NativeLauncher {
    fn launch(
        &self,
        program: &str,
        args: &[String],
        config: &LaunchConfig,
    ) -> Result<Box<dyn PtyProcess>, PtyError> {
        Ok(Box::new(LocalCommand::spawn(program, args, config)?))
    }
}
