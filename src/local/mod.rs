//! Local process support
//!
//! Starts child processes attached to pseudo-terminals, optionally under an
//! alternate OS identity. Backend connections drive their client programs
//! through this module.

pub mod launcher;
pub mod pty;

pub use launcher::{NativeLauncher, ProcessLauncher, PtyProcess};
pub use pty::{resolve_program, Credential, LaunchConfig, LocalCommand, PtyError};
