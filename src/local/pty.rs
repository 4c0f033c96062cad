//! PTY-attached local processes
//!
//! Spawns a child process with its standard streams bound to the slave side
//! of a freshly opened pseudo-terminal, optionally under another uid/gid.
//! The returned [`LocalCommand`] owns the master side and the child; closing
//! it terminates and reaps the process.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Program not found or not executable: {0}")]
    NotFound(String),

    #[error("Failed to create PTY: {0}")]
    CreateFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Process already closed")]
    Closed,
}

/// Numeric OS identity to run the child under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
}

/// Configuration for launching a PTY-attached process
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub cols: u16,
    pub rows: u16,
    /// Replacement environment (`KEY=VALUE` entries). `None` inherits ours.
    pub env: Option<Vec<String>>,
    /// Run the child as this uid/gid
    pub credential: Option<Credential>,
    /// How long `close()` waits after SIGHUP before escalating to SIGKILL
    pub close_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            env: None,
            credential: None,
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl LaunchConfig {
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

/// A child process running on a pseudo-terminal
///
/// Not safe for concurrent use: the owning session serializes its own I/O
/// and only closes once all readers/writers have stopped.
pub struct LocalCommand {
    program: PathBuf,
    child: Child,
    reader: File,
    writer: File,
    close_timeout: Duration,
    closed: bool,
}

impl LocalCommand {
    /// Spawn `program` with `args` on a new PTY
    pub fn spawn(program: &str, args: &[String], config: &LaunchConfig) -> Result<Self, PtyError> {
        let program = resolve_program(program)?;

        let winsize = Winsize {
            ws_row: config.rows,
            ws_col: config.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pair = openpty(&winsize, None).map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        // Keep the master out of the child
        fcntl(pair.master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(stdio_from(&pair.slave)?)
            .stdout(stdio_from(&pair.slave)?)
            .stderr(stdio_from(&pair.slave)?);

        if let Some(env) = &config.env {
            cmd.env_clear();
            for entry in env {
                match entry.split_once('=') {
                    Some((key, value)) => cmd.env(key, value),
                    None => cmd.env(entry, ""),
                };
            }
        }

        if let Some(cred) = config.credential {
            cmd.uid(cred.uid).gid(cred.gid);
        }

        // Safety: only async-signal-safe calls run between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            tracing::error!("Failed to spawn {:?}: {}", program, e);
            PtyError::SpawnFailed(format!("{}: {}", program.display(), e))
        })?;

        // The child holds its own copies of the slave now
        drop(pair.slave);

        tracing::info!("Spawned {:?} on PTY, PID: {}", program, child.id());

        let reader = File::from(pair.master);
        let writer = reader.try_clone()?;

        Ok(Self {
            program,
            child,
            reader,
            writer,
            close_timeout: config.close_timeout,
            closed: false,
        })
    }

    /// Resize the PTY
    pub fn set_win_size(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let ws = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let ret = unsafe {
            libc::ioctl(
                self.writer.as_raw_fd(),
                libc::TIOCSWINSZ as _,
                &ws as *const libc::winsize,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Get the process ID of the child
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Check if the child process is still running
    pub fn is_alive(&mut self) -> bool {
        !self.closed && matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate and reap the child
    ///
    /// Sends SIGHUP to the child's process group, waits up to the configured
    /// close timeout, then SIGKILLs the group. Always reaps. Safe to call
    /// more than once.
    pub fn close(&mut self) -> Result<(), PtyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The child called setsid(), so its pid is also its process group id
        let pgid = Pid::from_raw(self.child.id() as i32);

        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!("PTY child {:?} already exited: {}", self.program, status);
            return Ok(());
        }

        if let Err(e) = killpg(pgid, Signal::SIGHUP) {
            tracing::debug!("SIGHUP to process group {} failed: {}", pgid, e);
        }

        let deadline = Instant::now() + self.close_timeout;
        loop {
            match self.child.try_wait()? {
                Some(status) => {
                    tracing::debug!("PTY child {:?} exited: {}", self.program, status);
                    return Ok(());
                }
                None if Instant::now() >= deadline => break,
                None => std::thread::sleep(Duration::from_millis(20)),
            }
        }

        tracing::warn!(
            "PTY child {:?} (PID {}) ignored SIGHUP, killing",
            self.program,
            pgid
        );
        if killpg(pgid, Signal::SIGKILL).is_err() {
            // May have left its group; fall back to the pid itself
            let _ = kill(pgid, Signal::SIGKILL);
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Read for LocalCommand {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        match self.reader.read(buf) {
            // Linux reports EIO on the master once every slave fd is gone
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

impl Write for LocalCommand {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, PtyError::Closed));
        }
        let n = self.writer.write(buf)?;
        self.writer.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for LocalCommand {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close PTY child {:?}: {}", self.program, e);
        }
    }
}

fn stdio_from(fd: &OwnedFd) -> Result<Stdio, PtyError> {
    Ok(Stdio::from(fd.try_clone()?))
}

/// Resolve a program name against our own `PATH`
///
/// The child may run with a replaced environment that has no `PATH`, so
/// lookup happens here, before the environment is swapped.
pub fn resolve_program(program: &str) -> Result<PathBuf, PtyError> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(PtyError::NotFound(program.to_string()))
        };
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| PtyError::NotFound(program.to_string()))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
