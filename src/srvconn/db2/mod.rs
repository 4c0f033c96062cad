//! DB2 backend
//!
//! Connects an operator to a remote DB2 database by driving the local `db2`
//! command line client on a PTY. Establishment tries, in order:
//!
//! 1. **Namespace**: catalog the remote node and database with the helper
//!    scripts, then start the client in a private pid/mount namespace so the
//!    catalog stays local to this session.
//! 2. **Privilege-dropped**: start the client directly as an unprivileged
//!    account (`nobody` by default).
//!
//! Whichever process starts is then logged in by typing a `connect to`
//! line. Prompt and response framing is by fixed buffer sizes, not parsing:
//! the catalog prompt is 8 bytes, the catalog-db response 1024 bytes, and the
//! login drain is exactly as long as the login line.

pub mod provision;

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::User;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{ignore_err, ConnError, ConnectionOptions, ServerConnection, Windows};
use crate::local::{Credential, LaunchConfig, ProcessLauncher, PtyProcess};

pub use provision::{HelperPaths, HelperProvisioner, NamespaceHelpers};

/// Catalog-node answer when the node exists under another definition
pub const NODE_ALREADY_CATALOGED: &[u8] = b"SQL1018N";

const PROMPT_LEN: usize = 8;
const CATALOG_DB_RESPONSE_LEN: usize = 1024;
const LOGOUT_COMMAND: &[u8] = b"quit\r\n";

/// DB2 backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Db2Settings {
    /// Client program for the privilege-dropped strategy
    pub client_program: String,
    /// Unprivileged account the client runs as when namespaces are unavailable
    pub fallback_user: String,
    /// Namespace-fork wrapper (`unshare`) used by the namespace strategy
    pub namespace_wrapper: String,
    /// Grace period for the client to exit after hangup
    pub close_timeout_secs: u64,
}

impl Default for Db2Settings {
    fn default() -> Self {
        Self {
            client_program: "db2".to_string(),
            fallback_user: "nobody".to_string(),
            namespace_wrapper: "unshare".to_string(),
            close_timeout_secs: 10,
        }
    }
}

/// A DB2 session on a local PTY
pub struct Db2Conn {
    options: ConnectionOptions,
    settings: Db2Settings,
    provisioner: Arc<HelperProvisioner>,
    launcher: Arc<dyn ProcessLauncher>,
    process: Option<Box<dyn PtyProcess>>,
}

impl Db2Conn {
    pub fn new(
        options: ConnectionOptions,
        settings: Db2Settings,
        provisioner: Arc<HelperProvisioner>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            options,
            settings,
            provisioner,
            launcher,
            process: None,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.process.is_some()
    }

    /// Start the client and log in
    ///
    /// No retry happens here; a failed attempt leaves the connection closed
    /// and the caller decides whether to try again.
    pub fn connect(&mut self, win: Windows) -> Result<(), ConnError> {
        let config = self.launch_config(win);

        let started = match self.provisioner.ensure_provisioned().namespace_ready() {
            Some(helpers) => self.start_namespace(helpers, &config).or_else(|e| {
                warn!(
                    "DB2 namespace start failed for {}: {}, falling back to {}",
                    self.options.host(),
                    e,
                    self.settings.fallback_user
                );
                self.start_privilege_dropped(&config)
            }),
            None => {
                info!("DB2 helpers unavailable, starting client as {}", self.settings.fallback_user);
                self.start_privilege_dropped(&config)
            }
        };

        let process = started.map_err(|e| {
            error!("Start db2 command failed: {}", e);
            e
        })?;
        let mut process = self.manual_login(process)?;

        ignore_err("initial resize", process.set_win_size(win.width, win.height));
        self.process = Some(process);
        info!("Connected db2 database {} on {}", self.options.db_name(), self.options.host());
        Ok(())
    }

    fn launch_config(&self, win: Windows) -> LaunchConfig {
        LaunchConfig::default()
            .with_size(win.width, win.height)
            .with_env(self.options.envs())
            .with_close_timeout(Duration::from_secs(self.settings.close_timeout_secs))
    }

    /// Catalog node and database with the helpers, then start the client in
    /// a fresh pid/mount namespace. Only the final start can fail this
    /// strategy; the catalog steps are advisory.
    fn start_namespace(
        &self,
        helpers: NamespaceHelpers<'_>,
        config: &LaunchConfig,
    ) -> Result<Box<dyn PtyProcess>, ConnError> {
        let args = self.options.command_args();

        let mut prompt = [0u8; PROMPT_LEN];
        let n = self.run_helper(helpers.catalog_node, &args, config, &mut prompt);
        if &prompt[..n] == NODE_ALREADY_CATALOGED {
            info!(
                "Node {} already cataloged, recataloging",
                self.options.node_name()
            );
            self.run_helper(helpers.uncatalog_node, &args, config, &mut []);
            self.run_helper(helpers.catalog_node, &args, config, &mut []);
        }

        let mut response = [0u8; CATALOG_DB_RESPONSE_LEN];
        self.run_helper(helpers.catalog_db, &args, config, &mut response);

        let argv = vec![
            "--fork".to_string(),
            "--pid".to_string(),
            "--mount-proc".to_string(),
            helpers.shell.display().to_string(),
        ];
        Ok(self
            .launcher
            .launch(&self.settings.namespace_wrapper, &argv, config)?)
    }

    /// Run a helper once, then close it.
    ///
    /// A non-empty `buf` gets one read first, which blocks until the helper
    /// prints or exits; a silent helper stalls the connect for that long.
    /// An empty `buf` closes without reading. Returns the bytes read; every
    /// failure is swallowed.
    fn run_helper(
        &self,
        helper: &std::path::Path,
        args: &[String],
        config: &LaunchConfig,
        buf: &mut [u8],
    ) -> usize {
        let context = helper.display().to_string();
        let Some(mut process) = ignore_err(&context, self.launcher.launch(&context, args, config))
        else {
            return 0;
        };

        let n = if buf.is_empty() {
            0
        } else {
            ignore_err(&context, process.read(buf)).unwrap_or(0)
        };
        ignore_err(&context, process.close());
        n
    }

    fn start_privilege_dropped(
        &self,
        config: &LaunchConfig,
    ) -> Result<Box<dyn PtyProcess>, ConnError> {
        let credential = resolve_identity(&self.settings.fallback_user)?;
        let config = config.clone().with_credential(credential);
        Ok(self.launcher.launch(
            &self.settings.client_program,
            &self.options.command_args(),
            &config,
        )?)
    }

    /// Type the `connect to` line and drain a same-sized response
    ///
    /// The drain is not parsed: a rejected password still counts as
    /// connected. Known error signatures in the drained bytes are logged.
    fn manual_login(
        &self,
        mut process: Box<dyn PtyProcess>,
    ) -> Result<Box<dyn PtyProcess>, ConnError> {
        let cmd = self.options.login_command();

        if let Err(e) = process.write_all(cmd.as_bytes()) {
            error!("DB2 login write failed: {}", e);
            ignore_err("close after failed login", process.close());
            return Err(ConnError::Handshake(e.to_string()));
        }

        let mut response = vec![0u8; cmd.len()];
        if let Some(n) = ignore_err("login response drain", process.read(&mut response)) {
            if let Some(code) = sql_error_code(&response[..n]) {
                warn!(
                    "DB2 login response for {} carried {}, session continues",
                    self.options.db_name(),
                    code
                );
            }
        }

        Ok(process)
    }
}

/// Look up a local account's uid/gid by name
pub fn resolve_identity(name: &str) -> Result<Credential, ConnError> {
    let user = User::from_name(name)
        .map_err(|e| ConnError::Identity {
            user: name.to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| ConnError::Identity {
            user: name.to_string(),
            reason: "no such account".to_string(),
        })?;

    Ok(Credential {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
    })
}

/// First `SQLnnnnN` style error code in `bytes`
fn sql_error_code(bytes: &[u8]) -> Option<String> {
    bytes.windows(8).find_map(|w| {
        let is_code = w.starts_with(b"SQL")
            && w[3..7].iter().all(u8::is_ascii_digit)
            && w[7] == b'N';
        is_code.then(|| String::from_utf8_lossy(w).into_owned())
    })
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ConnError::NotConnected)
}

impl Read for Db2Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.process.as_mut().ok_or_else(not_connected)?.read(buf)
    }
}

impl Write for Db2Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.process.as_mut().ok_or_else(not_connected)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.process.as_mut().ok_or_else(not_connected)?.flush()
    }
}

impl ServerConnection for Db2Conn {
    fn set_win_size(&mut self, width: u16, height: u16) -> Result<(), ConnError> {
        match self.process.as_mut() {
            Some(process) => Ok(process.set_win_size(width, height)?),
            None => Ok(()),
        }
    }

    fn keep_alive(&mut self) -> Result<(), ConnError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        ignore_err("db2 logout", process.write_all(LOGOUT_COMMAND));
        process.close()?;
        info!("Closed db2 connection to {}", self.options.host());
        Ok(())
    }
}

impl Drop for Db2Conn {
    fn drop(&mut self) {
        ignore_err("db2 close on drop", ServerConnection::close(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::PtyError;
    use crate::srvconn::SqlOption;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    #[derive(Debug, Clone)]
    struct Launch {
        program: String,
        args: Vec<String>,
        env: Option<Vec<String>>,
        credential: Option<Credential>,
    }

    #[derive(Default)]
    struct Journal {
        launches: Vec<Launch>,
        /// Program of every process read from, once per read
        reads: Vec<String>,
        writes: Vec<Vec<u8>>,
        closes: usize,
    }

    /// Canned behaviour for a program name
    #[derive(Clone, Default)]
    struct Script {
        output: Vec<Vec<u8>>,
        fail_spawn: bool,
        fail_write: bool,
    }

    struct ScriptedProcess {
        program: String,
        output: VecDeque<Vec<u8>>,
        fail_write: bool,
        journal: Arc<Mutex<Journal>>,
        closed: bool,
    }

    impl Read for ScriptedProcess {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.journal.lock().reads.push(self.program.clone());
            match self.output.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptedProcess {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pty gone"));
            }
            self.journal.lock().writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PtyProcess for ScriptedProcess {
        fn set_win_size(&mut self, _cols: u16, _rows: u16) -> Result<(), PtyError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), PtyError> {
            if !self.closed {
                self.closed = true;
                self.journal.lock().closes += 1;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedLauncher {
        scripts: HashMap<String, Script>,
        journal: Arc<Mutex<Journal>>,
    }

    impl ScriptedLauncher {
        fn script(mut self, program: impl Into<String>, script: Script) -> Self {
            self.scripts.insert(program.into(), script);
            self
        }

        fn launched(&self) -> Vec<String> {
            self.journal
                .lock()
                .launches
                .iter()
                .map(|l| l.program.clone())
                .collect()
        }
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(
            &self,
            program: &str,
            args: &[String],
            config: &LaunchConfig,
        ) -> Result<Box<dyn PtyProcess>, PtyError> {
            self.journal.lock().launches.push(Launch {
                program: program.to_string(),
                args: args.to_vec(),
                env: config.env.clone(),
                credential: config.credential,
            });
            let script = self.scripts.get(program).cloned().unwrap_or_default();
            if script.fail_spawn {
                return Err(PtyError::NotFound(program.to_string()));
            }
            Ok(Box::new(ScriptedProcess {
                program: program.to_string(),
                output: script.output.into(),
                fail_write: script.fail_write,
                journal: self.journal.clone(),
                closed: false,
            }))
        }
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions::new([
            SqlOption::Username("db2user".to_string()),
            SqlOption::Password("s3cret".to_string()),
            SqlOption::Host("10.0.0.5".to_string()),
            SqlOption::Port(50000),
            SqlOption::DbName("SAMPLEDB".to_string()),
        ])
    }

    fn settings() -> Db2Settings {
        // root exists on every unix host
        Db2Settings {
            fallback_user: "root".to_string(),
            ..Db2Settings::default()
        }
    }

    fn unprovisioned() -> (tempfile::TempDir, Arc<HelperProvisioner>) {
        let temp = tempfile::tempdir().unwrap();
        let provisioner = HelperProvisioner::new(temp.path().join("missing"));
        (temp, Arc::new(provisioner))
    }

    fn conn(
        provisioner: Arc<HelperProvisioner>,
        launcher: Arc<ScriptedLauncher>,
        settings: Db2Settings,
    ) -> Db2Conn {
        Db2Conn::new(options(), settings, provisioner, launcher)
    }

    #[test]
    fn test_sql_error_code() {
        assert_eq!(
            sql_error_code(b"\r\nSQL30082N  Security processing failed"),
            Some("SQL30082N".to_string())
        );
        assert_eq!(sql_error_code(b"Database Connection Information"), None);
        assert_eq!(sql_error_code(b"SQL12"), None);
    }

    #[test]
    fn test_resolve_identity() {
        let root = resolve_identity("root").unwrap();
        assert_eq!(root.uid, 0);

        let err = resolve_identity("no-such-bastion-account").unwrap_err();
        assert!(matches!(err, ConnError::Identity { .. }));
    }

    #[test]
    fn test_unprovisioned_goes_straight_to_privilege_dropped() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut db2 = conn(provisioner, launcher.clone(), settings());

        db2.connect(Windows::default()).unwrap();

        let journal = launcher.journal.lock();
        assert_eq!(journal.launches.len(), 1);
        let launch = &journal.launches[0];
        assert_eq!(launch.program, "db2");
        assert_eq!(launch.args, options().command_args());
        assert_eq!(launch.env, Some(options().envs()));
        assert_eq!(launch.credential, Some(Credential { uid: 0, gid: 0 }));
        assert_eq!(
            journal.writes,
            vec![b"connect to SAMPLEDB user db2user using s3cret\n".to_vec()]
        );
    }

    #[test]
    fn test_unknown_fallback_user_fails_connect() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default());
        let settings = Db2Settings {
            fallback_user: "no-such-bastion-account".to_string(),
            ..Db2Settings::default()
        };
        let mut db2 = conn(provisioner, launcher.clone(), settings);

        let err = db2.connect(Windows::default()).unwrap_err();
        assert!(matches!(err, ConnError::Identity { .. }));
        assert!(launcher.launched().is_empty());
        assert!(!db2.is_connected());
    }

    #[test]
    fn test_spawn_failure_surfaces() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default().script(
            "db2",
            Script {
                fail_spawn: true,
                ..Script::default()
            },
        ));
        let mut db2 = conn(provisioner, launcher, settings());

        let err = db2.connect(Windows::default()).unwrap_err();
        assert!(matches!(err, ConnError::Pty(PtyError::NotFound(_))));
    }

    #[test]
    fn test_failed_login_write_closes_and_close_is_safe() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default().script(
            "db2",
            Script {
                fail_write: true,
                ..Script::default()
            },
        ));
        let mut db2 = conn(provisioner, launcher.clone(), settings());

        let err = db2.connect(Windows::default()).unwrap_err();
        assert!(matches!(err, ConnError::Handshake(_)));
        assert_eq!(launcher.journal.lock().closes, 1);

        db2.close().unwrap();
        db2.close().unwrap();
        assert_eq!(launcher.journal.lock().closes, 1);
    }

    #[test]
    fn test_bad_password_still_connects() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default().script(
            "db2",
            Script {
                output: vec![b"SQL30082N  Security processing failed".to_vec()],
                ..Script::default()
            },
        ));
        let mut db2 = conn(provisioner, launcher, settings());

        db2.connect(Windows::default()).unwrap();
        assert!(db2.is_connected());
    }

    #[test]
    fn test_close_sends_logout_once() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut db2 = conn(provisioner, launcher.clone(), settings());
        db2.connect(Windows::default()).unwrap();

        db2.close().unwrap();
        db2.close().unwrap();

        let journal = launcher.journal.lock();
        assert_eq!(journal.closes, 1);
        assert_eq!(journal.writes.last().unwrap(), &b"quit\r\n".to_vec());
        assert!(!db2.is_connected());
    }

    #[test]
    fn test_io_before_connect() {
        let (_temp, provisioner) = unprovisioned();
        let launcher = Arc::new(ScriptedLauncher::default());
        let mut db2 = conn(provisioner, launcher, settings());

        let mut buf = [0u8; 4];
        assert_eq!(
            db2.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(db2.write(b"x").is_err());
        db2.set_win_size(100, 40).unwrap();
        db2.keep_alive().unwrap();
        db2.close().unwrap();
    }

    #[cfg(target_os = "linux")]
    mod namespace {
        use super::*;

        fn provisioned() -> (tempfile::TempDir, Arc<HelperProvisioner>) {
            let temp = tempfile::tempdir().unwrap();
            let provisioner = Arc::new(HelperProvisioner::new(temp.path()));
            assert!(provisioner.ensure_provisioned().namespace_ready().is_some());
            (temp, provisioner)
        }

        fn helper(temp: &tempfile::TempDir, name: &str) -> String {
            temp.path().join(name).display().to_string()
        }

        #[test]
        fn test_namespace_strategy_order() {
            let (temp, provisioner) = provisioned();
            let launcher = Arc::new(
                ScriptedLauncher::default()
                    .script(helper(&temp, "db2catalognode"), Script {
                        output: vec![b"DB20000I".to_vec()],
                        ..Script::default()
                    }),
            );
            let mut db2 = conn(provisioner, launcher.clone(), settings());

            db2.connect(Windows::default()).unwrap();

            assert_eq!(
                launcher.launched(),
                vec![
                    helper(&temp, "db2catalognode"),
                    helper(&temp, "db2catalogdb"),
                    "unshare".to_string(),
                ]
            );
            let journal = launcher.journal.lock();
            let wrapper = journal.launches.last().unwrap();
            assert_eq!(
                wrapper.args,
                vec!["--fork", "--pid", "--mount-proc", &helper(&temp, "db2")]
            );
            assert_eq!(wrapper.env, Some(options().envs()));
            assert!(wrapper.credential.is_none());
            // both helpers were released
            assert_eq!(journal.closes, 2);
        }

        #[test]
        fn test_already_cataloged_node_recatalogs_once() {
            let (temp, provisioner) = provisioned();
            let launcher = Arc::new(
                ScriptedLauncher::default()
                    .script(helper(&temp, "db2catalognode"), Script {
                        output: vec![b"SQL1018N".to_vec()],
                        ..Script::default()
                    }),
            );
            let mut db2 = conn(provisioner, launcher.clone(), settings());

            db2.connect(Windows::default()).unwrap();

            assert_eq!(
                launcher.launched(),
                vec![
                    helper(&temp, "db2catalognode"),
                    helper(&temp, "db2uncatalognode"),
                    helper(&temp, "db2catalognode"),
                    helper(&temp, "db2catalogdb"),
                    "unshare".to_string(),
                ]
            );
            // the recatalog helpers are closed without waiting for output
            let journal = launcher.journal.lock();
            let reads_of = |name: &str| {
                let program = helper(&temp, name);
                journal.reads.iter().filter(|p| **p == program).count()
            };
            assert_eq!(reads_of("db2catalognode"), 1);
            assert_eq!(reads_of("db2uncatalognode"), 0);
            assert_eq!(reads_of("db2catalogdb"), 1);
            assert_eq!(journal.closes, 4);
        }

        #[test]
        fn test_wrapper_start_failure_falls_back() {
            let (temp, provisioner) = provisioned();
            let launcher = Arc::new(ScriptedLauncher::default().script(
                "unshare",
                Script {
                    fail_spawn: true,
                    ..Script::default()
                },
            ));
            let mut db2 = conn(provisioner, launcher.clone(), settings());

            db2.connect(Windows::default()).unwrap();

            assert_eq!(
                launcher.launched(),
                vec![
                    helper(&temp, "db2catalognode"),
                    helper(&temp, "db2catalogdb"),
                    "unshare".to_string(),
                    "db2".to_string(),
                ]
            );
            let journal = launcher.journal.lock();
            assert_eq!(
                journal.launches.last().unwrap().credential,
                Some(Credential { uid: 0, gid: 0 })
            );
        }

        #[test]
        fn test_failing_helpers_do_not_block_namespace() {
            let (temp, provisioner) = provisioned();
            let failing = Script {
                fail_spawn: true,
                ..Script::default()
            };
            let launcher = Arc::new(
                ScriptedLauncher::default()
                    .script(helper(&temp, "db2catalognode"), failing.clone())
                    .script(helper(&temp, "db2catalogdb"), failing),
            );
            let mut db2 = conn(provisioner, launcher.clone(), settings());

            db2.connect(Windows::default()).unwrap();
            assert_eq!(launcher.launched().last().unwrap(), "unshare");
        }
    }
}
