//! Database connection parameters
//!
//! Built once from a sequence of [`SqlOption`] setters applied over
//! defaults, then only read. Strategies derive the client's argument vector
//! and environment from it.

use std::fmt;

/// Node names longer than this collide in the client's catalog
const NODE_NAME_LEN: usize = 8;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 50000;

/// Named setter applied to [`ConnectionOptions`] defaults
#[derive(Clone, PartialEq, Eq)]
pub enum SqlOption {
    Username(String),
    Password(String),
    DbName(String),
    Host(String),
    Port(u16),
}

impl fmt::Debug for SqlOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(v) => f.debug_tuple("Username").field(v).finish(),
            Self::Password(_) => f.debug_tuple("Password").field(&"***").finish(),
            Self::DbName(v) => f.debug_tuple("DbName").field(v).finish(),
            Self::Host(v) => f.debug_tuple("Host").field(v).finish(),
            Self::Port(v) => f.debug_tuple("Port").field(v).finish(),
        }
    }
}

/// Immutable connection parameters for a SQL backend
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    username: String,
    password: String,
    db_name: String,
    host: String,
    port: u16,
}

impl Default for ConnectionOptions {
    /// Username and password fall back to `$USER` / `$PASSWORD`
    fn default() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_else(|_| whoami::username()),
            password: std::env::var("PASSWORD").unwrap_or_default(),
            db_name: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionOptions {
    /// Apply `opts` in order over the defaults
    pub fn new(opts: impl IntoIterator<Item = SqlOption>) -> Self {
        let mut options = Self::default();
        for opt in opts {
            match opt {
                SqlOption::Username(v) => options.username = v,
                SqlOption::Password(v) => options.password = v,
                SqlOption::DbName(v) => options.db_name = v,
                SqlOption::Host(v) => options.host = v,
                SqlOption::Port(v) => options.port = v,
            }
        }
        options
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client argument vector. The password is prompted for, never passed here.
    pub fn command_args(&self) -> Vec<String> {
        vec![
            format!("--user={}", self.username),
            format!("--host={}", self.host),
            format!("--port={}", self.port),
            "--password".to_string(),
            self.db_name.clone(),
        ]
    }

    /// Catalog node name: the database name cut to 8 characters
    pub fn node_name(&self) -> String {
        self.db_name.chars().take(NODE_NAME_LEN).collect()
    }

    /// Child environment consumed by the helper scripts
    pub fn envs(&self) -> Vec<String> {
        vec![
            format!("USERNAME={}", self.username),
            format!("HOSTNAME={}", self.host),
            format!("PORT={}", self.port),
            format!("DATABASE={}", self.db_name),
            format!("NODENAME={}", self.node_name()),
        ]
    }

    /// Line typed into the client to log in
    pub fn login_command(&self) -> String {
        format!(
            "connect to {} user {} using {}\n",
            self.db_name, self.username, self.password
        )
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("username", &self.username)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionOptions {
        ConnectionOptions::new([
            SqlOption::Username("db2user".to_string()),
            SqlOption::Host("10.0.0.5".to_string()),
            SqlOption::Port(50000),
            SqlOption::DbName("SAMPLEDB".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let opts = ConnectionOptions::new([]);
        assert_eq!(opts.host(), "127.0.0.1");
        assert_eq!(opts.port(), 50000);
        assert_eq!(opts.db_name(), "");
    }

    #[test]
    fn test_later_setters_win() {
        let opts = ConnectionOptions::new([
            SqlOption::Port(1),
            SqlOption::Port(2),
            SqlOption::Password("secret".to_string()),
        ]);
        assert_eq!(opts.port(), 2);
        assert_eq!(opts.password(), "secret");
    }

    #[test]
    fn test_envs_eight_char_name() {
        assert_eq!(
            sample().envs(),
            vec![
                "USERNAME=db2user",
                "HOSTNAME=10.0.0.5",
                "PORT=50000",
                "DATABASE=SAMPLEDB",
                "NODENAME=SAMPLEDB",
            ]
        );
    }

    #[test]
    fn test_node_name_truncation() {
        let long = ConnectionOptions::new([SqlOption::DbName("WAREHOUSE01".to_string())]);
        assert_eq!(long.node_name(), "WAREHOUS");
        assert!(long.envs().contains(&"NODENAME=WAREHOUS".to_string()));
        assert!(long.envs().contains(&"DATABASE=WAREHOUSE01".to_string()));

        let short = ConnectionOptions::new([SqlOption::DbName("HR".to_string())]);
        assert_eq!(short.node_name(), "HR");
    }

    #[test]
    fn test_command_args_omit_password() {
        let opts = ConnectionOptions::new([
            SqlOption::Username("db2user".to_string()),
            SqlOption::Password("hunter2".to_string()),
            SqlOption::Host("10.0.0.5".to_string()),
            SqlOption::DbName("SAMPLEDB".to_string()),
        ]);
        let args = opts.command_args();
        assert_eq!(
            args,
            vec![
                "--user=db2user",
                "--host=10.0.0.5",
                "--port=50000",
                "--password",
                "SAMPLEDB",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn test_login_command() {
        let opts = ConnectionOptions::new([
            SqlOption::Username("u".to_string()),
            SqlOption::Password("p".to_string()),
            SqlOption::DbName("D".to_string()),
        ]);
        assert_eq!(opts.login_command(), "connect to D user u using p\n");
    }

    #[test]
    fn test_debug_redacts_password() {
        let opts = ConnectionOptions::new([SqlOption::Password("hunter2".to_string())]);
        assert!(!format!("{:?}", opts).contains("hunter2"));
        assert!(!format!("{:?}", SqlOption::Password("hunter2".to_string())).contains("hunter2"));
    }
}
