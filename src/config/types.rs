//! Configuration types

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::srvconn::Db2Settings;

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_CORE_HOST: &str = "http://127.0.0.1:8080";

/// Object storage bucket credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsConfig {
    #[serde(rename = "ENDPOINT")]
    pub endpoint: String,
    #[serde(rename = "BUCKET")]
    pub bucket: String,
    #[serde(rename = "ACCESS_KEY")]
    pub access_key: String,
    #[serde(rename = "SECRET_KEY")]
    pub secret_key: String,
    /// Address objects as `<endpoint>/<bucket>/<key>`. Forced on for IP endpoints.
    #[serde(rename = "PATH_STYLE", default)]
    pub path_style: bool,
}

impl fmt::Debug for ObsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObsConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("path_style", &self.path_style)
            .finish()
    }
}

/// Where archives are shipped, tagged by `TYPE`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "TYPE", rename_all = "lowercase")]
pub enum ReplayStorageConfig {
    /// Push to the control plane
    #[default]
    Server,
    Obs(ObsConfig),
}

/// Node configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub version: u32,
    /// Control plane base URL
    pub core_host: String,
    /// Terminal name registered with the control plane
    pub name: String,
    pub bootstrap_token: String,
    /// Defaults to `<config dir>/data/keys/.access_key`
    pub access_key_file: Option<PathBuf>,
    /// Where DB2 helper scripts are written; defaults to the working directory
    pub helper_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub replay_storage: ReplayStorageConfig,
    pub ftp_file_storage: ReplayStorageConfig,
    pub db2: Db2Settings,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            core_host: DEFAULT_CORE_HOST.to_string(),
            name: default_name(),
            bootstrap_token: String::new(),
            access_key_file: None,
            helper_dir: None,
            request_timeout_secs: 30,
            replay_storage: ReplayStorageConfig::default(),
            ftp_file_storage: ReplayStorageConfig::default(),
            db2: Db2Settings::default(),
        }
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "bastion-proxy".to_string())
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Override bootstrap inputs from `CORE_HOST`, `NAME` and `BOOTSTRAP_TOKEN`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = set("CORE_HOST") {
            self.core_host = v;
        }
        if let Some(v) = set("NAME") {
            self.name = v;
        }
        if let Some(v) = set("BOOTSTRAP_TOKEN") {
            self.bootstrap_token = v;
        }
    }
}
