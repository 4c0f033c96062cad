//! Configuration Storage
//!
//! Handles reading/writing the node configuration file.
//! Config location: ~/.bastion-proxy/config.json

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ProxyConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the node configuration directory (~/.bastion-proxy)
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".bastion-proxy"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

/// Default access key location
pub fn default_access_key_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("data").join("keys").join(".access_key"))
}

impl ProxyConfig {
    pub fn access_key_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.access_key_file {
            Some(path) => Ok(path.clone()),
            None => default_access_key_file(),
        }
    }

    pub fn helper_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.helper_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    /// Storage manager for an explicit config file
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load configuration from disk
    /// Returns default config if file doesn't exist
    pub async fn load(&self) -> Result<ProxyConfig, ConfigError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let config = serde_json::from_str::<ProxyConfig>(&contents).map_err(|e| {
                    tracing::error!("Config file {:?} is invalid: {}", self.path, e);
                    e
                })?;
                if config.version > CONFIG_VERSION {
                    return Err(ConfigError::VersionTooNew {
                        found: config.version,
                        supported: CONFIG_VERSION,
                    });
                }
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {:?}, using defaults", self.path);
                Ok(ProxyConfig::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Load the config, writing the defaults out first when there is none
    ///
    /// The default node name comes from the hostname. Persisting it keeps the
    /// registered terminal name stable if the host is renamed later.
    pub async fn load_or_init(&self) -> Result<ProxyConfig, ConfigError> {
        if fs::try_exists(&self.path).await? {
            return self.load().await;
        }
        let config = ProxyConfig::default();
        self.save(&config).await?;
        tracing::info!("Wrote default config for node {} to {:?}", config.name, self.path);
        Ok(config)
    }

    /// Replace the config file as a whole. It may carry the bootstrap
    /// token, so only the owner can read it.
    pub async fn save(&self, config: &ProxyConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true).mode(0o600);

        let mut file = options.open(&temp_path).await?;
        file.write_all(&serde_json::to_vec_pretty(config)?).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Get config file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
