//! Node identity bootstrap
//!
//! Before the node does any connection work it must hold an access key the
//! control plane accepts:
//!
//! ```text
//! Unregistered --(key file ok)--> Validating --(accepted)--> Valid
//!      |                              |  \--(unauthorized)--> Registering
//!      \--(missing/unreadable)------> Registering --(registered)--> Valid
//! ```
//!
//! Transient failures are retried with a fixed backoff; exhausting either
//! budget is fatal. Unauthorized is not a transient failure: it abandons
//! validation and registers a new key straight away.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{ConfigError, ProxyConfig};
use crate::model::AccessKey;
use crate::service::{JmsService, RegistrationClient, ServiceError, TerminalRegistration};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Terminal registration failed after {attempts} attempts")]
    RegistrationExhausted { attempts: u32 },

    #[error("Access key validation failed after {attempts} attempts")]
    ValidationExhausted { attempts: u32 },

    #[error("Control plane error: {0}")]
    Service(#[from] ServiceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Unregistered,
    Registering,
    Validating,
    Valid,
    FatalFailure,
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub name: String,
    pub bootstrap_token: String,
    pub access_key_file: PathBuf,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl BootstrapConfig {
    pub fn from_proxy_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: config.name.clone(),
            bootstrap_token: config.bootstrap_token.clone(),
            access_key_file: config.access_key_path()?,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        })
    }
}

pub struct Bootstrap {
    registration: Arc<dyn TerminalRegistration>,
    config: BootstrapConfig,
    state: BootstrapState,
}

impl Bootstrap {
    pub fn new(registration: Arc<dyn TerminalRegistration>, config: BootstrapConfig) -> Self {
        Self {
            registration,
            config,
            state: BootstrapState::Unregistered,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Drive the state machine to `Valid` or `FatalFailure`
    pub async fn run(&mut self) -> Result<AccessKey, BootstrapError> {
        self.state = BootstrapState::Unregistered;

        let result = match AccessKey::load_from_file(&self.config.access_key_file).await {
            Ok(key) => self.validate(key).await,
            Err(e) => {
                info!(
                    "No usable access key at {:?} ({}), registering",
                    self.config.access_key_file, e
                );
                self.register().await
            }
        };

        self.state = match &result {
            Ok(_) => BootstrapState::Valid,
            Err(_) => BootstrapState::FatalFailure,
        };
        result
    }

    async fn validate(&mut self, key: AccessKey) -> Result<AccessKey, BootstrapError> {
        self.state = BootstrapState::Validating;
        let max = self.config.max_attempts;

        for attempt in 1..=max {
            match self.registration.valid_access_key(&key).await {
                Ok(()) => {
                    info!("Access key {} is valid", key.id);
                    return Ok(key);
                }
                Err(ServiceError::Unauthorized) => {
                    warn!("Access key {} unauthorized, registering a new one", key.id);
                    return self.register().await;
                }
                Err(e) => {
                    error!("Validate access key failed ({}/{}): {}", attempt, max, e);
                }
            }
            if attempt < max {
                tokio::time::sleep(self.config.backoff).await;
            }
        }

        error!("Access key validation exhausted, giving up");
        Err(BootstrapError::ValidationExhausted { attempts: max })
    }

    async fn register(&mut self) -> Result<AccessKey, BootstrapError> {
        self.state = BootstrapState::Registering;
        let max = self.config.max_attempts;

        for attempt in 1..=max {
            match self
                .registration
                .register_terminal_account(&self.config.name, &self.config.bootstrap_token)
                .await
            {
                Ok(key) => {
                    // An unsaved key still works for this run
                    if let Err(e) = key.save_to_file(&self.config.access_key_file).await {
                        error!(
                            "Failed to save access key to {:?}: {}",
                            self.config.access_key_file, e
                        );
                    }
                    info!("Registered terminal {} as key {}", self.config.name, key.id);
                    return Ok(key);
                }
                Err(e) => {
                    error!("Register terminal failed ({}/{}): {}", attempt, max, e);
                }
            }
            if attempt < max {
                tokio::time::sleep(self.config.backoff).await;
            }
        }

        error!("Terminal registration exhausted, giving up");
        Err(BootstrapError::RegistrationExhausted { attempts: max })
    }
}

/// Load, validate or register the node key; exit the process on failure
pub async fn must_load_valid_access_key(config: &ProxyConfig) -> AccessKey {
    match load_valid_access_key(config).await {
        Ok(key) => key,
        Err(e) => {
            error!("Bootstrap failed, exiting: {}", e);
            process::exit(1);
        }
    }
}

async fn load_valid_access_key(config: &ProxyConfig) -> Result<AccessKey, BootstrapError> {
    let registration = RegistrationClient::new(&config.core_host, config.request_timeout())?;
    let mut bootstrap = Bootstrap::new(
        Arc::new(registration),
        BootstrapConfig::from_proxy_config(config)?,
    );
    bootstrap.run().await
}

/// Authenticated control-plane client for a bootstrapped node; exits on failure
pub async fn must_jms_service(config: &ProxyConfig) -> JmsService {
    let key = must_load_valid_access_key(config).await;
    let service = JmsService::builder()
        .core_host(config.core_host.clone())
        .timeout(config.request_timeout())
        .access_key(key)
        .build();

    match service {
        Ok(service) => service,
        Err(e) => {
            error!("Create control plane client failed: {}", e);
            process::exit(1);
        }
    }
}
