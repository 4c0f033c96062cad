//! Configuration Management Module
//!
//! Node settings live in one JSON file; the bootstrap inputs can be
//! overridden from the environment.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigError, ConfigStorage};
pub use types::{ObsConfig, ProxyConfig, ReplayStorageConfig, CONFIG_VERSION};
