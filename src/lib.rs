//! Bastion Proxy - session-proxy core of a bastion host
//!
//! Brokers operator sessions to backend assets through a uniform
//! [`srvconn::ServerConnection`], ships audit records and replays to the
//! configured [`recorder`] storage, and keeps the node registered with the
//! control plane ([`bootstrap`]).

#[cfg(not(unix))]
compile_error!("bastion-proxy drives PTYs and OS identities and only builds on unix");

pub mod bootstrap;
pub mod config;
pub mod local;
pub mod model;
pub mod recorder;
pub mod service;
pub mod srvconn;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
