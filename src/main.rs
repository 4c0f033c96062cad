//! bastion-node: bootstraps the node identity and brings up audit storage

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use bastion_proxy::bootstrap::must_jms_service;
use bastion_proxy::config::{ConfigStorage, ProxyConfig};
use bastion_proxy::recorder::{
    new_replay_storage, CommandRecorder, RecorderConfig, ReplayStorage, ServerStorage,
    FILE_TYPE_FTP, FILE_TYPE_REPLAY,
};
use bastion_proxy::service::ControlPlane;
use bastion_proxy::srvconn::HelperProvisioner;
use tracing::{error, info};

async fn load_config() -> ProxyConfig {
    let storage = match std::env::args_os().nth(1) {
        Some(path) => ConfigStorage::with_path(PathBuf::from(path)),
        None => match ConfigStorage::new() {
            Ok(storage) => storage,
            Err(e) => {
                error!("Cannot locate config: {}", e);
                process::exit(1);
            }
        },
    };

    match storage.load_or_init().await {
        Ok(mut config) => {
            config.apply_env_overrides();
            info!("Loaded config from {:?}", storage.path());
            config
        }
        Err(e) => {
            error!("Failed to load config {:?}: {}", storage.path(), e);
            process::exit(1);
        }
    }
}

/// Long-lived node services, held until shutdown
///
/// Storages and the helper provisioner are shared with sessions as they are
/// opened; the provisioner's one-time outcome must outlive every session.
struct Node {
    replay_storage: Arc<dyn ReplayStorage>,
    ftp_storage: Arc<dyn ReplayStorage>,
    provisioner: Option<Arc<HelperProvisioner>>,
    commands: CommandRecorder,
}

impl Node {
    fn start(config: &ProxyConfig, service: Arc<dyn ControlPlane>) -> Self {
        let timeout = config.request_timeout();
        let storage = |storage_config, file_type| {
            match new_replay_storage(storage_config, file_type, service.clone(), timeout) {
                Ok(storage) => storage,
                Err(e) => {
                    error!("Invalid {} storage config: {}", file_type, e);
                    process::exit(1);
                }
            }
        };
        let replay_storage = storage(&config.replay_storage, FILE_TYPE_REPLAY);
        let ftp_storage = storage(&config.ftp_file_storage, FILE_TYPE_FTP);

        let provisioner = match config.helper_path() {
            Ok(dir) => {
                let provisioner = Arc::new(HelperProvisioner::new(dir));
                provisioner.ensure_provisioned();
                Some(provisioner)
            }
            Err(e) => {
                error!("Cannot resolve DB2 helper directory: {}", e);
                None
            }
        };

        let commands = CommandRecorder::spawn(
            Arc::new(ServerStorage::new("server", "command", service)),
            RecorderConfig::default(),
        );

        Self {
            replay_storage,
            ftp_storage,
            provisioner,
            commands,
        }
    }

    fn log_status(&self) {
        info!(
            "Replays go to {} storage, FTP files to {} storage",
            self.replay_storage.type_name(),
            self.ftp_storage.type_name()
        );
        let namespace = self
            .provisioner
            .as_ref()
            .and_then(|p| p.ensure_provisioned().namespace_ready().map(|_| p.dir()));
        match namespace {
            Some(dir) => info!("DB2 namespace strategy available (helpers in {:?})", dir),
            None => info!("DB2 namespace strategy unavailable"),
        }
    }

    async fn shutdown(self) {
        info!("Shutting down, flushing command audit");
        self.commands.close().await;
    }
}

#[tokio::main]
async fn main() {
    bastion_proxy::init_logging();

    let config = load_config().await;
    let service: Arc<dyn ControlPlane> = Arc::new(must_jms_service(&config).await);
    let node = Node::start(&config, service);
    node.log_status();

    info!("Node {} ready", config.name);
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for shutdown signal: {}", e);
    }

    node.shutdown().await;
}
