//! Execution phase of a bootstrap plan
//!
//! Turns a `BootstrapPlan` into something runnable. Only auto-provisioned
//! runs do I/O here: they read the bridge port from the admin API, register
//! the verify key and write the generated agent config.

use bridgeup_admin::{AdminClient, AdminError, ControlPlane};
use bridgeup_client::{
    BridgeConnector, ConfigFileRunner, ConnectionError, ExitSignal, LocalServer, LocalServerSpec,
    ReconnectionSupervisor, SessionConfig,
};
use bridgeup_proto::{AgentFileConfig, CommonConfig, ConfigFileError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bootstrap::{AutoProvisionParams, BootstrapPlan};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Admin API error: {0}")]
    Admin(#[from] AdminError),

    #[error("Failed to write generated config: {0}")]
    ConfigFile(#[from] ConfigFileError),
}

/// What the background task runs
#[derive(Debug, Clone, PartialEq)]
pub enum Launch {
    LocalServer(LocalServerSpec),
    Direct(SessionConfig),
    ConfigFile(PathBuf),
}

impl Launch {
    /// Build the runner future; construction errors surface before spawning
    pub fn into_task(self, exit: ExitSignal) -> Result<BoxFuture<'static, ()>, ConnectionError> {
        match self {
            Launch::LocalServer(spec) => {
                let server = LocalServer::new(spec)?;
                Ok(async move {
                    if let Err(e) = server.run(exit).await {
                        error!("Local server stopped: {}", e);
                    }
                }
                .boxed())
            }
            Launch::Direct(config) => {
                let supervisor =
                    ReconnectionSupervisor::new(config.server_addr.clone()).with_exit_signal(exit);
                let connector = BridgeConnector::new(config)?;
                Ok(async move { supervisor.run(&connector).await }.boxed())
            }
            Launch::ConfigFile(path) => {
                let runner = ConfigFileRunner::new(path);
                Ok(async move {
                    if let Err(e) = runner.run(exit).await {
                        error!("Config file runner stopped: {}", e);
                    }
                }
                .boxed())
            }
        }
    }
}

/// A plan after its side effects have run
pub struct Prepared {
    pub launch: Launch,
    /// Admin API and verify key to deregister on stop
    pub deregistration: Option<(Arc<dyn ControlPlane>, String)>,
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("launch", &self.launch)
            .field(
                "deregistration",
                &self.deregistration.as_ref().map(|(_, key)| key),
            )
            .finish()
    }
}

/// `host(api_addr):bridge_port`
pub fn bridge_server_addr(api_addr: &str, bridge_port: u16) -> String {
    let host = match api_addr.rsplit_once(':') {
        Some((host, _)) => host,
        None => api_addr,
    };
    format!("{}:{}", host, bridge_port)
}

/// Register with the admin API and write the generated config.
///
/// Returns the config path to run from.
pub async fn provision(
    params: &AutoProvisionParams,
    admin: &dyn ControlPlane,
) -> Result<PathBuf, ProvisionError> {
    let bridge_port = admin.bridge_port().await?;
    let server_addr = bridge_server_addr(&params.api_addr, bridge_port);
    info!("Resolved bridge address {} from {}", server_addr, params.api_addr);

    if params.key_derived {
        info!("Derived verify key {}", params.verify_key);
    }

    if params.register {
        match admin.add_client(&params.verify_key).await {
            Ok(()) => info!("Registered client {}", params.verify_key),
            Err(AdminError::DuplicateKey(msg)) => {
                warn!("Client {} already registered: {}", params.verify_key, msg)
            }
            Err(e) => return Err(e.into()),
        }
    }

    let common = CommonConfig {
        server_addr,
        verify_key: params.verify_key.clone(),
        conn_type: params.conn_type,
        proxy_url: params.proxy_url.clone(),
        disconnect_timeout: params.disconnect_timeout,
        allowed_targets: params.allowed_targets.iter().map(str::to_string).collect(),
    };
    AgentFileConfig::generate(common, &params.tcp, &params.udp)
        .save(&params.generated_config_path)?;
    info!(
        "Generated {} tcp and {} udp tunnel(s) in {}",
        params.tcp.len(),
        params.udp.len(),
        params.generated_config_path.display()
    );

    Ok(params.generated_config_path.clone())
}

/// Run the plan's side effects against `admin`
pub async fn prepare_with(
    plan: BootstrapPlan,
    admin: Option<Arc<dyn ControlPlane>>,
) -> Result<Prepared, ProvisionError> {
    let prepared = match plan {
        BootstrapPlan::P2p(spec) => Prepared {
            launch: Launch::LocalServer(spec),
            deregistration: None,
        },
        BootstrapPlan::Direct(params) => Prepared {
            launch: Launch::Direct(params.session_config()),
            deregistration: None,
        },
        BootstrapPlan::ConfigFile(path) => Prepared {
            launch: Launch::ConfigFile(path),
            deregistration: None,
        },
        BootstrapPlan::AutoProvision(params) => {
            let admin: Arc<dyn ControlPlane> = match admin {
                Some(admin) => admin,
                None => Arc::new(AdminClient::new(params.api_addr.clone())?),
            };
            let path = provision(&params, admin.as_ref()).await?;
            Prepared {
                launch: Launch::ConfigFile(path),
                deregistration: params
                    .delete_on_exit
                    .then(|| (admin, params.verify_key.clone())),
            }
        }
    };

    Ok(prepared)
}

/// Run the plan's side effects against the real admin API
pub async fn prepare(plan: BootstrapPlan) -> Result<Prepared, ProvisionError> {
    prepare_with(plan, None).await
}
