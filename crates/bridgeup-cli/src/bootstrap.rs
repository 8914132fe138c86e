//! Bootstrap mode selection
//!
//! `select` is a pure function of the `BootstrapConfig`: it decides how this
//! run obtains its connection parameters and resolves everything that can be
//! resolved without I/O. Network registration and task spawning happen
//! afterwards in `provision`.
//!
//! Decision order, first match wins:
//!
//! 1. a secret/p2p password selects the local server
//! 2. verify key and server, with no config file or tunnel descriptors, select
//!    a direct bridge session
//! 3. an admin address with tcp or udp descriptors selects auto-provisioning
//! 4. anything else runs from a config file

use bridgeup_client::{AllowedTargets, LocalServerSpec, SessionConfig};
use bridgeup_proto::{ConnType, TunnelSpec, TunnelSpecError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::BootstrapConfig;

/// Name of the config file generated for an auto-provisioned run with
/// `verify_key`
pub fn generated_config_file(verify_key: &str) -> String {
    let digest = format!("{:x}", md5::compute(verify_key.as_bytes()));
    format!("bridgeup_{}.yaml", &digest[..12])
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Conflicting configuration: {0}")]
    ConfigConflict(String),

    #[error("Invalid tunnel descriptor: {0}")]
    ConfigError(#[from] TunnelSpecError),

    #[error("A verify key is required (pass --vkey or enable --auto-add-client)")]
    MissingVerifyKey,

    #[error("Cannot derive a verify key: {0}")]
    KeyDerivation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    P2p,
    Direct,
    AutoProvision,
    ConfigFile,
}

impl std::fmt::Display for BootstrapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapMode::P2p => write!(f, "p2p"),
            BootstrapMode::Direct => write!(f, "direct"),
            BootstrapMode::AutoProvision => write!(f, "auto-provision"),
            BootstrapMode::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Parameters of a direct bridge session
#[derive(Debug, Clone, PartialEq)]
pub struct DirectParams {
    pub server_addr: String,
    pub verify_key: String,
    pub conn_type: ConnType,
    pub proxy_url: Option<String>,
    pub disconnect_timeout: Duration,
    pub allowed_targets: AllowedTargets,
}

impl DirectParams {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.server_addr.clone(), self.verify_key.clone());
        config.conn_type = self.conn_type;
        config.proxy_url = self.proxy_url.clone();
        config.disconnect_timeout = self.disconnect_timeout;
        config.allowed_targets = self.allowed_targets.clone();
        config
    }
}

/// Parameters of an auto-provisioned run
#[derive(Debug, Clone, PartialEq)]
pub struct AutoProvisionParams {
    pub api_addr: String,
    pub verify_key: String,
    /// Key was derived from host and tunnels rather than supplied
    pub key_derived: bool,
    /// Register the key with the admin API before connecting
    pub register: bool,
    pub delete_on_exit: bool,
    pub tcp: TunnelSpec,
    pub udp: TunnelSpec,
    pub conn_type: ConnType,
    pub proxy_url: Option<String>,
    pub disconnect_timeout: u64,
    pub allowed_targets: AllowedTargets,
    pub generated_config_path: PathBuf,
}

/// The selected mode together with its resolved parameters
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapPlan {
    P2p(LocalServerSpec),
    Direct(DirectParams),
    AutoProvision(AutoProvisionParams),
    ConfigFile(PathBuf),
}

impl BootstrapPlan {
    pub fn mode(&self) -> BootstrapMode {
        match self {
            BootstrapPlan::P2p(_) => BootstrapMode::P2p,
            BootstrapPlan::Direct(_) => BootstrapMode::Direct,
            BootstrapPlan::AutoProvision(_) => BootstrapMode::AutoProvision,
            BootstrapPlan::ConfigFile(_) => BootstrapMode::ConfigFile,
        }
    }
}

/// `md5_hex(hostname + tcp + udp)`: stable across restarts of the same
/// invocation on the same host
pub fn derive_verify_key(hostname: &str, tcp_tunnel: &str, udp_tunnel: &str) -> String {
    let seed = format!("{}{}{}", hostname, tcp_tunnel, udp_tunnel);
    format!("{:x}", md5::compute(seed.as_bytes()))
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn select(config: &BootstrapConfig) -> Result<BootstrapPlan, BootstrapError> {
    let has_tunnels =
        !config.tcp_tunnel.trim().is_empty() || !config.udp_tunnel.trim().is_empty();

    if !config.password.is_empty() {
        return Ok(BootstrapPlan::P2p(LocalServerSpec {
            server_addr: config.server_addr.clone(),
            verify_key: config.verify_key.clone(),
            conn_type: config.conn_type,
            proxy_url: non_empty(&config.proxy_url),
            local_type: config.local_type.clone(),
            password: config.password.clone(),
            target: config.target.clone(),
            local_port: config.local_port,
        }));
    }

    if !config.verify_key.is_empty()
        && !config.server_addr.is_empty()
        && config.config_path.is_none()
        && !has_tunnels
    {
        return Ok(BootstrapPlan::Direct(DirectParams {
            server_addr: config.server_addr.clone(),
            verify_key: config.verify_key.clone(),
            conn_type: config.conn_type,
            proxy_url: non_empty(&config.proxy_url),
            disconnect_timeout: Duration::from_secs(config.disconnect_timeout),
            allowed_targets: AllowedTargets::parse(&config.allowed_targets),
        }));
    }

    if !config.api_addr.is_empty() && has_tunnels {
        return select_auto_provision(config).map(BootstrapPlan::AutoProvision);
    }

    if has_tunnels {
        return Err(BootstrapError::ConfigConflict(
            "--tcp-tunnel and --udp-tunnel require --api; they cannot be used in config file mode"
                .to_string(),
        ));
    }

    Ok(BootstrapPlan::ConfigFile(
        config
            .config_path
            .clone()
            .unwrap_or_else(|| config.default_config_path.clone()),
    ))
}

fn select_auto_provision(config: &BootstrapConfig) -> Result<AutoProvisionParams, BootstrapError> {
    if let Some(path) = &config.config_path {
        return Err(BootstrapError::ConfigConflict(format!(
            "--config {} cannot be combined with --tcp-tunnel/--udp-tunnel",
            path.display()
        )));
    }

    let tcp = TunnelSpec::parse(&config.tcp_tunnel)?;
    let udp = TunnelSpec::parse(&config.udp_tunnel)?;

    let (verify_key, key_derived) = match (config.verify_key.is_empty(), config.auto_add_client) {
        (false, _) => (config.verify_key.clone(), false),
        (true, false) => return Err(BootstrapError::MissingVerifyKey),
        (true, true) => {
            let hostname = config.hostname.as_deref().ok_or_else(|| {
                BootstrapError::KeyDerivation("hostname is unavailable".to_string())
            })?;
            (
                derive_verify_key(hostname, &config.tcp_tunnel, &config.udp_tunnel),
                true,
            )
        }
    };

    let generated_config_path = config.runtime_dir.join(generated_config_file(&verify_key));
    Ok(AutoProvisionParams {
        api_addr: config.api_addr.clone(),
        verify_key,
        key_derived,
        register: config.auto_add_client,
        delete_on_exit: config.delete_on_exit,
        tcp,
        udp,
        conn_type: config.conn_type,
        proxy_url: non_empty(&config.proxy_url),
        disconnect_timeout: config.disconnect_timeout,
        allowed_targets: AllowedTargets::parse(&config.allowed_targets),
        generated_config_path,
    })
}
