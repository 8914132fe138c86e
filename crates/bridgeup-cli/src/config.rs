//! Run parameters
//!
//! Everything the agent needs to decide how to connect is captured once at
//! startup in a `BootstrapConfig` and passed around by reference. Host facts
//! (hostname, default paths) are resolved here too so the bootstrap selector
//! never touches the environment.

use bridgeup_proto::{ConnType, DEFAULT_DISCONNECT_TIMEOUT_SECS};
use std::path::PathBuf;

pub const DEFAULT_LOCAL_PORT: u16 = 2000;
pub const DEFAULT_LOCAL_TYPE: &str = "p2p";

/// Immutable snapshot of all run parameters
///
/// Empty strings mean "not supplied".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub server_addr: String,
    pub verify_key: String,
    pub conn_type: ConnType,
    pub proxy_url: String,
    pub api_addr: String,
    pub config_path: Option<PathBuf>,
    pub tcp_tunnel: String,
    pub udp_tunnel: String,
    pub auto_add_client: bool,
    pub delete_on_exit: bool,
    pub disconnect_timeout: u64,
    pub allowed_targets: String,

    // P2P / secret local server
    pub password: String,
    pub target: String,
    pub local_type: String,
    pub local_port: u16,

    pub hostname: Option<String>,
    pub default_config_path: PathBuf,
    /// Per-user directory for generated files
    pub runtime_dir: PathBuf,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            verify_key: String::new(),
            conn_type: ConnType::default(),
            proxy_url: String::new(),
            api_addr: String::new(),
            config_path: None,
            tcp_tunnel: String::new(),
            udp_tunnel: String::new(),
            auto_add_client: true,
            delete_on_exit: true,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT_SECS,
            allowed_targets: String::new(),
            password: String::new(),
            target: String::new(),
            local_type: DEFAULT_LOCAL_TYPE.to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            hostname: None,
            default_config_path: default_config_path(),
            runtime_dir: default_runtime_dir(),
        }
    }
}

/// This host's name, if it can be read and is valid UTF-8
pub fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

/// `<config dir>/bridgeup/bridgeup.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bridgeup")
        .join("bridgeup.yaml")
}

/// `<runtime dir>/bridgeup`, falling back to the local data dir
pub fn default_runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("bridgeup")
}

/// `<local data dir>/bridgeup/bridgeup.log`
pub fn default_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("bridgeup")
        .join("bridgeup.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        assert!(config.auto_add_client);
        assert!(config.delete_on_exit);
        assert_eq!(config.disconnect_timeout, 60);
        assert_eq!(config.local_port, 2000);
        assert_eq!(config.local_type, "p2p");
        assert!(config.default_config_path.ends_with("bridgeup/bridgeup.yaml"));
        assert!(config.runtime_dir.ends_with("bridgeup"));
    }

    #[test]
    fn test_default_log_path() {
        assert!(default_log_path().ends_with("bridgeup/bridgeup.log"));
    }
}
