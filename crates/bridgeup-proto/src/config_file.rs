//! Agent tunnel configuration file (YAML)
//!
//! ```yaml
//! common:
//!   server_addr: bridge.example.com:8024
//!   verify_key: 0f3c...
//!   conn_type: tcp
//! tunnels:
//!   - mode: tcp
//!     server_port: "8000"
//!     target: 127.0.0.1:80
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::messages::{TunnelDeclaration, TunnelMode};
use crate::tunnel_spec::TunnelSpec;

/// Seconds of bridge silence before a session is considered dead
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 60;

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Transport used for the agent to bridge connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    #[default]
    Tcp,
    Kcp,
}

impl FromStr for ConnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ConnType::Tcp),
            "kcp" => Ok(ConnType::Kcp),
            other => Err(format!(
                "Invalid connection type '{}' (expected tcp or kcp)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ConnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnType::Tcp => write!(f, "tcp"),
            ConnType::Kcp => write!(f, "kcp"),
        }
    }
}

/// Connection settings shared by every tunnel in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    pub server_addr: String,
    pub verify_key: String,

    #[serde(default)]
    pub conn_type: ConnType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_targets: Vec<String>,
}

fn default_disconnect_timeout() -> u64 {
    DEFAULT_DISCONNECT_TIMEOUT_SECS
}

/// Tunnel agent configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFileConfig {
    pub common: CommonConfig,

    #[serde(default)]
    pub tunnels: Vec<TunnelDeclaration>,
}

impl AgentFileConfig {
    /// Build a config declaring every tcp and udp entry
    pub fn generate(common: CommonConfig, tcp: &TunnelSpec, udp: &TunnelSpec) -> Self {
        let tunnels = tcp
            .entries()
            .iter()
            .map(|e| TunnelDeclaration::from_entry(TunnelMode::Tcp, e))
            .chain(
                udp.entries()
                    .iter()
                    .map(|e| TunnelDeclaration::from_entry(TunnelMode::Udp, e)),
            )
            .collect();

        Self { common, tunnels }
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write configuration to a YAML file, creating parent directories.
    ///
    /// The contents land in a fresh owner-only file that is renamed over
    /// `path`, so an existing file or symlink at `path` is replaced rather
    /// than written through.
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let yaml = serde_yaml::to_string(self)?;
        let write_err = |source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| ConfigFileError::Write {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut staged = NamedTempFile::new_in(parent).map_err(write_err)?;
        staged.write_all(yaml.as_bytes()).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged
            .persist(path)
            .map_err(|persist| write_err(persist.error))?;
        Ok(())
    }
}
