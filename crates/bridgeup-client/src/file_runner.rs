//! Runs the agent from a YAML config file

use bridgeup_proto::AgentFileConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::connector::{BridgeConnector, SessionConfig};
use crate::error::ConnectionError;
use crate::exit::ExitSignal;
use crate::supervisor::{ReconnectionSupervisor, DEFAULT_RECONNECT_DELAY};

#[derive(Debug, Clone)]
pub struct ConfigFileRunner {
    path: PathBuf,
    delay: Duration,
}

impl ConfigFileRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file and build the connector it describes
    pub fn connector(&self) -> Result<BridgeConnector, ConnectionError> {
        let config = AgentFileConfig::load(&self.path)?;
        BridgeConnector::new(SessionConfig::from_file_config(&config))
    }

    /// Supervise the file's bridge session until `exit` fires.
    ///
    /// A file that cannot be loaded fails immediately; it is not retried.
    pub async fn run(&self, exit: ExitSignal) -> Result<(), ConnectionError> {
        let connector = self.connector()?;
        info!(
            "Loaded {} tunnel(s) from {}",
            connector.config().tunnels.len(),
            self.path.display()
        );

        ReconnectionSupervisor::new(format!("config {}", self.path.display()))
            .with_delay(self.delay)
            .with_exit_signal(exit)
            .run(&connector)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::ExitHandle;
    use bridgeup_proto::{CommonConfig, ConnType, TunnelSpec};
    use tempfile::TempDir;

    #[test]
    fn test_connector_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        let common = CommonConfig {
            server_addr: "10.0.0.1:8024".to_string(),
            verify_key: "abc".to_string(),
            conn_type: ConnType::Tcp,
            proxy_url: None,
            disconnect_timeout: 30,
            allowed_targets: vec!["127.0.0.1:22".to_string()],
        };
        let tcp = TunnelSpec::parse("8080->127.0.0.1:80").unwrap();
        AgentFileConfig::generate(common, &tcp, &TunnelSpec::default())
            .save(&path)
            .unwrap();

        let connector = ConfigFileRunner::new(&path).connector().unwrap();
        let config = connector.config();
        assert_eq!(config.server_addr, "10.0.0.1:8024");
        assert_eq!(config.disconnect_timeout, Duration::from_secs(30));
        assert_eq!(config.tunnels.len(), 1);
        assert!(config.allowed_targets.is_allowed("127.0.0.1:22"));
        assert!(!config.allowed_targets.is_allowed("127.0.0.1:23"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_fast() {
        let dir = TempDir::new().unwrap();
        let runner = ConfigFileRunner::new(dir.path().join("missing.yaml"));

        let err = runner.run(ExitHandle::new().subscribe()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConfigFile(_)));
    }
}
