//! Bridge control session
//!
//! A `TunnelConnector` connects to the bridge and serves until the session
//! ends for any reason. `BridgeConnector` is the TCP implementation: it sends
//! a control hello declaring its tunnels, answers pings, and opens the local
//! TCP or UDP streams the bridge requests (subject to the allow-list).

use async_trait::async_trait;
use bridgeup_proto::{
    AgentFileConfig, AgentMessage, AgentRole, BridgeMessage, ConnType, TunnelDeclaration,
    TunnelMode, DEFAULT_DISCONNECT_TIMEOUT_SECS,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::allowlist::AllowedTargets;
use crate::dialer::Dialer;
use crate::error::ConnectionError;
use crate::forwarder::{forward_stream, open_bridge_connection};
use crate::session::FramedSession;

/// Connect to the bridge and serve until disconnected
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    async fn connect_and_serve(&self) -> Result<(), ConnectionError>;
}

/// Parameters of one bridge control session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub server_addr: String,
    pub verify_key: String,
    pub conn_type: ConnType,
    pub proxy_url: Option<String>,
    pub disconnect_timeout: Duration,
    pub allowed_targets: AllowedTargets,
    pub tunnels: Vec<TunnelDeclaration>,
}

impl SessionConfig {
    pub fn new(server_addr: impl Into<String>, verify_key: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            verify_key: verify_key.into(),
            conn_type: ConnType::Tcp,
            proxy_url: None,
            disconnect_timeout: Duration::from_secs(DEFAULT_DISCONNECT_TIMEOUT_SECS),
            allowed_targets: AllowedTargets::default(),
            tunnels: Vec::new(),
        }
    }

    pub fn from_file_config(config: &AgentFileConfig) -> Self {
        let common = &config.common;
        Self {
            server_addr: common.server_addr.clone(),
            verify_key: common.verify_key.clone(),
            conn_type: common.conn_type,
            proxy_url: common.proxy_url.clone(),
            disconnect_timeout: Duration::from_secs(common.disconnect_timeout),
            allowed_targets: AllowedTargets::from_entries(&common.allowed_targets),
            tunnels: config.tunnels.clone(),
        }
    }
}

/// TCP bridge connector
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    config: SessionConfig,
    dialer: Dialer,
}

impl BridgeConnector {
    pub fn new(config: SessionConfig) -> Result<Self, ConnectionError> {
        let dialer = Dialer::new(config.server_addr.clone(), config.conn_type)
            .with_proxy_url(config.proxy_url.as_deref())?;
        Ok(Self { config, dialer })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn handshake(&self) -> Result<FramedSession<TcpStream>, ConnectionError> {
        let role = AgentRole::Control {
            tunnels: self.config.tunnels.clone(),
        };
        let mut session = open_bridge_connection(&self.dialer, &self.config.verify_key, role).await?;

        match session.recv::<BridgeMessage>().await? {
            Some(BridgeMessage::Welcome { client_id }) => {
                info!(
                    "Connected to bridge {} (client id: {}, {} tunnel(s))",
                    self.config.server_addr,
                    client_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    self.config.tunnels.len()
                );
                Ok(session)
            }
            Some(BridgeMessage::Rejected { reason }) => Err(ConnectionError::Rejected(reason)),
            Some(other) => Err(ConnectionError::Protocol(format!(
                "Unexpected handshake reply: {:?}",
                other
            ))),
            None => Err(ConnectionError::Closed),
        }
    }

    fn open_stream(&self, stream_id: u32, mode: TunnelMode, target: String) {
        if !self.config.allowed_targets.is_allowed(&target) {
            warn!(
                "Refusing {} stream {} to {}: target is not in the allowed list",
                mode, stream_id, target
            );
            return;
        }

        let dialer = self.dialer.clone();
        let verify_key = self.config.verify_key.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_stream(&dialer, &verify_key, stream_id, mode, &target).await {
                error!("Stream {} to {} failed: {}", stream_id, target, e);
            }
        });
    }
}

#[async_trait]
impl TunnelConnector for BridgeConnector {
    async fn connect_and_serve(&self) -> Result<(), ConnectionError> {
        let mut session = self.handshake().await?;
        let idle = self.config.disconnect_timeout;

        loop {
            let message = tokio::time::timeout(idle, session.recv::<BridgeMessage>())
                .await
                .map_err(|_| ConnectionError::IdleTimeout(idle.as_secs()))??;

            match message {
                None => {
                    info!("Bridge {} closed the session", self.config.server_addr);
                    return Ok(());
                }
                Some(BridgeMessage::Ping { timestamp }) => {
                    session.send(&AgentMessage::Pong { timestamp }).await?;
                }
                Some(BridgeMessage::Open {
                    stream_id,
                    mode,
                    target,
                }) => {
                    self.open_stream(stream_id, mode, target);
                }
                Some(BridgeMessage::Rejected { reason }) => {
                    return Err(ConnectionError::Rejected(reason));
                }
                Some(other) => {
                    debug!("Ignoring bridge message: {:?}", other);
                }
            }
        }
    }
}
