//! Local secret/P2P server
//!
//! Listens on a local port and relays every accepted connection to the
//! bridge with a `secret` hello naming the password and target. The bridge
//! pairs it with the agent that owns the password.

use bridgeup_proto::{AgentRole, BridgeMessage, ConnType};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::dialer::Dialer;
use crate::error::ConnectionError;
use crate::exit::ExitSignal;
use crate::forwarder::{open_bridge_connection, relay};

/// Everything needed to run the local server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalServerSpec {
    pub server_addr: String,
    pub verify_key: String,
    pub conn_type: ConnType,
    pub proxy_url: Option<String>,
    pub local_type: String,
    pub password: String,
    pub target: String,
    pub local_port: u16,
}

#[derive(Debug, Clone)]
pub struct LocalServer {
    spec: LocalServerSpec,
    dialer: Dialer,
}

impl LocalServer {
    pub fn new(spec: LocalServerSpec) -> Result<Self, ConnectionError> {
        let dialer = Dialer::new(spec.server_addr.clone(), spec.conn_type)
            .with_proxy_url(spec.proxy_url.as_deref())?;
        Ok(Self { spec, dialer })
    }

    pub fn spec(&self) -> &LocalServerSpec {
        &self.spec
    }

    pub async fn bind(&self) -> Result<TcpListener, ConnectionError> {
        let address = format!("0.0.0.0:{}", self.spec.local_port);
        TcpListener::bind(&address)
            .await
            .map_err(|source| ConnectionError::Bind { address, source })
    }

    /// Bind the local port and serve until `exit` fires
    pub async fn run(&self, exit: ExitSignal) -> Result<(), ConnectionError> {
        let listener = self.bind().await?;
        self.serve(listener, exit).await
    }

    /// Accept on an already-bound listener until `exit` fires
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut exit: ExitSignal,
    ) -> Result<(), ConnectionError> {
        info!(
            "Local {} server listening on {} for target {}",
            self.spec.local_type,
            listener.local_addr()?,
            self.spec.target
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept local connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Accepted local connection from {}", peer);

                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.relay_connection(stream).await {
                            error!("Local connection from {} failed: {}", peer, e);
                        }
                    });
                }
                _ = exit.triggered() => {
                    info!("Local server shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn relay_connection(&self, mut local: TcpStream) -> Result<(), ConnectionError> {
        let role = AgentRole::Secret {
            local_type: self.spec.local_type.clone(),
            password: self.spec.password.clone(),
            target: self.spec.target.clone(),
        };
        let mut bridge = open_bridge_connection(&self.dialer, &self.spec.verify_key, role).await?;

        match bridge.recv::<BridgeMessage>().await? {
            Some(BridgeMessage::Ack) => {}
            Some(BridgeMessage::Rejected { reason }) => {
                return Err(ConnectionError::Rejected(reason))
            }
            Some(other) => {
                return Err(ConnectionError::Protocol(format!(
                    "Unexpected reply to secret hello: {:?}",
                    other
                )))
            }
            None => return Err(ConnectionError::Closed),
        }

        let (sent, received) = relay(&mut local, bridge).await?;
        debug!("Secret connection closed ({} bytes sent, {} received)", sent, received);
        Ok(())
    }
}
