use bridgeup_proto::{AgentRole, BridgeMessage};
use tracing::info;

use crate::dialer::Dialer;
use crate::error::ConnectionError;
use crate::forwarder::open_bridge_connection;

/// Register this host's public IP with the bridge for `hours`
pub async fn register_local_ip(
    dialer: &Dialer,
    verify_key: &str,
    hours: u32,
) -> Result<(), ConnectionError> {
    let mut session =
        open_bridge_connection(dialer, verify_key, AgentRole::Register { hours }).await?;

    match session.recv::<BridgeMessage>().await? {
        Some(BridgeMessage::Ack) => {
            info!(
                "Successful ip registration for local public network, the validity period is {} hours",
                hours
            );
            Ok(())
        }
        Some(BridgeMessage::Rejected { reason }) => Err(ConnectionError::Rejected(reason)),
        Some(other) => Err(ConnectionError::Protocol(format!(
            "Unexpected reply to registration: {:?}",
            other
        ))),
        None => Err(ConnectionError::Closed),
    }
}
