//! Stream forwarding between local targets and bridge data connections

use bridgeup_proto::{AgentMessage, AgentRole, Datagram, TunnelMode, PROTOCOL_VERSION, VERSION};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::dialer::Dialer;
use crate::error::ConnectionError;
use crate::session::FramedSession;

/// Largest UDP payload relayed in one frame
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// A UDP stream with no traffic either way for this long is closed
pub const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Hello identifying this agent for `role`
pub fn hello(verify_key: &str, role: AgentRole) -> AgentMessage {
    AgentMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        version: VERSION.to_string(),
        verify_key: verify_key.to_string(),
        role,
    }
}

/// Dial the bridge and announce the connection's role
pub async fn open_bridge_connection(
    dialer: &Dialer,
    verify_key: &str,
    role: AgentRole,
) -> Result<FramedSession<TcpStream>, ConnectionError> {
    let stream = dialer.dial().await?;
    let mut session = FramedSession::new(stream);
    session.send(&hello(verify_key, role)).await?;
    Ok(session)
}

/// Copy bytes both ways until either side closes
///
/// Bytes the session buffered past its last frame are written to `local` first.
pub async fn relay(
    local: &mut TcpStream,
    bridge: FramedSession<TcpStream>,
) -> Result<(u64, u64), ConnectionError> {
    let (mut bridge, pending) = bridge.into_parts();
    if !pending.is_empty() {
        local.write_all(&pending).await?;
    }

    let (to_bridge, to_local) = tokio::io::copy_bidirectional(local, &mut bridge).await?;
    Ok((to_bridge, to_local + pending.len() as u64))
}

/// Connect to a local target, giving up after `timeout`
pub async fn connect_target(target: &str, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    tokio::time::timeout(timeout, TcpStream::connect(target))
        .await
        .map_err(|_| ConnectionError::ConnectTimeout(target.to_string()))?
        .map_err(|source| ConnectionError::Connect {
            address: target.to_string(),
            source,
        })
}

/// Serve one bridge `Open` request: reach `target` over `mode` and relay it
/// over a new data connection tagged with `stream_id`
pub async fn forward_stream(
    dialer: &Dialer,
    verify_key: &str,
    stream_id: u32,
    mode: TunnelMode,
    target: &str,
) -> Result<(u64, u64), ConnectionError> {
    info!(stream_id = stream_id, target = %target, "Starting {} forward", mode);

    let (to_bridge, to_local) = match mode {
        TunnelMode::Tcp => {
            let mut local = connect_target(target, dialer.timeout()).await?;
            let bridge =
                open_bridge_connection(dialer, verify_key, AgentRole::Data { stream_id }).await?;
            relay(&mut local, bridge).await?
        }
        TunnelMode::Udp => {
            let socket = bind_udp_target(target).await?;
            let bridge =
                open_bridge_connection(dialer, verify_key, AgentRole::Data { stream_id }).await?;
            relay_datagrams(&socket, bridge, UDP_IDLE_TIMEOUT).await?
        }
    };

    debug!(
        "Stream {} closed ({} bytes to bridge, {} bytes to {})",
        stream_id, to_bridge, to_local, target
    );
    Ok((to_bridge, to_local))
}

/// Ephemeral local socket connected to `target`
pub async fn bind_udp_target(target: &str) -> Result<UdpSocket, ConnectionError> {
    let connect_err = |source| ConnectionError::Connect {
        address: target.to_string(),
        source,
    };

    let addr = tokio::net::lookup_host(target)
        .await
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| ConnectionError::Protocol(format!("{} did not resolve", target)))?;
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| ConnectionError::Bind {
            address: local.to_string(),
            source,
        })?;
    socket.connect(addr).await.map_err(connect_err)?;
    Ok(socket)
}

/// Shuttle datagrams between `socket` and `Datagram` frames on `bridge`
///
/// Ends when the bridge closes or neither side has sent anything for
/// `idle`. Returns payload bytes (to bridge, to socket).
pub async fn relay_datagrams(
    socket: &UdpSocket,
    mut bridge: FramedSession<TcpStream>,
    idle: Duration,
) -> Result<(u64, u64), ConnectionError> {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let (mut to_bridge, mut to_local) = (0u64, 0u64);

    loop {
        tokio::select! {
            frame = bridge.recv::<Datagram>() => match frame? {
                Some(datagram) => {
                    socket.send(&datagram.payload).await?;
                    to_local += datagram.payload.len() as u64;
                }
                None => break,
            },
            read = socket.recv(&mut buf) => {
                let len = read?;
                bridge.send(&Datagram { payload: buf[..len].to_vec() }).await?;
                to_bridge += len as u64;
            }
            _ = tokio::time::sleep(idle) => {
                debug!("UDP stream idle for {:?}", idle);
                break;
            }
        }
    }

    Ok((to_bridge, to_local))
}
