//! Minimal STUN binding client (RFC 5389) for public address discovery

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

pub const DEFAULT_STUN_SERVER: &str = "stun.stunprotocol.org:3478";

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const MAGIC_COOKIE: u32 = 0x2112_A442;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const HEADER_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum StunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response from STUN server {0}")]
    Timeout(String),

    #[error("Invalid STUN response: {0}")]
    InvalidResponse(String),
}

pub type TransactionId = [u8; 12];

fn new_transaction_id() -> TransactionId {
    let mut id = [0u8; 12];
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    for (i, chunk) in id.chunks_mut(8).enumerate() {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(nanos);
        hasher.write_usize(i);
        let bytes = hasher.finish().to_be_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    id
}

pub fn encode_binding_request(transaction_id: &TransactionId) -> [u8; HEADER_LEN] {
    let mut request = [0u8; HEADER_LEN];
    request[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // zero-length body
    request[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    request[8..20].copy_from_slice(transaction_id);
    request
}

/// Extract the mapped address from a binding success response.
///
/// XOR-MAPPED-ADDRESS wins over MAPPED-ADDRESS when both are present.
pub fn parse_binding_response(
    response: &[u8],
    transaction_id: &TransactionId,
) -> Result<SocketAddr, StunError> {
    if response.len() < HEADER_LEN {
        return Err(StunError::InvalidResponse(format!(
            "{} bytes is shorter than a header",
            response.len()
        )));
    }

    let message_type = u16::from_be_bytes([response[0], response[1]]);
    if message_type != BINDING_SUCCESS {
        return Err(StunError::InvalidResponse(format!(
            "unexpected message type {:#06x}",
            message_type
        )));
    }
    if response[4..8] != MAGIC_COOKIE.to_be_bytes() || &response[8..20] != transaction_id {
        return Err(StunError::InvalidResponse(
            "transaction does not match request".to_string(),
        ));
    }

    let body_len = u16::from_be_bytes([response[2], response[3]]) as usize;
    let body = response
        .get(HEADER_LEN..HEADER_LEN + body_len)
        .ok_or_else(|| StunError::InvalidResponse("truncated body".to_string()))?;

    let mut mapped = None;
    let mut offset = 0;
    while offset + 4 <= body.len() {
        let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        let value = body
            .get(offset + 4..offset + 4 + attr_len)
            .ok_or_else(|| StunError::InvalidResponse("truncated attribute".to_string()))?;

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, Some(transaction_id)),
            ATTR_MAPPED_ADDRESS => mapped = Some(decode_address(value, None)?),
            _ => {}
        }

        // attributes are padded to 4 bytes
        offset += 4 + attr_len.div_ceil(4) * 4;
    }

    mapped.ok_or_else(|| StunError::InvalidResponse("no mapped address attribute".to_string()))
}

fn decode_address(value: &[u8], xor: Option<&TransactionId>) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::InvalidResponse("short address attribute".to_string()));
    }

    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match (value[1], &value[4..]) {
        (0x01, raw) if raw.len() >= 4 => {
            let mut octets = [raw[0], raw[1], raw[2], raw[3]];
            if xor.is_some() {
                for (byte, mask) in octets.iter_mut().zip(cookie.iter()) {
                    *byte ^= mask;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        (0x02, raw) if raw.len() >= 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw[..16]);
            if let Some(tid) = xor {
                let mask = cookie.iter().chain(tid.iter());
                for (byte, mask) in octets.iter_mut().zip(mask) {
                    *byte ^= mask;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        (family, _) => {
            return Err(StunError::InvalidResponse(format!(
                "unsupported address family {:#04x}",
                family
            )))
        }
    };

    Ok(SocketAddr::new(ip, port))
}

/// Ask `server` for this host's public UDP address
pub async fn discover_public_addr(server: &str, timeout: Duration) -> Result<SocketAddr, StunError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server).await?;

    let transaction_id = new_transaction_id();
    socket.send(&encode_binding_request(&transaction_id)).await?;
    debug!("Sent STUN binding request to {}", server);

    let mut buf = [0u8; 512];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| StunError::Timeout(server.to_string()))??;

    parse_binding_response(&buf[..len], &transaction_id)
}
