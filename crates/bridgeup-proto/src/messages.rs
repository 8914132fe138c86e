//! Bridge session message types

use serde::{Deserialize, Serialize};

use crate::tunnel_spec::TunnelEntry;

/// Messages sent by the agent to the bridge server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentMessage {
    /// First message on every connection; identifies the agent and the
    /// purpose of the connection
    Hello {
        protocol_version: u32,
        version: String,
        verify_key: String,
        role: AgentRole,
    },
    Pong {
        timestamp: u64,
    },
}

/// Purpose of a bridge connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentRole {
    /// Long-lived control session declaring the tunnels this agent serves
    Control { tunnels: Vec<TunnelDeclaration> },
    /// Data connection answering an `Open` request
    Data { stream_id: u32 },
    /// Local secret/P2P visitor connection
    Secret {
        local_type: String,
        password: String,
        target: String,
    },
    /// Register this host's public IP for a number of hours
    Register { hours: u32 },
}

/// Messages sent by the bridge server to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeMessage {
    Welcome {
        client_id: Option<i64>,
    },
    Ack,
    Rejected {
        reason: String,
    },
    Ping {
        timestamp: u64,
    },
    /// Bridge asks the agent to open a stream to a local target
    Open {
        stream_id: u32,
        mode: TunnelMode,
        target: String,
    },
}

/// One UDP payload carried over a `Data` connection of a UDP stream.
///
/// Both directions use this frame; each frame maps to exactly one datagram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
}

/// Transport protocol of a declared tunnel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    Tcp,
    Udp,
}

impl std::fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelMode::Tcp => write!(f, "tcp"),
            TunnelMode::Udp => write!(f, "udp"),
        }
    }
}

/// A tunnel the bridge should expose on `server_port`, forwarding to `target`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelDeclaration {
    pub mode: TunnelMode,
    pub server_port: String,
    pub target: String,
}

impl TunnelDeclaration {
    pub fn from_entry(mode: TunnelMode, entry: &TunnelEntry) -> Self {
        Self {
            mode,
            server_port: entry.server_port.clone(),
            target: entry.target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_serialization() {
        let msg = AgentMessage::Hello {
            protocol_version: crate::PROTOCOL_VERSION,
            version: "0.1.0".to_string(),
            verify_key: "abc".to_string(),
            role: AgentRole::Control {
                tunnels: vec![TunnelDeclaration {
                    mode: TunnelMode::Tcp,
                    server_port: "8000".to_string(),
                    target: "127.0.0.1:80".to_string(),
                }],
            },
        };
        let serialized = bincode::serialize(&msg).unwrap();
        let deserialized: AgentMessage = bincode::deserialize(&serialized).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_datagram_keeps_boundaries() {
        let mut buf = bytes::BytesMut::new();
        for payload in [&b"first"[..], &b""[..], &b"third"[..]] {
            let frame = crate::BridgeCodec::encode(&Datagram {
                payload: payload.to_vec(),
            })
            .unwrap();
            buf.extend_from_slice(&frame);
        }

        let mut payloads = Vec::new();
        while let Some(datagram) = crate::BridgeCodec::decode::<Datagram>(&mut buf).unwrap() {
            payloads.push(datagram.payload);
        }
        assert_eq!(payloads, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
    }

    #[test]
    fn test_declaration_from_entry() {
        let entry = TunnelEntry::new("9000", "10.0.0.2:53");
        let decl = TunnelDeclaration::from_entry(TunnelMode::Udp, &entry);
        assert_eq!(decl.mode, TunnelMode::Udp);
        assert_eq!(decl.server_port, "9000");
        assert_eq!(decl.target, "10.0.0.2:53");
        assert_eq!(decl.mode.to_string(), "udp");
    }
}
