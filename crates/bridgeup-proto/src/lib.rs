//! Bridgeup protocol definitions
//!
//! Shared types for the tunnel agent: tunnel descriptors, bridge session
//! messages and their framing, and the agent configuration file.

pub mod codec;
pub mod config_file;
pub mod messages;
pub mod tunnel_spec;

pub use codec::{BridgeCodec, CodecError};
pub use config_file::{
    AgentFileConfig, CommonConfig, ConfigFileError, ConnType, DEFAULT_DISCONNECT_TIMEOUT_SECS,
};
pub use messages::*;
pub use tunnel_spec::{TunnelEntry, TunnelSpec, TunnelSpecError};

/// Agent software version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bridge session protocol version
pub const PROTOCOL_VERSION: u32 = 1;
