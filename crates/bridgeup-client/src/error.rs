use bridgeup_proto::{CodecError, ConfigFileError, ConnType};
use thiserror::Error;

/// Errors raised while connecting to or serving a bridge session
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Rejected by bridge: {0}")]
    Rejected(String),

    #[error("No message from bridge for {0} seconds")]
    IdleTimeout(u64),

    #[error("Transport '{0}' is not supported by this build")]
    UnsupportedTransport(ConnType),

    #[error("Bridge closed the connection during handshake")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),
}
