//! Outbound connections to the bridge server

use bridgeup_proto::ConnType;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ConnectionError;
use crate::proxy::Socks5Proxy;

/// Opens transport connections to one bridge server
#[derive(Debug, Clone)]
pub struct Dialer {
    server_addr: String,
    conn_type: ConnType,
    proxy: Option<Socks5Proxy>,
    timeout: Duration,
}

impl Dialer {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(server_addr: impl Into<String>, conn_type: ConnType) -> Self {
        Self {
            server_addr: server_addr.into(),
            conn_type,
            proxy: None,
            timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Route connections through a SOCKS5 proxy; empty or absent urls are ignored
    pub fn with_proxy_url(mut self, proxy_url: Option<&str>) -> Result<Self, ConnectionError> {
        self.proxy = match proxy_url.map(str::trim) {
            Some(url) if !url.is_empty() => Some(Socks5Proxy::parse(url)?),
            _ => None,
        };
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    /// Connect timeout, also applied to local targets
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn conn_type(&self) -> ConnType {
        self.conn_type
    }

    pub async fn dial(&self) -> Result<TcpStream, ConnectionError> {
        if self.conn_type != ConnType::Tcp {
            return Err(ConnectionError::UnsupportedTransport(self.conn_type));
        }

        let stream = match &self.proxy {
            Some(proxy) => proxy.connect(&self.server_addr, self.timeout).await?,
            None => tokio::time::timeout(self.timeout, TcpStream::connect(&self.server_addr))
                .await
                .map_err(|_| ConnectionError::ConnectTimeout(self.server_addr.clone()))?
                .map_err(|source| ConnectionError::Connect {
                    address: self.server_addr.clone(),
                    source,
                })?,
        };

        stream.set_nodelay(true)?;
        debug!("Dialed bridge {}", self.server_addr);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_proxy_url_is_ignored() {
        let dialer = Dialer::new("127.0.0.1:8024", ConnType::Tcp)
            .with_proxy_url(Some("  "))
            .unwrap();
        assert!(dialer.proxy.is_none());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let result = Dialer::new("127.0.0.1:8024", ConnType::Tcp).with_proxy_url(Some("ftp://x"));
        assert!(matches!(result, Err(ConnectionError::Proxy(_))));
    }

    #[tokio::test]
    async fn test_kcp_is_unsupported() {
        let dialer = Dialer::new("127.0.0.1:8024", ConnType::Kcp);
        assert!(matches!(
            dialer.dial().await,
            Err(ConnectionError::UnsupportedTransport(ConnType::Kcp))
        ));
    }

    #[tokio::test]
    async fn test_dial_direct() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let dialer = Dialer::new(addr, ConnType::Tcp);
        let (dialed, accepted) = tokio::join!(dialer.dial(), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }
}
