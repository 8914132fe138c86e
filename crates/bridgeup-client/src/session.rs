//! Framed message session over a byte stream

use bridgeup_proto::BridgeCodec;
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::ConnectionError;

/// Sends and receives length-prefixed messages on `S`
pub struct FramedSession<S> {
    stream: S,
    recv_buffer: BytesMut,
}

impl<S> FramedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            recv_buffer: BytesMut::with_capacity(4096),
        }
    }

    pub async fn send<T: Serialize + Debug>(&mut self, message: &T) -> Result<(), ConnectionError> {
        let encoded = BridgeCodec::encode(message)?;
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;

        trace!("Sent message: {:?}", message);
        Ok(())
    }

    /// Receive the next message; `Ok(None)` when the peer closed cleanly
    pub async fn recv<T: DeserializeOwned + Debug>(&mut self) -> Result<Option<T>, ConnectionError> {
        loop {
            if let Some(msg) = BridgeCodec::decode::<T>(&mut self.recv_buffer)? {
                trace!("Received message: {:?}", msg);
                return Ok(Some(msg));
            }

            let read = self.stream.read_buf(&mut self.recv_buffer).await?;
            if read == 0 {
                if self.recv_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::Protocol(format!(
                    "connection closed with {} bytes of a partial frame",
                    self.recv_buffer.len()
                )));
            }
        }
    }

    /// Release the stream along with bytes read past the last decoded frame
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.recv_buffer)
    }
}
