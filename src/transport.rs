//! Socket transport abstraction.
//!
//! The connection layer only ever talks to a [`Transport`]: text frames plus
//! the ping/pong/close control frames. [`WebSocketDialer`] provides the
//! production implementation on top of `tokio-tungstenite`; tests swap in an
//! in-memory one.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, trace};
use url::Url;

use crate::error::PusherError;

/// A single frame exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// An open, bidirectional socket.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), PusherError>;

    /// Read the next frame. `None` means the peer closed the socket.
    ///
    /// Must be cancel-safe: the connection task polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<Frame, PusherError>>;

    /// Close the socket.
    async fn close(&mut self) -> Result<(), PusherError>;
}

/// Opens transports to a URL.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, url: &Url) -> Result<Box<dyn Transport>, PusherError>;
}

/// Dials real WebSocket connections
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, url: &Url) -> Result<Box<dyn Transport>, PusherError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| PusherError::DialError(e.to_string()))?;

        debug!("Connected to WebSocket server. Response: {:?}", response.status());

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// [`Transport`] over a `tokio-tungstenite` stream
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), PusherError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, PusherError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Ping(data) => Frame::Ping(data),
                Message::Pong(data) => Frame::Pong(data),
                Message::Close(frame) => {
                    debug!("Received close frame: {:?}", frame);
                    Frame::Close
                }
                Message::Binary(data) => {
                    trace!("Ignoring binary frame of {} bytes", data.len());
                    continue;
                }
                Message::Frame(_) => continue,
            };

            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) -> Result<(), PusherError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
