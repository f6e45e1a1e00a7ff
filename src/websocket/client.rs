//! WebSocket client for exchange streams
//!
//! Handles connection and message reception over tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::{Connector, MessageChannel};
use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
}

impl WebSocketClient {
    /// Create a new, unconnected client
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to exchange WebSocket");

        let (ws_stream, response) = connect_async(self.endpoint.as_str()).await?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| MarketDataError::ChannelError("Not connected".to_string()))
    }
}

#[async_trait]
impl MessageChannel for WebSocketClient {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.stream_mut()?
            .send(Message::Text(message.to_string()))
            .await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Bytes>> {
        loop {
            let stream = self.stream_mut()?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Received text message");
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "Received close frame");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    warn!("WebSocket stream ended");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Close the connection
    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

/// Opens a new `WebSocketClient` per connection attempt
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>> {
        let mut client = WebSocketClient::new(&self.endpoint);
        client.connect().await?;
        Ok(Box::new(client))
    }
}
