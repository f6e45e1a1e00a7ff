//! Transport seam between the feed session and the network

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Duplex message channel to one exchange endpoint
#[async_trait]
pub trait MessageChannel: Send {
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Next data message; `Ok(None)` means the peer closed the channel
    async fn receive(&mut self) -> Result<Option<Bytes>>;

    async fn close(&mut self);
}

/// Opens fresh channels for each connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>>;
}
