//! Publisher module for IPC communication
//!
//! Publishes canonical book events to downstream consumers.

mod queue;

pub use queue::{DropPolicy, EventQueue};

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};
use crate::metrics::FeedMetrics;
use crate::orderbook::{BookSnapshot, CanonicalEvent};

/// Destination for canonical events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &CanonicalEvent) -> Result<()>;

    /// Periodic level aggregate for one book
    async fn publish_snapshot(&self, snapshot: &BookSnapshot) -> Result<()>;
}

/// Publisher for sending book events via Unix socket
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // Consumer may not be listening yet
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(MarketDataError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            MarketDataError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Length-prefixed MessagePack frame
    fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
        let data = rmp_serde::to_vec_named(payload).map_err(|e| {
            MarketDataError::SerializationError(format!("Failed to serialize: {}", e))
        })?;

        let len = (data.len() as u32).to_be_bytes();
        let mut message = Vec::with_capacity(4 + data.len());
        message.extend_from_slice(&len);
        message.extend_from_slice(&data);
        Ok(message)
    }

    /// Write one frame, reconnecting first if the previous write failed
    async fn send_frame(&self, message: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            self.connect().await?;
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            if let Err(e) = stream.write_all(message).await {
                *guard = None;
                return Err(MarketDataError::IpcError(format!(
                    "Failed to write to IPC socket: {}",
                    e
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventSink for Publisher {
    async fn publish(&self, event: &CanonicalEvent) -> Result<()> {
        self.send_frame(&Self::encode(event)?).await?;
        debug!(
            symbol = %event.symbol,
            order_id = event.order_id,
            action = ?event.action,
            "Published book event"
        );
        Ok(())
    }

    async fn publish_snapshot(&self, snapshot: &BookSnapshot) -> Result<()> {
        self.send_frame(&Self::encode(snapshot)?).await?;
        debug!(topic = %snapshot.topic, depth = snapshot.levels.n, "Published book snapshot");
        Ok(())
    }
}

/// Drain the event queue into the sink until the queue is closed
///
/// Sink failures are counted and logged; the event is not retried.
pub async fn run_publisher(queue: Arc<EventQueue>, sink: Arc<dyn EventSink>, metrics: FeedMetrics) {
    while let Some(batch) = queue.pop_batch().await {
        for event in batch {
            match sink.publish(&event).await {
                Ok(()) => metrics.events_published.inc(),
                Err(e) => {
                    metrics.events_dropped.inc();
                    warn!(error = %e, symbol = %event.symbol, "Failed to publish event");
                }
            }
        }
    }
    info!("Event queue closed, publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{EventAction, LevelSnapshot, Side};
    use rust_decimal_macros::dec;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;
    use tokio_test::assert_ok;

    fn event(order_id: u64) -> CanonicalEvent {
        CanonicalEvent {
            timestamp: 1_700_000_000_000_000,
            exchange: "BITMEX".to_string(),
            symbol: "XBTUSD".to_string(),
            action: EventAction::Update,
            side: Side::Ask,
            order_id,
            size: dec!(150),
            price: dec!(6500.5),
        }
    }

    #[tokio::test]
    async fn test_publish_writes_length_prefixed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let publisher = Publisher::new(path.to_str().unwrap()).await.unwrap();
        let (mut conn, _) = listener.accept().await.unwrap();

        assert_ok!(publisher.publish(&event(8799350000)).await);

        let mut len = [0u8; 4];
        conn.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        conn.read_exact(&mut body).await.unwrap();

        let decoded: CanonicalEvent = rmp_serde::from_slice(&body).unwrap();
        assert_eq!(decoded, event(8799350000));
    }

    #[tokio::test]
    async fn test_publish_snapshot_frame_carries_topic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let publisher = Publisher::new(path.to_str().unwrap()).await.unwrap();
        let (mut conn, _) = listener.accept().await.unwrap();

        let snapshot = BookSnapshot {
            timestamp: 1_700_000_000_000_000,
            exchange: "BITMEX".to_string(),
            symbol: "XBTUSD".to_string(),
            topic: crate::orderbook::topic("BITMEX", "XBTUSD"),
            levels: LevelSnapshot {
                bids_vwap: dec!(6500),
                n: 1,
                ..Default::default()
            },
        };
        assert_ok!(publisher.publish_snapshot(&snapshot).await);

        let mut len = [0u8; 4];
        conn.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        conn.read_exact(&mut body).await.unwrap();

        let decoded: BookSnapshot = rmp_serde::from_slice(&body).unwrap();
        assert_eq!(decoded.topic, "/BITMEX/XBTUSD/orderbook");
        assert_eq!(decoded, snapshot);
    }

    #[tokio::test]
    async fn test_publish_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let publisher = Publisher::new(path.to_str().unwrap()).await.unwrap();

        let result = publisher.publish(&event(1)).await;
        assert!(matches!(result, Err(MarketDataError::IpcError(_))));
    }

    #[tokio::test]
    async fn test_run_publisher_counts_outcomes() {
        let mut sink = MockEventSink::new();
        sink.expect_publish().times(3).returning(|event| {
            if event.order_id == 2 {
                Err(MarketDataError::IpcError("consumer gone".to_string()))
            } else {
                Ok(())
            }
        });

        let queue = Arc::new(EventQueue::new(16, DropPolicy::DropOldest));
        let metrics = FeedMetrics::new().unwrap();
        queue.push_all(vec![event(1), event(2), event(3)]);
        queue.close();

        run_publisher(queue, Arc::new(sink), metrics.clone()).await;

        assert_eq!(metrics.events_published.get(), 2);
        assert_eq!(metrics.events_dropped.get(), 1);
    }
}
