//! Prometheus counters for the feed pipeline

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::error::{MarketDataError, Result};

/// Feed counters, registered on a dedicated registry
#[derive(Clone)]
pub struct FeedMetrics {
    registry: Registry,
    pub messages_received: IntCounter,
    pub messages_dropped: IntCounter,
    pub events_published: IntCounter,
    pub events_dropped: IntCounter,
    pub reconnects: IntCounter,
}

impl FeedMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_received =
            IntCounter::new("feed_messages_received_total", "Inbound channel messages")?;
        let messages_dropped = IntCounter::new(
            "feed_messages_dropped_total",
            "Inbound messages dropped as undecodable or unroutable",
        )?;
        let events_published =
            IntCounter::new("feed_events_published_total", "Canonical events accepted by the sink")?;
        let events_dropped = IntCounter::new(
            "feed_events_dropped_total",
            "Canonical events lost to queue overflow or sink failure",
        )?;
        let reconnects = IntCounter::new("feed_reconnects_total", "Connection attempts after a failure")?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_dropped.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            messages_dropped,
            events_published,
            events_dropped,
            reconnects,
        })
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MarketDataError::MetricsError(e.to_string()))
    }
}
