//! Book Monitor - L2 Order Book Library
//!
//! This crate rebuilds per-instrument limit order books from exchange WebSocket
//! diff feeds (Bitfinex raw books, BitMEX `orderBookL2`) and republishes every
//! book change as a normalized event.

use std::sync::Arc;
use tokio::sync::RwLock;

pub mod adapter;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod publisher;
pub mod reporter;
pub mod server;
pub mod websocket;

pub use adapter::{Exchange, ExchangeAdapter, ParseResult};
pub use config::Config;
pub use error::{MarketDataError, Result};
pub use metrics::FeedMetrics;
pub use orderbook::{BookRegistry, BookSnapshot, CanonicalEvent, LevelSnapshot, PriceLevelBook};
pub use publisher::{EventQueue, EventSink, Publisher};
pub use websocket::{FeedSession, SessionState};

/// Application state shared across components
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<BookRegistry>>,
    pub events: Arc<EventQueue>,
    pub metrics: FeedMetrics,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let registry = BookRegistry::new(&config.symbols);
        let events = EventQueue::new(config.event_queue_capacity, config.event_drop_policy);
        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            events: Arc::new(events),
            metrics: FeedMetrics::new()?,
            config: Arc::new(config),
        })
    }
}
