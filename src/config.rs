//! Configuration module for the book monitor

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::adapter::Exchange;
use crate::error::{MarketDataError, Result};
use crate::publisher::DropPolicy;
use crate::websocket::SessionConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Exchange dialect to speak
    pub exchange: Exchange,

    /// Instruments to subscribe to (e.g., ["BTCUSD", "ETHUSD"])
    pub symbols: Vec<String>,

    /// WebSocket endpoint
    pub ws_endpoint: String,

    /// IPC socket path for publishing events
    pub ipc_socket_path: String,

    /// Depth used for periodic level snapshots
    pub depth_levels: usize,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_backoff_ms: u64,

    /// Per-instrument silence tolerated before the connection is recycled
    pub heartbeat_timeout_secs: u64,

    /// Interval between application-level pings
    pub keepalive_interval_secs: u64,

    /// Consecutive unroutable diffs tolerated before resubscribing
    pub unresolved_channel_threshold: u32,

    /// Bounded event queue between the session and the sink
    pub event_queue_capacity: usize,
    pub event_drop_policy: DropPolicy,

    /// Interval of the level snapshot reporter in seconds
    pub snapshot_interval_secs: u64,

    /// Port for the health/metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let exchange: Exchange = env::var("EXCHANGE")
            .unwrap_or_else(|_| "bitfinex".to_string())
            .parse()?;

        let default_symbols = match exchange {
            Exchange::Bitfinex => "BTCUSD,ETHUSD",
            Exchange::Bitmex => "XBTUSD,ETHUSD",
        };
        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| default_symbols.to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(MarketDataError::ConfigError("SYMBOLS is empty".to_string()));
        }

        let event_drop_policy: DropPolicy = env::var("EVENT_DROP_POLICY")
            .unwrap_or_else(|_| "drop_oldest".to_string())
            .parse()?;

        Ok(Self {
            exchange,
            symbols,
            ws_endpoint: env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| exchange.default_endpoint().to_string()),
            ipc_socket_path: env::var("IPC_SOCKET_PATH")
                .unwrap_or_else(|_| "/tmp/book-monitor.sock".to_string()),
            depth_levels: parse_var("DEPTH_LEVELS", 5),
            reconnect_delay_ms: parse_var("RECONNECT_DELAY_MS", 1000),
            max_backoff_ms: parse_var("MAX_BACKOFF_MS", 60_000),
            heartbeat_timeout_secs: parse_var("HEARTBEAT_TIMEOUT_SECS", 30),
            keepalive_interval_secs: parse_var("KEEPALIVE_INTERVAL_SECS", 5),
            unresolved_channel_threshold: parse_var("UNRESOLVED_CHANNEL_THRESHOLD", 50),
            event_queue_capacity: parse_var("EVENT_QUEUE_CAPACITY", 10_000),
            event_drop_policy,
            snapshot_interval_secs: parse_var("SNAPSHOT_INTERVAL_SECS", 1),
            health_port: parse_var("HEALTH_PORT", 9090),
        })
    }

    /// Session settings derived from this configuration
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            instruments: self.symbols.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            unresolved_channel_threshold: self.unresolved_channel_threshold,
        }
    }
}

/// Read a numeric variable, falling back to `default` when unset or invalid
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: Exchange::Bitfinex,
            symbols: vec!["BTCUSD".to_string()],
            ws_endpoint: Exchange::Bitfinex.default_endpoint().to_string(),
            ipc_socket_path: "/tmp/book-monitor.sock".to_string(),
            depth_levels: 5,
            reconnect_delay_ms: 1000,
            max_backoff_ms: 60_000,
            heartbeat_timeout_secs: 30,
            keepalive_interval_secs: 5,
            unresolved_channel_threshold: 50,
            event_queue_capacity: 10_000,
            event_drop_policy: DropPolicy::DropOldest,
            snapshot_interval_secs: 1,
            health_port: 9090,
        }
    }
}
