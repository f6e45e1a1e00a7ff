//! Error types for the book monitor

use thiserror::Error;

/// Book monitor errors
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    #[error("Unresolved channel id: {0}")]
    UnresolvedChannel(u64),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Order book not ready: {0}")]
    NotReady(String),

    #[error("No heartbeat for {symbol} in {silent_ms}ms")]
    StaleLiveness { symbol: String, silent_ms: u64 },

    #[error("Feed desynchronized after {unresolved} unresolved messages")]
    Desynchronized { unresolved: u32 },

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),
}

impl MarketDataError {
    /// Whether the error ends the current connection attempt.
    ///
    /// Everything else is scoped to a single message and is dropped in place.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            MarketDataError::ChannelError(_)
                | MarketDataError::StaleLiveness { .. }
                | MarketDataError::Desynchronized { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::ChannelError(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::DecodeError(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::IpcError(err.to_string())
    }
}

impl From<prometheus::Error> for MarketDataError {
    fn from(err: prometheus::Error) -> Self {
        MarketDataError::MetricsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_fatal_classification() {
        assert!(MarketDataError::ChannelError("reset".into()).is_connection_fatal());
        assert!(MarketDataError::StaleLiveness {
            symbol: "BTCUSD".into(),
            silent_ms: 30_000
        }
        .is_connection_fatal());
        assert!(MarketDataError::Desynchronized { unresolved: 10 }.is_connection_fatal());

        assert!(!MarketDataError::DecodeError("bad".into()).is_connection_fatal());
        assert!(!MarketDataError::UnresolvedChannel(17).is_connection_fatal());
        assert!(!MarketDataError::UnknownSymbol("DOGEUSD".into()).is_connection_fatal());
    }

    #[test]
    fn test_transport_errors_end_the_connection() {
        let err: MarketDataError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, MarketDataError::ChannelError(_)));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = MarketDataError::StaleLiveness {
            symbol: "XBTUSD".into(),
            silent_ms: 5000,
        };
        assert_eq!(err.to_string(), "No heartbeat for XBTUSD in 5000ms");
    }
}
