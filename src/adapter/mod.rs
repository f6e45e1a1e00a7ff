//! Exchange adapters
//!
//! Each exchange dialect decodes its own wire messages into the canonical
//! `BookMutation` vocabulary, builds its subscription handshake, and tracks
//! per-instrument liveness. Adapters hold no book state.

mod bitfinex;
mod bitmex;
mod liveness;

pub use bitfinex::{BitfinexAdapter, BITFINEX_WS_URL};
pub use bitmex::{BitmexAdapter, BITMEX_WS_URL};
pub use liveness::Liveness;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{MarketDataError, Result};
use crate::orderbook::BookMutation;

/// Outcome of decoding one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// Subscription confirmed; `channel_id` is set for exchanges that route diffs by id
    SubscriptionAck {
        channel_id: Option<u64>,
        symbol: String,
    },
    /// Liveness signal only; `None` covers every instrument on the connection
    Heartbeat { symbol: Option<String> },
    /// Incremental changes, to be applied in order
    Mutations(Vec<BookMutation>),
    /// Full-book replacement for `symbols`
    Snapshot {
        symbols: Vec<String>,
        mutations: Vec<BookMutation>,
    },
    Ignored,
}

/// Protocol dialect of one exchange
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange name stamped on canonical events
    fn exchange(&self) -> &'static str;

    /// Handshake messages to send once the channel is open
    fn build_subscription(&self, instruments: &[String]) -> Vec<String>;

    /// Decode one raw message received at `now` (microseconds)
    fn parse(&mut self, raw: &[u8], now: u64) -> Result<ParseResult>;

    /// Application-level ping, for exchanges that expect the client to send one
    fn keepalive(&self) -> Option<String> {
        None
    }

    fn liveness(&self) -> &Liveness;

    /// Forget connection-scoped state before a new connection starts
    fn reset_session(&mut self, instruments: &[String], now: u64);
}

/// Supported exchange dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Bitfinex,
    Bitmex,
}

impl Exchange {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Exchange::Bitfinex => BITFINEX_WS_URL,
            Exchange::Bitmex => BITMEX_WS_URL,
        }
    }

    /// Name used in events and topics
    pub fn name(self) -> &'static str {
        match self {
            Exchange::Bitfinex => bitfinex::EXCHANGE,
            Exchange::Bitmex => bitmex::EXCHANGE,
        }
    }

    pub fn adapter(self, instruments: &[String], now: u64) -> Box<dyn ExchangeAdapter> {
        match self {
            Exchange::Bitfinex => Box::new(BitfinexAdapter::new(instruments, now)),
            Exchange::Bitmex => Box::new(BitmexAdapter::new(instruments, now)),
        }
    }
}

impl FromStr for Exchange {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bitfinex" => Ok(Exchange::Bitfinex),
            "bitmex" => Ok(Exchange::Bitmex),
            other => Err(MarketDataError::ConfigError(format!(
                "Unsupported exchange: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Bitfinex => write!(f, "bitfinex"),
            Exchange::Bitmex => write!(f, "bitmex"),
        }
    }
}

/// Read a decimal from a JSON number or numeric string
pub(crate) fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from(i));
            }
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

pub(crate) fn decode_error(msg: impl Into<String>) -> MarketDataError {
    MarketDataError::DecodeError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_json_decimal() {
        assert_eq!(json_decimal(&json!(42)), Some(dec!(42)));
        assert_eq!(json_decimal(&json!(-4)), Some(dec!(-4)));
        assert_eq!(json_decimal(&json!(6543.25)), Some(dec!(6543.25)));
        assert_eq!(json_decimal(&json!(1e-7)), Some(dec!(0.0000001)));
        assert_eq!(json_decimal(&json!("0.015")), Some(dec!(0.015)));
        assert_eq!(json_decimal(&json!(null)), None);
        assert_eq!(json_decimal(&json!("abc")), None);
    }

    #[test]
    fn test_exchange_from_str() {
        assert_eq!("Bitfinex".parse::<Exchange>().unwrap(), Exchange::Bitfinex);
        assert_eq!(" bitmex ".parse::<Exchange>().unwrap(), Exchange::Bitmex);
        assert!(matches!(
            "kraken".parse::<Exchange>(),
            Err(MarketDataError::ConfigError(_))
        ));
        assert_eq!(Exchange::Bitmex.default_endpoint(), BITMEX_WS_URL);
    }

    #[test]
    fn test_exchange_builds_matching_adapter() {
        let symbols = vec!["XBTUSD".to_string()];
        assert_eq!(Exchange::Bitmex.adapter(&symbols, 0).exchange(), "BITMEX");
        assert_eq!(Exchange::Bitfinex.adapter(&symbols, 0).exchange(), "BITFINEX");
        assert_eq!(Exchange::Bitmex.name(), "BITMEX");
        assert_eq!(Exchange::Bitfinex.name(), "BITFINEX");
    }
}
