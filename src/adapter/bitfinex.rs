//! Bitfinex v2 raw book adapter
//!
//! Diffs arrive as `[chanId, [id, price, amount]]` on numeric channels bound by the
//! subscription ack. The sign of `amount` carries the side and a zero price removes
//! the order. The first message on a channel is the full book as an array of rows.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{decode_error, json_decimal, ExchangeAdapter, Liveness, ParseResult};
use crate::error::{MarketDataError, Result};
use crate::orderbook::{BookMutation, Side};

pub const BITFINEX_WS_URL: &str = "wss://api.bitfinex.com/ws/2";

pub(crate) const EXCHANGE: &str = "BITFINEX";
/// Raw order precision; every row is an individual order
const PRECISION: &str = "R0";
const BOOK_LENGTH: &str = "25";

/// Adapter for the Bitfinex `book` channel
#[derive(Debug)]
pub struct BitfinexAdapter {
    /// Channel id -> subscribed pair, valid for one connection only
    channels: HashMap<u64, String>,
    liveness: Liveness,
}

impl BitfinexAdapter {
    pub fn new(instruments: &[String], now: u64) -> Self {
        Self {
            channels: HashMap::new(),
            liveness: Liveness::new(instruments, now),
        }
    }

    pub fn channel_symbol(&self, channel_id: u64) -> Option<&str> {
        self.channels.get(&channel_id).map(String::as_str)
    }

    fn parse_event(&mut self, event: &Map<String, Value>, now: u64) -> Result<ParseResult> {
        match event.get("event").and_then(Value::as_str) {
            Some("subscribed") => {
                let channel_id = event
                    .get("chanId")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| decode_error("subscribed event without chanId"))?;
                let pair = event
                    .get("pair")
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_error("subscribed event without pair"))?
                    .to_string();

                info!(pair = %pair, chan_id = channel_id, "Subscribed");
                self.channels.insert(channel_id, pair.clone());
                self.liveness.touch(&pair, now);
                Ok(ParseResult::SubscriptionAck {
                    channel_id: Some(channel_id),
                    symbol: pair,
                })
            }
            Some("error") => {
                warn!(
                    code = ?event.get("code"),
                    msg = ?event.get("msg"),
                    "Subscription error"
                );
                Ok(ParseResult::Ignored)
            }
            other => {
                debug!(event = ?other, "Ignoring event");
                Ok(ParseResult::Ignored)
            }
        }
    }

    fn parse_channel(&mut self, items: &[Value], now: u64) -> Result<ParseResult> {
        let channel_id = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| decode_error("channel message without numeric channel id"))?;
        let symbol = self
            .channels
            .get(&channel_id)
            .cloned()
            .ok_or(MarketDataError::UnresolvedChannel(channel_id))?;

        match items.get(1) {
            Some(Value::String(tag)) if tag == "hb" => {
                self.liveness.touch(&symbol, now);
                Ok(ParseResult::Heartbeat {
                    symbol: Some(symbol),
                })
            }
            // Checksums are only used as a sign of life
            Some(Value::String(tag)) if tag == "cs" => {
                self.liveness.touch(&symbol, now);
                Ok(ParseResult::Ignored)
            }
            Some(Value::Array(rows)) if rows.is_empty() || rows[0].is_array() => {
                let mutations = rows
                    .iter()
                    .filter_map(|row| match decode_row(&symbol, row) {
                        Ok(m) => Some(m),
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "Dropping snapshot row");
                            None
                        }
                    })
                    .collect();
                self.liveness.touch(&symbol, now);
                Ok(ParseResult::Snapshot {
                    symbols: vec![symbol],
                    mutations,
                })
            }
            Some(row @ Value::Array(_)) => {
                let mutation = decode_row(&symbol, row)?;
                self.liveness.touch(&symbol, now);
                Ok(ParseResult::Mutations(vec![mutation]))
            }
            _ => Err(decode_error(format!(
                "unexpected payload on channel {}",
                channel_id
            ))),
        }
    }
}

/// Decode a `[id, price, amount]` row
fn decode_row(symbol: &str, row: &Value) -> Result<BookMutation> {
    let fields = row
        .as_array()
        .filter(|f| f.len() == 3)
        .ok_or_else(|| decode_error(format!("malformed book row: {}", row)))?;

    let order_id = fields[0]
        .as_u64()
        .ok_or_else(|| decode_error("order id is not an unsigned integer"))?;
    let price = json_decimal(&fields[1]).ok_or_else(|| decode_error("invalid price"))?;
    let amount = json_decimal(&fields[2]).ok_or_else(|| decode_error("invalid amount"))?;

    let side = match amount.cmp(&Decimal::ZERO) {
        Ordering::Greater => Side::Bid,
        Ordering::Less => Side::Ask,
        Ordering::Equal => {
            return Err(decode_error(format!("zero amount for order {}", order_id)))
        }
    };

    if price <= Decimal::ZERO {
        Ok(BookMutation::delete(symbol, side, order_id))
    } else {
        Ok(BookMutation::update(symbol, side, order_id, Some(price), amount.abs()))
    }
}

impl ExchangeAdapter for BitfinexAdapter {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    fn build_subscription(&self, instruments: &[String]) -> Vec<String> {
        instruments
            .iter()
            .map(|pair| {
                let msg = json!({
                    "event": "subscribe",
                    "channel": "book",
                    "prec": PRECISION,
                    "len": BOOK_LENGTH,
                    "symbol": pair,
                })
                .to_string();
                info!(msg = %msg, "Subscription");
                msg
            })
            .collect()
    }

    fn parse(&mut self, raw: &[u8], now: u64) -> Result<ParseResult> {
        match serde_json::from_slice::<Value>(raw)? {
            Value::Object(event) => self.parse_event(&event, now),
            Value::Array(items) => self.parse_channel(&items, now),
            _ => Ok(ParseResult::Ignored),
        }
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    fn reset_session(&mut self, instruments: &[String], now: u64) {
        self.channels.clear();
        self.liveness.reset(instruments, now);
    }
}
