//! BitMEX `orderBookL2` adapter
//!
//! Table messages carry an explicit action and a `Buy`/`Sell` side per row.
//! `partial` replaces the whole book for the symbols it covers; `update` rows only
//! carry the new size. BitMEX expects a text `ping` from idle clients and answers
//! with `pong`.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{decode_error, json_decimal, ExchangeAdapter, Liveness, ParseResult};
use crate::error::Result;
use crate::orderbook::{BookMutation, MutationOp, Side};

pub const BITMEX_WS_URL: &str = "wss://www.bitmex.com/realtime";

pub(crate) const EXCHANGE: &str = "BITMEX";
const TABLE: &str = "orderBookL2";

/// Adapter for the BitMEX realtime API
#[derive(Debug)]
pub struct BitmexAdapter {
    liveness: Liveness,
}

impl BitmexAdapter {
    pub fn new(instruments: &[String], now: u64) -> Self {
        Self {
            liveness: Liveness::new(instruments, now),
        }
    }

    fn parse_table(&mut self, msg: &Map<String, Value>, now: u64) -> Result<ParseResult> {
        let action = msg
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| decode_error("table message without action"))?;
        let rows = msg
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| decode_error("table message without data"))?;

        let op = match action {
            "partial" | "insert" => MutationOp::Insert,
            "update" => MutationOp::Update,
            "delete" => MutationOp::Delete,
            other => {
                debug!(action = %other, "Ignoring table action");
                return Ok(ParseResult::Ignored);
            }
        };

        let mutations: Vec<BookMutation> = rows
            .iter()
            .filter_map(|row| match decode_row(op, row) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(action = %action, error = %e, "Dropping book row");
                    None
                }
            })
            .collect();

        for mutation in &mutations {
            self.liveness.touch(&mutation.symbol, now);
        }

        if action != "partial" {
            return Ok(ParseResult::Mutations(mutations));
        }

        // An empty partial still clears the filtered symbol
        let mut symbols: Vec<String> = msg
            .get("filter")
            .and_then(|f| f.get("symbol"))
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();
        for mutation in &mutations {
            if !symbols.contains(&mutation.symbol) {
                symbols.push(mutation.symbol.clone());
            }
        }
        for symbol in &symbols {
            self.liveness.touch(symbol, now);
        }
        info!(symbols = ?symbols, rows = mutations.len(), "Book partial");

        Ok(ParseResult::Snapshot { symbols, mutations })
    }
}

fn decode_row(op: MutationOp, row: &Value) -> Result<BookMutation> {
    let symbol = row
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| decode_error("row without symbol"))?;
    let order_id = row
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| decode_error("row without id"))?;
    let side = match row.get("side").and_then(Value::as_str).map(str::to_lowercase) {
        Some(s) if s == "buy" => Side::Bid,
        Some(s) if s == "sell" => Side::Ask,
        other => return Err(decode_error(format!("invalid side {:?}", other))),
    };
    let price = row.get("price").and_then(json_decimal);
    let size = row.get("size").and_then(json_decimal);

    match op {
        MutationOp::Delete => Ok(BookMutation::delete(symbol, side, order_id)),
        MutationOp::Insert => {
            let price = price.ok_or_else(|| decode_error("insert row without price"))?;
            let size = size.ok_or_else(|| decode_error("insert row without size"))?;
            Ok(BookMutation::insert(symbol, side, order_id, price, size))
        }
        MutationOp::Update => {
            let size = size.ok_or_else(|| decode_error("update row without size"))?;
            Ok(BookMutation::update(symbol, side, order_id, price, size.max(Decimal::ZERO)))
        }
    }
}

impl ExchangeAdapter for BitmexAdapter {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    fn build_subscription(&self, instruments: &[String]) -> Vec<String> {
        let args: Vec<String> = instruments
            .iter()
            .map(|s| format!("{}:{}", TABLE, s))
            .collect();
        let msg = json!({ "op": "subscribe", "args": args }).to_string();
        info!(msg = %msg, "Subscription");
        vec![msg]
    }

    fn parse(&mut self, raw: &[u8], now: u64) -> Result<ParseResult> {
        if std::str::from_utf8(raw).map(str::trim) == Ok("pong") {
            self.liveness.touch_all(now);
            return Ok(ParseResult::Heartbeat { symbol: None });
        }

        let Value::Object(msg) = serde_json::from_slice::<Value>(raw)? else {
            return Ok(ParseResult::Ignored);
        };

        if msg.get("success").and_then(Value::as_bool) == Some(true) {
            let topic = msg.get("subscribe").and_then(Value::as_str).unwrap_or_default();
            return match topic.split_once(':') {
                Some((TABLE, symbol)) => {
                    info!(symbol = %symbol, "Subscribed");
                    self.liveness.touch(symbol, now);
                    Ok(ParseResult::SubscriptionAck {
                        channel_id: None,
                        symbol: symbol.to_string(),
                    })
                }
                _ => Ok(ParseResult::Ignored),
            };
        }

        if let Some(error) = msg.get("error") {
            warn!(error = %error, "Exchange error");
            return Ok(ParseResult::Ignored);
        }

        match msg.get("table").and_then(Value::as_str) {
            Some(TABLE) => self.parse_table(&msg, now),
            _ => {
                debug!("Ignoring non-book message");
                Ok(ParseResult::Ignored)
            }
        }
    }

    fn keepalive(&self) -> Option<String> {
        Some("ping".to_string())
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    fn reset_session(&mut self, instruments: &[String], now: u64) {
        self.liveness.reset(instruments, now);
    }
}
