//! Order book module
//!
//! Per-instrument order books keyed by exchange order id, the canonical mutation
//! vocabulary adapters speak, and the change events emitted downstream.

mod book;
mod registry;
mod stats;

pub use book::PriceLevelBook;
pub use registry::BookRegistry;
pub use stats::{wall_clock_micros, BookStats};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-assigned order identifier
pub type OrderId = u64;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// A single (price, size) entry of a sorted view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A resting order as last reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Intent carried by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
}

/// Exchange-agnostic book change produced by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMutation {
    pub symbol: String,
    pub op: MutationOp,
    pub side: Side,
    pub order_id: OrderId,
    /// Absent when the exchange only reports a new size for a resting order
    pub price: Option<Decimal>,
    pub size: Decimal,
}

impl BookMutation {
    pub fn insert(symbol: &str, side: Side, order_id: OrderId, price: Decimal, size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            op: MutationOp::Insert,
            side,
            order_id,
            price: Some(price),
            size,
        }
    }

    pub fn update(
        symbol: &str,
        side: Side,
        order_id: OrderId,
        price: Option<Decimal>,
        size: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            op: MutationOp::Update,
            side,
            order_id,
            price,
            size,
        }
    }

    pub fn delete(symbol: &str, side: Side, order_id: OrderId) -> Self {
        Self {
            symbol: symbol.to_string(),
            op: MutationOp::Delete,
            side,
            order_id,
            price: None,
            size: Decimal::ZERO,
        }
    }
}

/// What a book actually did with a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedChange {
    Inserted,
    Replaced,
    Removed,
    /// Inserted after removing the same id from the other side
    Moved { from: Side },
    NoOp,
}

impl AppliedChange {
    /// Downstream action for this change, `None` when nothing changed.
    pub fn action(self) -> Option<EventAction> {
        match self {
            AppliedChange::Inserted | AppliedChange::Moved { .. } => Some(EventAction::Insert),
            AppliedChange::Replaced => Some(EventAction::Update),
            AppliedChange::Removed => Some(EventAction::Delete),
            AppliedChange::NoOp => None,
        }
    }
}

/// Action reported in a canonical event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Insert,
    Update,
    Delete,
}

/// Normalized change event published to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Book timestamp after the change (microseconds)
    pub timestamp: u64,
    pub exchange: String,
    pub symbol: String,
    pub action: EventAction,
    pub side: Side,
    pub order_id: OrderId,
    pub size: Decimal,
    pub price: Decimal,
}

/// Aggregates over the top `n` entries of each side
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub bids_total_notional: Decimal,
    pub bids_total_size: Decimal,
    pub bids_vwap: Decimal,
    pub asks_total_notional: Decimal,
    pub asks_total_size: Decimal,
    pub asks_vwap: Decimal,
    pub n: usize,
}

/// Routing key for an instrument's book stream, e.g. `/BITMEX/XBTUSD/orderbook`
pub fn topic(exchange: &str, symbol: &str) -> String {
    format!("/{}/{}/orderbook", exchange, symbol)
}

/// Periodic top-of-book aggregate published under the instrument topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Book timestamp (microseconds)
    pub timestamp: u64,
    pub exchange: String,
    pub symbol: String,
    pub topic: String,
    pub levels: LevelSnapshot,
}
