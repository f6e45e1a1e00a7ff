//! Top-of-book statistics

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in microseconds since the epoch
pub fn wall_clock_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// Computed top-of-book statistics for an order book
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookStats {
    /// Book timestamp (microseconds)
    pub timestamp: u64,

    pub best_bid: Option<Decimal>,

    pub best_ask: Option<Decimal>,

    /// Mid price (average of best bid and ask)
    pub mid_price: Option<Decimal>,

    /// Spread in basis points
    pub spread_bps: Option<Decimal>,

    /// Simple imbalance over the top entries: (bid_vol - ask_vol) / (bid_vol + ask_vol)
    pub imbalance: Option<Decimal>,

    /// Number of resting bid orders
    pub bid_orders: usize,

    /// Number of resting ask orders
    pub ask_orders: usize,
}

impl BookStats {
    /// Both sides quoted and not crossed
    pub fn is_healthy(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => false,
        }
    }

    /// Age of the book relative to `now` (microseconds)
    pub fn staleness_micros(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}
