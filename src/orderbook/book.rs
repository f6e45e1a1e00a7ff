//! Core order book implementation
//!
//! Orders are stored per side keyed by exchange order id. The sorted views are a
//! pure function of those maps and are re-derived in full by `rebuild_views`.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use super::{
    AppliedChange, BookMutation, BookStats, Level, LevelSnapshot, MutationOp, Order, OrderId,
    Side,
};
use crate::error::{MarketDataError, Result};

/// Number of view entries per side used for the imbalance statistic
const IMBALANCE_DEPTH: usize = 5;

/// Order book for a single symbol
#[derive(Debug, Clone)]
pub struct PriceLevelBook {
    symbol: String,
    /// Time of the last applied mutation (microseconds)
    timestamp_micros: u64,
    bids: HashMap<OrderId, Order>,
    asks: HashMap<OrderId, Order>,
    /// Bids sorted by price descending, then order id
    sorted_bids: Vec<Level>,
    /// Asks sorted by price ascending, then order id
    sorted_asks: Vec<Level>,
    /// Set once both sides have been populated; never cleared
    ready: bool,
}

impl PriceLevelBook {
    /// Create a new empty order book
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp_micros: 0,
            bids: HashMap::new(),
            asks: HashMap::new(),
            sorted_bids: Vec::new(),
            sorted_asks: Vec::new(),
            ready: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Apply one mutation to the order maps
    ///
    /// The views are stale until the next `rebuild_views`. The returned change is
    /// resolved against the current book state rather than the mutation's intent, so
    /// an update for an id the book never saw comes back as `Inserted`.
    pub fn apply(&mut self, mutation: &BookMutation, now: u64) -> AppliedChange {
        self.timestamp_micros = self.timestamp_micros.max(now);
        let id = mutation.order_id;

        if mutation.op == MutationOp::Delete || mutation.size.is_zero() {
            return match self.side_mut(mutation.side).remove(&id) {
                Some(_) => AppliedChange::Removed,
                None => AppliedChange::NoOp,
            };
        }

        let resting_price = self.side_map(mutation.side).get(&id).map(|o| o.price);
        let Some(price) = mutation.price.or(resting_price) else {
            debug!(
                symbol = %self.symbol,
                order_id = id,
                "Size update for unknown order without price, skipping"
            );
            return AppliedChange::NoOp;
        };

        // An id may only rest on one side at a time
        let from = mutation.side.opposite();
        let moved = self.side_mut(from).remove(&id).is_some();
        if moved {
            debug!(symbol = %self.symbol, order_id = id, "Order id moved across sides");
        }

        let order = Order {
            order_id: id,
            side: mutation.side,
            price,
            size: mutation.size.abs(),
        };
        match self.side_mut(mutation.side).insert(id, order) {
            Some(_) => AppliedChange::Replaced,
            None if moved => AppliedChange::Moved { from },
            None => AppliedChange::Inserted,
        }
    }

    /// Re-derive the sorted views from the order maps
    pub fn rebuild_views(&mut self) {
        self.sorted_bids = Self::sorted_view(&self.bids, Side::Bid);
        self.sorted_asks = Self::sorted_view(&self.asks, Side::Ask);

        if !self.sorted_bids.is_empty() && !self.sorted_asks.is_empty() {
            self.ready = true;
        }
    }

    fn sorted_view(orders: &HashMap<OrderId, Order>, side: Side) -> Vec<Level> {
        let mut entries: Vec<&Order> = orders.values().collect();
        match side {
            Side::Bid => entries.sort_by(|a, b| {
                b.price.cmp(&a.price).then(a.order_id.cmp(&b.order_id))
            }),
            Side::Ask => entries.sort_by(|a, b| {
                a.price.cmp(&b.price).then(a.order_id.cmp(&b.order_id))
            }),
        }
        entries
            .into_iter()
            .map(|o| Level {
                price: o.price,
                quantity: o.size,
            })
            .collect()
    }

    /// Aggregate notional, size and VWAP over the first `n` entries per side
    pub fn top_levels(&self, n: usize) -> Result<LevelSnapshot> {
        if !self.ready {
            return Err(MarketDataError::NotReady(self.symbol.clone()));
        }

        let bids = &self.sorted_bids[..n.min(self.sorted_bids.len())];
        let asks = &self.sorted_asks[..n.min(self.sorted_asks.len())];
        let (bids_total_notional, bids_total_size, bids_vwap) = Self::aggregate(bids);
        let (asks_total_notional, asks_total_size, asks_vwap) = Self::aggregate(asks);

        Ok(LevelSnapshot {
            bids_total_notional,
            bids_total_size,
            bids_vwap,
            asks_total_notional,
            asks_total_size,
            asks_vwap,
            n: bids.len().max(asks.len()),
        })
    }

    fn aggregate(levels: &[Level]) -> (Decimal, Decimal, Decimal) {
        let notional: Decimal = levels.iter().map(|l| l.price * l.quantity).sum();
        let size: Decimal = levels.iter().map(|l| l.quantity).sum();
        let vwap = if size > Decimal::ZERO {
            notional / size
        } else {
            Decimal::ZERO
        };
        (notional, size, vwap)
    }

    /// Drop every order ahead of a full snapshot
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sorted_bids.clear();
        self.sorted_asks.clear();
    }

    /// Price-aggregated levels for one side, best first
    pub fn levels(&self, side: Side, depth: usize) -> Vec<Level> {
        let mut levels: Vec<Level> = Vec::with_capacity(depth);
        for entry in self.view(side) {
            match levels.last_mut() {
                Some(last) if last.price == entry.price => last.quantity += entry.quantity,
                _ => {
                    if levels.len() == depth {
                        break;
                    }
                    levels.push(*entry);
                }
            }
        }
        levels
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.sorted_bids.first().map(|l| l.price)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.sorted_asks.first().map(|l| l.price)
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Get spread in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask(), self.mid_price()) {
            (Some(bid), Some(ask), Some(mid)) if mid > Decimal::ZERO => {
                Some((ask - bid) / mid * Decimal::from(10000))
            }
            _ => None,
        }
    }

    /// Size imbalance over the first `depth` entries per side
    pub fn imbalance(&self, depth: usize) -> Option<Decimal> {
        let bid_volume: Decimal = self.sorted_bids.iter().take(depth).map(|l| l.quantity).sum();
        let ask_volume: Decimal = self.sorted_asks.iter().take(depth).map(|l| l.quantity).sum();

        let total = bid_volume + ask_volume;
        if total > Decimal::ZERO {
            Some((bid_volume - ask_volume) / total)
        } else {
            None
        }
    }

    pub fn stats(&self) -> BookStats {
        BookStats {
            timestamp: self.timestamp_micros,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            mid_price: self.mid_price(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(IMBALANCE_DEPTH),
            bid_orders: self.bids.len(),
            ask_orders: self.asks.len(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn timestamp_micros(&self) -> u64 {
        self.timestamp_micros
    }

    pub fn order(&self, side: Side, order_id: OrderId) -> Option<&Order> {
        self.side_map(side).get(&order_id)
    }

    pub fn orders(&self, side: Side) -> &HashMap<OrderId, Order> {
        self.side_map(side)
    }

    pub fn view(&self, side: Side) -> &[Level] {
        match side {
            Side::Bid => &self.sorted_bids,
            Side::Ask => &self.sorted_asks,
        }
    }

    fn side_map(&self, side: Side) -> &HashMap<OrderId, Order> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<OrderId, Order> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Reverse;

    fn mutation_strategy() -> impl Strategy<Value = BookMutation> {
        (0u8..3, any::<bool>(), 0u64..12, 95i64..105, 0i64..5).prop_map(
            |(op, bid, order_id, price, size)| {
                let side = if bid { Side::Bid } else { Side::Ask };
                let price = Decimal::from(price);
                let size = Decimal::from(size);
                match op {
                    0 => BookMutation::insert("BTCUSD", side, order_id, price, size),
                    1 => BookMutation::update("BTCUSD", side, order_id, Some(price), size),
                    _ => BookMutation::delete("BTCUSD", side, order_id),
                }
            },
        )
    }

    fn log_strategy() -> impl Strategy<Value = Vec<BookMutation>> {
        prop::collection::vec(mutation_strategy(), 0..60)
    }

    fn replay(book: &mut PriceLevelBook, log: &[BookMutation]) {
        for (i, m) in log.iter().enumerate() {
            book.apply(m, i as u64 + 1);
            book.rebuild_views();
        }
    }

    /// View derived directly from the order map: best price first, then lowest id
    fn expected_view(book: &PriceLevelBook, side: Side) -> Vec<Level> {
        let mut orders: Vec<&Order> = book.orders(side).values().collect();
        match side {
            Side::Bid => orders.sort_by_key(|o| (Reverse(o.price), o.order_id)),
            Side::Ask => orders.sort_by_key(|o| (o.price, o.order_id)),
        }
        orders
            .into_iter()
            .map(|o| Level {
                price: o.price,
                quantity: o.size,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_views_follow_price_then_id(log in log_strategy()) {
            let mut book = PriceLevelBook::new("BTCUSD");
            for (i, m) in log.iter().enumerate() {
                book.apply(m, i as u64 + 1);
                book.rebuild_views();

                let expected_bids = expected_view(&book, Side::Bid);
                let expected_asks = expected_view(&book, Side::Ask);
                prop_assert_eq!(book.view(Side::Bid), expected_bids.as_slice());
                prop_assert_eq!(book.view(Side::Ask), expected_asks.as_slice());
                for id in book.orders(Side::Bid).keys() {
                    prop_assert!(!book.orders(Side::Ask).contains_key(id));
                }
            }
        }

        #[test]
        fn prop_insert_then_delete_restores_book(
            log in log_strategy(),
            bid in any::<bool>(),
            price in 90i64..110,
            size in 1i64..10,
        ) {
            let mut book = PriceLevelBook::new("BTCUSD");
            replay(&mut book, &log);
            let baseline = book.clone();

            // Ids in the log stay below 12
            let side = if bid { Side::Bid } else { Side::Ask };
            let insert = BookMutation::insert(
                "BTCUSD",
                side,
                1_000,
                Decimal::from(price),
                Decimal::from(size),
            );
            book.apply(&insert, 10_000);
            book.rebuild_views();
            book.apply(&BookMutation::delete("BTCUSD", side, 1_000), 10_001);
            book.rebuild_views();

            prop_assert_eq!(book.orders(Side::Bid), baseline.orders(Side::Bid));
            prop_assert_eq!(book.orders(Side::Ask), baseline.orders(Side::Ask));
            prop_assert_eq!(book.view(Side::Bid), baseline.view(Side::Bid));
            prop_assert_eq!(book.view(Side::Ask), baseline.view(Side::Ask));
        }

        #[test]
        fn prop_reset_then_replay_matches_fresh_book(
            history in log_strategy(),
            log in log_strategy(),
        ) {
            let mut fresh = PriceLevelBook::new("BTCUSD");
            replay(&mut fresh, &log);

            let mut replayed = PriceLevelBook::new("BTCUSD");
            replay(&mut replayed, &history);
            replayed.reset();
            replay(&mut replayed, &log);

            prop_assert_eq!(replayed.orders(Side::Bid), fresh.orders(Side::Bid));
            prop_assert_eq!(replayed.orders(Side::Ask), fresh.orders(Side::Ask));
            prop_assert_eq!(replayed.view(Side::Bid), fresh.view(Side::Bid));
            prop_assert_eq!(replayed.view(Side::Ask), fresh.view(Side::Ask));
        }
    }
}
