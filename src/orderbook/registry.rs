//! Book registry
//!
//! Owns one order book per configured symbol and routes canonical mutations to them.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::{
    topic, AppliedChange, BookMutation, BookSnapshot, BookStats, CanonicalEvent, EventAction,
    LevelSnapshot, PriceLevelBook, Side,
};
use crate::error::{MarketDataError, Result};

/// Order books for every subscribed symbol
#[derive(Debug, Default)]
pub struct BookRegistry {
    books: HashMap<String, PriceLevelBook>,
}

impl BookRegistry {
    /// Create a registry with an empty book per symbol
    pub fn new(symbols: &[String]) -> Self {
        Self {
            books: symbols
                .iter()
                .map(|s| (s.clone(), PriceLevelBook::new(s)))
                .collect(),
        }
    }

    pub fn get_or_create(&mut self, symbol: &str) -> &PriceLevelBook {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| PriceLevelBook::new(symbol))
    }

    pub fn get(&self, symbol: &str) -> Option<&PriceLevelBook> {
        self.books.get(symbol)
    }

    /// Apply a single mutation and build the resulting events
    ///
    /// Event actions reflect what the book actually did, not what the exchange
    /// claimed. A mutation that changed nothing yields no events; an id that moved
    /// sides yields a delete on the side it left followed by an insert.
    pub fn apply_mutation(
        &mut self,
        mutation: &BookMutation,
        exchange: &str,
        now: u64,
    ) -> Result<Vec<CanonicalEvent>> {
        let book = self
            .books
            .get_mut(&mutation.symbol)
            .ok_or_else(|| MarketDataError::UnknownSymbol(mutation.symbol.clone()))?;

        let prior = book.order(mutation.side, mutation.order_id).cloned();
        let prior_opposite = book.order(mutation.side.opposite(), mutation.order_id).cloned();
        let change = book.apply(mutation, now);
        book.rebuild_views();

        let Some(action) = change.action() else {
            return Ok(Vec::new());
        };

        let event = |action: EventAction, side: Side, price: Decimal, size: Decimal| {
            CanonicalEvent {
                timestamp: book.timestamp_micros(),
                exchange: exchange.to_string(),
                symbol: mutation.symbol.clone(),
                action,
                side,
                order_id: mutation.order_id,
                size,
                price,
            }
        };

        let mut events = Vec::with_capacity(2);
        if let AppliedChange::Moved { from } = change {
            let price = prior_opposite.map(|o| o.price).unwrap_or_default();
            events.push(event(EventAction::Delete, from, price, Decimal::ZERO));
        }

        let (price, size) = match book.order(mutation.side, mutation.order_id) {
            Some(order) => (order.price, order.size),
            None => (
                prior.map(|o| o.price).or(mutation.price).unwrap_or_default(),
                Decimal::ZERO,
            ),
        };
        events.push(event(action, mutation.side, price, size));

        Ok(events)
    }

    /// Apply one message's mutations in order
    ///
    /// A failing mutation is logged and dropped; the rest of the batch still applies.
    pub fn apply_batch(
        &mut self,
        mutations: &[BookMutation],
        exchange: &str,
        now: u64,
    ) -> Vec<CanonicalEvent> {
        let mut events = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match self.apply_mutation(mutation, exchange, now) {
                Ok(applied) => events.extend(applied),
                Err(e) => {
                    warn!(error = %e, symbol = %mutation.symbol, "Dropping mutation");
                }
            }
        }
        events
    }

    /// Replace the named books with the contents of a full snapshot
    pub fn replace(
        &mut self,
        symbols: &[String],
        mutations: &[BookMutation],
        exchange: &str,
        now: u64,
    ) -> Vec<CanonicalEvent> {
        for symbol in symbols {
            match self.books.get_mut(symbol) {
                Some(book) => {
                    book.reset();
                    debug!(symbol = %symbol, rows = mutations.len(), "Book reset for snapshot");
                }
                None => warn!(symbol = %symbol, "Snapshot for unknown symbol"),
            }
        }
        self.apply_batch(mutations, exchange, now)
    }

    /// Top-of-book aggregates for one symbol
    pub fn top_levels(&self, symbol: &str, n: usize) -> Result<LevelSnapshot> {
        self.books
            .get(symbol)
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.to_string()))?
            .top_levels(n)
    }

    /// Aggregates for every book that has been synchronized at least once
    pub fn snapshot_all(&self, n: usize) -> BTreeMap<String, LevelSnapshot> {
        self.books
            .iter()
            .filter_map(|(symbol, book)| book.top_levels(n).ok().map(|s| (symbol.clone(), s)))
            .collect()
    }

    /// Topic-addressed snapshots of every synchronized book, ordered by symbol
    pub fn book_snapshots(&self, n: usize, exchange: &str) -> Vec<BookSnapshot> {
        self.snapshot_all(n)
            .into_iter()
            .map(|(symbol, levels)| BookSnapshot {
                timestamp: self
                    .books
                    .get(&symbol)
                    .map(|book| book.timestamp_micros())
                    .unwrap_or_default(),
                exchange: exchange.to_string(),
                topic: topic(exchange, &symbol),
                symbol,
                levels,
            })
            .collect()
    }

    pub fn stats(&self, symbol: &str) -> Option<BookStats> {
        self.books.get(symbol).map(|book| book.stats())
    }

    /// Get list of symbols being tracked, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.books.contains_key(symbol)
    }
}
