//! Periodic book snapshots
//!
//! Every period the top-level aggregates of each synchronized book are logged
//! and published to the sink under the instrument topic.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::orderbook::{BookRegistry, BookSnapshot};
use crate::publisher::EventSink;

/// Snapshot and log every synchronized book
pub fn report_once(
    registry: &BookRegistry,
    depth: usize,
    exchange: &str,
    now: u64,
) -> Vec<BookSnapshot> {
    let snapshots = registry.book_snapshots(depth, exchange);

    for snapshot in &snapshots {
        let Some(stats) = registry.stats(&snapshot.symbol) else {
            continue;
        };
        info!(
            symbol = %snapshot.symbol,
            depth = snapshot.levels.n,
            bids_vwap = %snapshot.levels.bids_vwap,
            bids_size = %snapshot.levels.bids_total_size,
            asks_vwap = %snapshot.levels.asks_vwap,
            asks_size = %snapshot.levels.asks_total_size,
            mid_price = ?stats.mid_price,
            spread_bps = ?stats.spread_bps,
            imbalance = ?stats.imbalance,
            timestamp_micros = stats.timestamp,
            staleness_ms = stats.staleness_micros(now) / 1000,
            healthy = stats.is_healthy(),
            "Order book status"
        );
    }

    let waiting = registry.symbols().len() - snapshots.len();
    if waiting > 0 {
        debug!(waiting, "Books not yet synchronized");
    }
    snapshots
}

/// Publish snapshots every `period` until shutdown
pub async fn run_snapshot_reporter(
    registry: Arc<RwLock<BookRegistry>>,
    sink: Arc<dyn EventSink>,
    exchange: String,
    depth: usize,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately, before any book can be ready
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshots = {
                    let books = registry.read().await;
                    report_once(&books, depth, &exchange, crate::orderbook::wall_clock_micros())
                };
                for snapshot in &snapshots {
                    if let Err(e) = sink.publish_snapshot(snapshot).await {
                        warn!(error = %e, topic = %snapshot.topic, "Failed to publish snapshot");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Snapshot reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{BookMutation, Side};
    use crate::publisher::MockEventSink;
    use rust_decimal_macros::dec;

    fn registry() -> BookRegistry {
        let mut books = BookRegistry::new(&["BTCUSD".to_string(), "ETHUSD".to_string()]);
        books.apply_batch(
            &[
                BookMutation::insert("BTCUSD", Side::Bid, 1, dec!(100), dec!(2)),
                BookMutation::insert("BTCUSD", Side::Ask, 2, dec!(101), dec!(1)),
                BookMutation::insert("ETHUSD", Side::Bid, 3, dec!(10), dec!(5)),
            ],
            "BITFINEX",
            1_000,
        );
        books
    }

    #[test]
    fn test_report_skips_unsynchronized_books() {
        let empty = BookRegistry::new(&["BTCUSD".to_string()]);
        assert!(report_once(&empty, 5, "BITFINEX", 0).is_empty());

        let snapshots = report_once(&registry(), 5, "BITFINEX", 5_000);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].symbol, "BTCUSD");
        assert_eq!(snapshots[0].timestamp, 1_000);
        assert_eq!(snapshots[0].levels.bids_vwap, dec!(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_publishes_each_period_until_shutdown() {
        let mut sink = MockEventSink::new();
        sink.expect_publish_snapshot()
            .withf(|s| s.symbol == "BTCUSD" && s.topic == "/BITFINEX/BTCUSD/orderbook")
            .times(2)
            .returning(|_| Ok(()));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_snapshot_reporter(
            Arc::new(RwLock::new(registry())),
            Arc::new(sink),
            "BITFINEX".to_string(),
            5,
            Duration::from_secs(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_stop_reporter() {
        let mut sink = MockEventSink::new();
        sink.expect_publish_snapshot().times(2).returning(|_| {
            Err(crate::error::MarketDataError::IpcError("consumer gone".to_string()))
        });

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_snapshot_reporter(
            Arc::new(RwLock::new(registry())),
            Arc::new(sink),
            "BITFINEX".to_string(),
            5,
            Duration::from_secs(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
