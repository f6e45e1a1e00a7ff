//! Bounded event queue between the feed session and the sink
//!
//! The session never waits on the sink. When the queue is full the configured
//! drop policy decides which event is lost, and every loss is counted.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

use crate::error::MarketDataError;
use crate::orderbook::CanonicalEvent;

/// Which event to lose when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued event to make room
    DropOldest,
    /// Reject the incoming event
    DropNewest,
}

impl FromStr for DropPolicy {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" | "oldest" => Ok(DropPolicy::DropOldest),
            "drop_newest" | "newest" => Ok(DropPolicy::DropNewest),
            other => Err(MarketDataError::ConfigError(format!(
                "Unknown drop policy: {}",
                other
            ))),
        }
    }
}

/// Single-consumer bounded queue of canonical events
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<CanonicalEvent>>,
    capacity: usize,
    policy: DropPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CanonicalEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue events in order, returning how many events were dropped
    pub fn push_all(&self, batch: Vec<CanonicalEvent>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut dropped = 0;
        {
            let mut events = self.lock();
            for event in batch {
                if events.len() >= self.capacity {
                    dropped += 1;
                    match self.policy {
                        DropPolicy::DropOldest => {
                            events.pop_front();
                        }
                        DropPolicy::DropNewest => continue,
                    }
                }
                events.push_back(event);
            }
        }

        if dropped > 0 {
            let total = self.dropped.fetch_add(dropped as u64, Ordering::Relaxed) + dropped as u64;
            warn!(
                dropped,
                total_dropped = total,
                policy = ?self.policy,
                "Event queue full"
            );
        }
        self.notify.notify_one();
        dropped
    }

    /// Wait for queued events and take all of them
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop_batch(&self) -> Option<Vec<CanonicalEvent>> {
        loop {
            {
                let mut events = self.lock();
                if !events.is_empty() {
                    return Some(events.drain(..).collect());
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting waits; queued events are still handed out
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{EventAction, Side};
    use rust_decimal::Decimal;

    fn event(order_id: u64) -> CanonicalEvent {
        CanonicalEvent {
            timestamp: order_id,
            exchange: "BITFINEX".to_string(),
            symbol: "BTCUSD".to_string(),
            action: EventAction::Insert,
            side: Side::Bid,
            order_id,
            size: Decimal::ONE,
            price: Decimal::from(100),
        }
    }

    fn ids(events: &[CanonicalEvent]) -> Vec<u64> {
        events.iter().map(|e| e.order_id).collect()
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_latest() {
        let queue = EventQueue::new(3, DropPolicy::DropOldest);
        assert_eq!(queue.push_all((1..=5).map(event).collect()), 2);
        assert_eq!(queue.dropped(), 2);

        let batch = queue.pop_batch().await.unwrap();
        assert_eq!(ids(&batch), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_earliest() {
        let queue = EventQueue::new(3, DropPolicy::DropNewest);
        queue.push_all((1..=5).map(event).collect());

        let batch = queue.pop_batch().await.unwrap();
        assert_eq!(ids(&batch), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = EventQueue::new(8, DropPolicy::DropOldest);
        queue.push_all(vec![event(1)]);
        queue.close();

        assert_eq!(ids(&queue.pop_batch().await.unwrap()), vec![1]);
        assert!(queue.pop_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push() {
        let queue = std::sync::Arc::new(EventQueue::new(8, DropPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_batch().await })
        };
        tokio::task::yield_now().await;
        queue.push_all(vec![event(7)]);

        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(ids(&batch), vec![7]);
    }

    #[test]
    fn test_drop_policy_from_str() {
        assert_eq!("drop_oldest".parse::<DropPolicy>().unwrap(), DropPolicy::DropOldest);
        assert_eq!("NEWEST".parse::<DropPolicy>().unwrap(), DropPolicy::DropNewest);
        assert!("drop_all".parse::<DropPolicy>().is_err());
    }
}
