//! Feed session
//!
//! Owns one exchange connection lifecycle at a time: connect, subscribe, stream
//! until the channel fails or goes quiet, then reconnect after a backoff. Books
//! survive reconnects; only the adapter's connection-scoped state is reset.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::{Connector, MessageChannel};
use crate::adapter::{ExchangeAdapter, ParseResult};
use crate::error::{MarketDataError, Result};
use crate::metrics::FeedMetrics;
use crate::orderbook::{BookRegistry, CanonicalEvent};
use crate::publisher::EventQueue;

/// Upper bound on the exponential backoff exponent
const MAX_BACKOFF_EXPONENT: u32 = 6;
/// Liveness is checked this many times per heartbeat timeout
const LIVENESS_CHECKS_PER_TIMEOUT: u32 = 4;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub instruments: Vec<String>,
    pub reconnect_delay: Duration,
    pub max_backoff: Duration,
    pub heartbeat_timeout: Duration,
    pub keepalive_interval: Duration,
    pub unresolved_channel_threshold: u32,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
}

/// Wall-clock microseconds driven by the tokio clock, so timestamps stay monotonic
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    origin: Instant,
    origin_micros: u64,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_micros: Utc::now().timestamp_micros().max(0) as u64,
        }
    }

    fn now_micros(&self) -> u64 {
        self.origin_micros + self.origin.elapsed().as_micros() as u64
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Single-writer control loop for one exchange feed
pub struct FeedSession {
    adapter: Box<dyn ExchangeAdapter>,
    connector: Box<dyn Connector>,
    registry: Arc<RwLock<BookRegistry>>,
    events: Arc<EventQueue>,
    metrics: FeedMetrics,
    config: SessionConfig,
    clock: SessionClock,
    state: watch::Sender<SessionState>,
    reconnect_attempts: u32,
    /// Consecutive diffs on unbound channels
    unresolved: u32,
}

impl FeedSession {
    pub fn new(
        adapter: Box<dyn ExchangeAdapter>,
        connector: Box<dyn Connector>,
        registry: Arc<RwLock<BookRegistry>>,
        events: Arc<EventQueue>,
        metrics: FeedMetrics,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            adapter,
            connector,
            registry,
            events,
            metrics,
            config,
            clock: SessionClock::new(),
            state,
            reconnect_attempts: 0,
            unresolved: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        debug!(exchange = self.adapter.exchange(), state = ?state, "Session state");
        self.state.send_replace(state);
    }

    /// Run until `shutdown` flips to true, reconnecting after every failure
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            exchange = self.adapter.exchange(),
            instruments = ?self.config.instruments,
            "Starting feed session"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = self.connect_and_stream(&mut shutdown).await;
            self.set_state(SessionState::Disconnected);

            match result {
                Ok(()) if *shutdown.borrow() => break,
                Ok(()) => info!("Channel closed by peer"),
                Err(e) => error!(error = %e, "Feed connection failed"),
            }

            self.reconnect_attempts += 1;
            self.metrics.reconnects.inc();
            let delay = self.backoff();
            warn!(
                attempt = self.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after backoff"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        self.set_state(SessionState::Disconnected);
        info!(exchange = self.adapter.exchange(), "Feed session stopped");
    }

    /// Exponential backoff from the configured base, capped
    fn backoff(&self) -> Duration {
        let exponent = self
            .reconnect_attempts
            .saturating_sub(1)
            .min(MAX_BACKOFF_EXPONENT);
        let delay = self.config.reconnect_delay.saturating_mul(2u32.pow(exponent));
        delay.min(self.config.max_backoff)
    }

    async fn connect_and_stream(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        self.set_state(SessionState::Connecting);

        let mut channel = tokio::select! {
            channel = self.connector.connect() => channel?,
            _ = shutdown_requested(shutdown) => return Ok(()),
        };

        let result = self.stream(channel.as_mut(), shutdown).await;
        channel.close().await;
        result
    }

    async fn stream(
        &mut self,
        channel: &mut dyn MessageChannel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        self.adapter
            .reset_session(&self.config.instruments, self.clock.now_micros());
        self.unresolved = 0;

        self.set_state(SessionState::Subscribing);
        for message in self.adapter.build_subscription(&self.config.instruments) {
            channel.send(&message).await?;
        }

        // Acks are handled as ordinary messages once streaming
        self.set_state(SessionState::Streaming);

        let check_period = (self.config.heartbeat_timeout / LIVENESS_CHECKS_PER_TIMEOUT)
            .max(Duration::from_millis(10));
        let mut liveness_check = interval(check_period);
        liveness_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness_check.tick().await;

        let keepalive_message = self.adapter.keepalive();
        let mut keepalive = interval(self.config.keepalive_interval.max(Duration::from_millis(10)));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        let mut streamed = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => {
                    info!("Shutdown requested, closing channel");
                    return Ok(());
                }
                received = channel.receive() => {
                    let Some(raw) = received? else {
                        return Ok(());
                    };
                    self.handle_message(&raw).await?;
                    if !streamed {
                        streamed = true;
                        self.reconnect_attempts = 0;
                    }
                }
                _ = liveness_check.tick() => self.check_liveness()?,
                _ = keepalive.tick(), if keepalive_message.is_some() => {
                    if let Some(ping) = keepalive_message.as_deref() {
                        channel.send(ping).await?;
                        trace!("Sent keepalive");
                    }
                }
            }
        }
    }

    fn check_liveness(&self) -> Result<()> {
        let now = self.clock.now_micros();
        let timeout = self.config.heartbeat_timeout.as_micros() as u64;
        match self.adapter.liveness().stalest(now, timeout) {
            Some((symbol, silent)) => {
                warn!(symbol = %symbol, silent_ms = silent / 1000, "Instrument went quiet");
                Err(MarketDataError::StaleLiveness {
                    symbol: symbol.to_string(),
                    silent_ms: silent / 1000,
                })
            }
            None => Ok(()),
        }
    }

    /// Decode and apply one message
    ///
    /// Only a desynchronized feed is returned as an error; every other failure is
    /// scoped to the message and dropped here.
    async fn handle_message(&mut self, raw: &[u8]) -> Result<()> {
        self.metrics.messages_received.inc();
        let now = self.clock.now_micros();

        let parsed = match self.adapter.parse(raw, now) {
            Ok(parsed) => parsed,
            Err(MarketDataError::UnresolvedChannel(chan_id)) => {
                self.metrics.messages_dropped.inc();
                self.unresolved += 1;
                warn!(
                    chan_id,
                    consecutive = self.unresolved,
                    "Diff on unbound channel, dropping"
                );
                if self.unresolved >= self.config.unresolved_channel_threshold {
                    return Err(MarketDataError::Desynchronized {
                        unresolved: self.unresolved,
                    });
                }
                return Ok(());
            }
            Err(e) => {
                self.metrics.messages_dropped.inc();
                warn!(error = %e, "Dropping undecodable message");
                return Ok(());
            }
        };
        self.unresolved = 0;

        let exchange = self.adapter.exchange();
        match parsed {
            ParseResult::Mutations(mutations) => {
                let events = self
                    .registry
                    .write()
                    .await
                    .apply_batch(&mutations, exchange, now);
                self.forward(events);
            }
            ParseResult::Snapshot { symbols, mutations } => {
                let events = self
                    .registry
                    .write()
                    .await
                    .replace(&symbols, &mutations, exchange, now);
                info!(symbols = ?symbols, rows = mutations.len(), "Applied book snapshot");
                self.forward(events);
            }
            ParseResult::SubscriptionAck { channel_id, symbol } => {
                debug!(symbol = %symbol, channel_id = ?channel_id, "Subscription acknowledged");
            }
            ParseResult::Heartbeat { symbol } => {
                trace!(symbol = ?symbol, "Heartbeat");
            }
            ParseResult::Ignored => {
                trace!("Ignored message");
            }
        }

        Ok(())
    }

    fn forward(&self, events: Vec<CanonicalEvent>) {
        let dropped = self.events.push_all(events);
        if dropped > 0 {
            self.metrics.events_dropped.inc_by(dropped as u64);
        }
    }
}
