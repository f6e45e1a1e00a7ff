//! Per-instrument heartbeat tracking

use std::collections::HashMap;

/// Last time each instrument showed signs of life (microseconds)
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    last_heartbeat: HashMap<String, u64>,
}

impl Liveness {
    pub fn new(instruments: &[String], now: u64) -> Self {
        let mut liveness = Self::default();
        liveness.reset(instruments, now);
        liveness
    }

    /// Restart every instrument's clock at `now`
    pub fn reset(&mut self, instruments: &[String], now: u64) {
        self.last_heartbeat = instruments.iter().map(|s| (s.clone(), now)).collect();
    }

    /// Refresh a tracked instrument; unknown symbols are not tracked
    pub fn touch(&mut self, symbol: &str, now: u64) {
        if let Some(last) = self.last_heartbeat.get_mut(symbol) {
            *last = (*last).max(now);
        }
    }

    pub fn touch_all(&mut self, now: u64) {
        for last in self.last_heartbeat.values_mut() {
            *last = (*last).max(now);
        }
    }

    pub fn last_heartbeat(&self, symbol: &str) -> Option<u64> {
        self.last_heartbeat.get(symbol).copied()
    }

    /// The longest-silent instrument, if it has exceeded `timeout_micros`
    pub fn stalest(&self, now: u64, timeout_micros: u64) -> Option<(&str, u64)> {
        self.last_heartbeat
            .iter()
            .map(|(symbol, last)| (symbol.as_str(), now.saturating_sub(*last)))
            .filter(|(_, silent)| *silent > timeout_micros)
            .max_by_key(|(_, silent)| *silent)
    }
}
