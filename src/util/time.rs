//! Time utilities for game simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Simulation step in seconds for a tick rate
pub fn tick_delta(tick_rate: u32) -> f64 {
    1.0 / f64::from(tick_rate.max(1))
}

/// Wall-clock period of one tick
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_secs_f64(tick_delta(tick_rate))
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_delta_matches_rate() {
        assert_eq!(tick_delta(60), 1.0 / 60.0);
        assert_eq!(tick_delta(0), 1.0);
        assert_eq!(tick_duration(20), Duration::from_millis(50));
    }
}
