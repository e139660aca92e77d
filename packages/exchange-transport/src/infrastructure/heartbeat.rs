//! Keep-Alive Scheduling
//!
//! Sends an exchange-specific keep-alive frame on a fixed interval and
//! detects links that have gone silent. Independent of the socket's native
//! ping/pong.
//!
//! [`KeepAlive`] is owned by the connection task, which feeds it inbound
//! activity and interval ticks. Times are passed in so the decisions are
//! deterministic.

use std::time::{Duration, Instant};

use tokio::time::{Interval, MissedTickBehavior};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between keep-alive frames.
    pub ping_interval: Duration,
    /// Silence tolerated after a keep-alive before the link is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// What to do on a keep-alive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the keep-alive frame.
    SendPing,
    /// No inbound activity since the last keep-alive within the timeout.
    Timeout,
}

/// Silence tracking for one streaming link.
#[derive(Debug)]
pub struct KeepAlive {
    config: HeartbeatConfig,
    last_activity: Instant,
    awaiting_reply: bool,
}

impl KeepAlive {
    /// Start tracking a link that was established at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            awaiting_reply: false,
        }
    }

    /// Interval whose first tick lands one period from now. Missed ticks
    /// are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the ping interval is zero; strategy resolution rejects it.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        let period = self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Record an inbound frame.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.awaiting_reply = false;
    }

    /// Record that the keep-alive frame went out.
    pub const fn mark_ping_sent(&mut self) {
        self.awaiting_reply = true;
    }

    /// Whether a keep-alive is awaiting any inbound frame.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.awaiting_reply
    }

    /// Decide the action for a tick at `now`.
    ///
    /// A timeout resets the tracker, so a restored link starts fresh.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatEvent {
        let silent = now.saturating_duration_since(self.last_activity);
        if self.awaiting_reply && silent > self.config.pong_timeout {
            tracing::warn!(
                silent_ms = silent.as_millis(),
                timeout_ms = self.config.pong_timeout.as_millis(),
                "Heartbeat timeout detected"
            );
            self.record_activity(now);
            HeartbeatEvent::Timeout
        } else {
            HeartbeatEvent::SendPing
        }
    }
}
