//! Subscriber Liveness
//!
//! Each session pings its subscriber periodically. Any inbound frame counts
//! as a sign of life; a subscriber silent for longer than the timeout after
//! a ping is closed.

use std::time::{Duration, Instant};

use crate::infrastructure::config::PushSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the subscriber is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, timeout: Duration) -> Self {
        Self { ping_interval, timeout }
    }

    /// Configuration from push-channel settings.
    #[must_use]
    pub const fn from_push_settings(settings: &PushSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the session should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping.
    SendPing,
    /// Close the connection.
    Timeout,
}

/// Per-session liveness state.
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    last_activity: Instant,
    waiting_for_pong: bool,
}

impl HeartbeatState {
    /// Fresh state; the connection counts as active now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Fresh state anchored at `now`.
    #[must_use]
    pub const fn starting_at(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            waiting_for_pong: false,
        }
    }

    /// Record an inbound frame.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.waiting_for_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }

    /// Decide the action for a tick at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatEvent {
        let silent = now.saturating_duration_since(self.last_activity);
        if self.waiting_for_pong && silent > self.config.timeout {
            tracing::debug!(
                silent_secs = silent.as_secs(),
                timeout_secs = self.config.timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            return HeartbeatEvent::Timeout;
        }
        self.waiting_for_pong = true;
        HeartbeatEvent::SendPing
    }
}
