//! Connection states and reconnect backoff.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──handshake ok──> Connected
//!      ▲                          │                           │
//!      │                   handshake failed            transport error /
//!      │                          │                      peer close
//!      └──── reconnect timer ◄────┴───────────────────────────┘
//! ```
//!
//! Every drop to `Disconnected` arms exactly one single-shot reconnect timer.
//! Retries continue indefinitely with capped exponential backoff.

use std::time::Duration;

use serde::Serialize;

/// Connection state to the telemetry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    /// No connection; a reconnect timer is pending.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and able to send requests.
    Connected,
}

impl ConnectionState {
    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true while a handshake is in flight.
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Returns a short status label for UI display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
        }
    }
}

/// Capped exponential backoff:
/// `delay(n) = min(max_delay, base_delay * 2^min(n, cap_shift))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Largest exponent applied to the base delay.
    pub cap_shift: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5000),
            cap_shift: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after the `attempt`-th consecutive disconnect
    /// (0-based: the attempt counter *before* it is incremented).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(self.cap_shift).min(31);
        let scaled = self.base_delay.saturating_mul(1u32 << shift);
        scaled.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (0..8)
            .map(|n| policy.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 5000, 5000, 5000]);
    }

    #[test]
    fn test_delay_formula_holds_for_large_attempts() {
        let policy = ReconnectPolicy::default();
        for n in [8, 100, u32::MAX] {
            assert_eq!(policy.delay_for_attempt(n), Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_cap_shift_limits_growth() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            cap_shift: 3,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(80));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(80));
    }

    #[test]
    fn test_connection_state_labels() {
        assert_eq!(ConnectionState::Disconnected.label(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.label(), "Connecting...");
        assert_eq!(ConnectionState::Connected.label(), "Connected");
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
    }
}
