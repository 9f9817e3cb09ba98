//! Reconnect Pacing
//!
//! Backoff for the reconnect loops of both upstream feeds. The policy keeps
//! a single attempt counter and derives each delay from it on demand: the
//! initial delay grown exponentially per prior attempt, saturated at the
//! cap, then spread by a multiplicative jitter so a fleet of hubs does not
//! hammer the feed in lockstep after an outage.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Jitter spread applied to every delay (multiplicative, ±10%).
const JITTER_SPREAD: f64 = 0.1;

/// Smallest delay ever produced, so jitter cannot collapse to a busy loop.
const FLOOR: Duration = Duration::from_millis(1);

/// Attempt-counting backoff policy.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    factor: f64,
    jitter: f64,
    limit: u32,
    attempts: u32,
}

impl Backoff {
    /// Build a policy with explicit bounds. A `limit` of zero means
    /// unlimited attempts.
    #[must_use]
    pub const fn new(
        initial: Duration,
        cap: Duration,
        factor: f64,
        jitter: f64,
        limit: u32,
    ) -> Self {
        Self {
            initial,
            cap,
            factor,
            jitter,
            limit,
            attempts: 0,
        }
    }

    /// Build the policy from the hub's WebSocket settings.
    #[must_use]
    pub const fn from_settings(settings: &WebSocketSettings) -> Self {
        Self::new(
            settings.reconnect_delay_initial,
            settings.reconnect_delay_max,
            settings.reconnect_delay_multiplier,
            JITTER_SPREAD,
            settings.max_reconnect_attempts,
        )
    }

    /// Delay to wait before the next attempt, or `None` once the attempt
    /// limit is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.limit != 0 && self.attempts >= self.limit {
            return None;
        }
        self.attempts += 1;
        Some(self.with_jitter(self.nth_delay(self.attempts)))
    }

    /// Forget past failures after a connection survives its handshake.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Un-jittered delay for the n-th attempt: `initial * factor^(n-1)`,
    /// saturating at the cap. Overflowing growth lands on the cap too.
    fn nth_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let grown = self.initial.as_secs_f64() * self.factor.powi(exponent);
        if grown.is_finite() && grown < self.cap.as_secs_f64() {
            Duration::from_secs_f64(grown.max(0.0))
        } else {
            self.cap
        }
    }

    fn with_jitter(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let jittered = Duration::from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0));
        jittered.max(FLOOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady(initial_ms: u64, cap_ms: u64, limit: u32) -> Backoff {
        Backoff::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(cap_ms),
            2.0,
            0.0,
            limit,
        )
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut backoff = steady(100, 10_000, 0);
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn growth_saturates_at_cap() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            4.0,
            0.0,
            0,
        );
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(2000));
    }

    #[test]
    fn limit_exhausts_after_counted_attempts() {
        let mut backoff = steady(100, 1000, 3);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.attempts(), 3);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn zero_limit_never_exhausts() {
        let mut backoff = steady(1, 10, 0);
        for _ in 0..1000 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[test]
    fn reset_starts_the_ladder_over() {
        let mut backoff = steady(100, 10_000, 3);
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_spread() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(
                Duration::from_millis(1000),
                Duration::from_secs(10),
                2.0,
                0.1,
                0,
            );
            let millis = backoff.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of spread");
        }
    }

    #[test]
    fn from_settings_carries_bounds() {
        let settings = WebSocketSettings::default();
        let mut backoff = Backoff::from_settings(&settings);
        // First delay is the configured initial, give or take jitter.
        let first = backoff.next_delay().unwrap();
        let initial = settings.reconnect_delay_initial.as_secs_f64();
        let ratio = first.as_secs_f64() / initial;
        assert!((1.0 - JITTER_SPREAD..=1.0 + JITTER_SPREAD).contains(&ratio));
        assert_eq!(backoff.attempts(), 1);
    }
}
