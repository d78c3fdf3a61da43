//! Exponential backoff with cap and symmetric jitter

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule
///
/// Delay `n` (0-based) is `base * factor^n`, capped at `cap`, then scaled by a
/// uniform factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    factor: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Create a schedule
    pub fn new(base: Duration, cap: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            cap,
            factor: factor.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Cloud reconnect schedule: 1s base, 30s cap, doubling, ±20% jitter
    pub fn cloud_reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.2)
    }

    /// Un-jittered delay for the given attempt
    pub fn nominal(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt.min(64) as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter == 0.0 {
            return nominal;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread)
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Restart from the base delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 2.0, 0.0);
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(backoff.attempts(), 5);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut backoff = Backoff::cloud_reconnect();
        for attempt in 0..20 {
            let nominal = backoff.nominal(attempt).as_secs_f64();
            let delay = backoff.next_delay().as_secs_f64();
            assert!(delay >= nominal * 0.8 - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= nominal * 1.2 + 1e-9, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn cloud_schedule_caps_at_thirty_seconds() {
        let backoff = Backoff::cloud_reconnect();
        assert_eq!(backoff.nominal(0), Duration::from_secs(1));
        assert_eq!(backoff.nominal(10), Duration::from_secs(30));
    }
}
