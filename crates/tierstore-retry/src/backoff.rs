//! Backoff interval computation.

use std::time::Duration;

/// Exponential backoff with an optional randomization factor.
///
/// The delay before retry `n` (zero-based) is
/// `min(initial * multiplier^n, max_delay)`, scaled by a random factor in
/// `[1 - jitter, 1 + jitter]` when jitter is non-zero.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    /// A fixed interval: multiplier 1, no jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            multiplier: 1.0,
            max_delay: interval,
            jitter: 0.0,
        }
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Randomization factor in `[0, 1)`; 0.2 means ±20%.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    /// Delay before the retry following failed attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter > 0.0 {
            use rand::Rng;
            let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(10), Duration::from_millis(500));
    }

    #[test]
    fn fixed_interval_never_grows() {
        let backoff = ExponentialBackoff::fixed(Duration::from_millis(50));
        assert_eq!(backoff.delay(0), Duration::from_millis(50));
        assert_eq!(backoff.delay(9), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_within_band() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100)).jitter(0.5);
        for attempt in 0..4 {
            let base = 100.0 * 2f64.powi(attempt);
            let delay = backoff.delay(attempt as usize).as_secs_f64() * 1000.0;
            let upper = (base * 1.5).min(30_000.0 * 1.5);
            assert!(delay >= base * 0.5 - f64::EPSILON, "delay {delay} below band");
            assert!(delay <= upper + f64::EPSILON, "delay {delay} above band");
        }
    }
}
