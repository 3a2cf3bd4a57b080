use std::time::Duration;

/// Exponential reconnect delay: `base * multiplier^attempt`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, multiplier: f64) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let backoff_secs = base.as_secs_f64() * multiplier.powi(exponent);
    let capped_secs = backoff_secs.min(max.as_secs_f64());
    Duration::from_secs_f64(capped_secs)
}

/// Stateful backoff generator owned by a connection.
///
/// Every call to [`next_delay`](Self::next_delay) counts one attempt; a
/// successful session calls [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    attempts: u32,
}

impl ExponentialBackoff {
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;

    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: Self::DEFAULT_MULTIPLIER,
            attempts: 0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay for the next attempt; increments the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        let delay = calculate_backoff(self.attempts, self.base, self.max, self.multiplier);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(calculate_backoff(0, base, max, 2.0), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, base, max, 2.0), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, base, max, 2.0), Duration::from_secs(4));
        assert_eq!(calculate_backoff(3, base, max, 2.0), Duration::from_secs(8));
        assert_eq!(calculate_backoff(10, base, max, 2.0), Duration::from_secs(30)); // capped
        assert_eq!(calculate_backoff(u32::MAX, base, max, 2.0), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_increase_until_cap_then_reset() {
        let mut backoff = ExponentialBackoff::default();

        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        let cap = delays.iter().position(|d| *d == Duration::from_secs(30)).unwrap();
        for pair in delays[..=cap].windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(delays[cap..].iter().all(|d| *d == Duration::from_secs(30)));
        assert_eq!(backoff.attempts(), 8);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
