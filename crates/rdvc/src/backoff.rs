use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Lowest and highest multiplier applied to each delay.
const JITTER: (f64, f64) = (0.75, 1.25);

/// Exponential reconnect delay with randomized jitter.
///
/// The n-th delay is `initial * factor^n`, capped at `max`, then scaled by a
/// random factor in `[0.75, 1.25]`. Jittered delays never exceed `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and growing by `factor` up to `max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdvc::backoff::Backoff;
    /// use std::time::Duration;
    /// let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0);
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(75));
    /// assert!(delay <= Duration::from_millis(125));
    /// ```
    #[must_use]
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial: initial.min(max),
            max,
            factor: factor.max(1.0),
            attempts: 0,
        }
    }

    /// Builds a backoff from reconnect settings.
    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        )
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Un-jittered delay for the current attempt.
    fn base_delay(&self) -> Duration {
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * self.factor.powi(exponent);
        if scaled.is_finite() && scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        }
    }

    /// Returns the next delay and advances to the following attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempts = self.attempts.saturating_add(1);
        let jitter = rand::thread_rng().gen_range(JITTER.0..=JITTER.1);
        base.mul_f64(jitter).min(self.max)
    }

    /// Starts over from the initial delay, after a connection succeeded.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(delay: Duration, base: Duration) -> bool {
        delay >= base.mul_f64(JITTER.0) && delay <= base.mul_f64(JITTER.1)
    }

    #[test]
    fn first_delay_is_near_initial() {
        let initial = Duration::from_millis(200);
        let mut backoff = Backoff::new(initial, Duration::from_secs(10), 2.0);
        assert!(within_jitter(backoff.next_delay(), initial));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn delays_grow_geometrically() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60), 2.0);
        for n in 0..6u32 {
            let expected = Duration::from_millis(100 * 2u64.pow(n));
            let delay = backoff.next_delay();
            assert!(within_jitter(delay, expected), "attempt {n}: {delay:?}");
        }
    }

    #[test]
    fn delays_never_exceed_max() {
        let max = Duration::from_secs(1);
        let mut backoff = Backoff::new(Duration::from_millis(100), max, 3.0);
        for _ in 0..50 {
            assert!(backoff.next_delay() <= max);
        }
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let initial = Duration::from_millis(100);
        let mut backoff = Backoff::new(initial, Duration::from_secs(30), 2.0);
        for _ in 0..8 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(within_jitter(backoff.next_delay(), initial));
    }

    #[test]
    fn many_attempts_do_not_overflow() {
        let max = Duration::from_secs(30);
        let mut backoff = Backoff::new(Duration::from_millis(100), max, 10.0);
        for _ in 0..10_000 {
            let delay = backoff.next_delay();
            assert!(delay > Duration::ZERO && delay <= max);
        }
    }

    #[test]
    fn factor_below_one_is_treated_as_constant() {
        let initial = Duration::from_millis(100);
        let mut backoff = Backoff::new(initial, Duration::from_secs(5), 0.5);
        for _ in 0..5 {
            assert!(within_jitter(backoff.next_delay(), initial));
        }
    }

    #[test]
    fn built_from_config() {
        let config = ReconnectConfig {
            initial_delay_ms: 50,
            max_delay_ms: 400,
            backoff_factor: 2.0,
        };
        let mut backoff = Backoff::from_config(&config);
        assert!(within_jitter(backoff.next_delay(), Duration::from_millis(50)));
    }
}
