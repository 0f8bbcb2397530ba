use std::time::Duration;

use rand::Rng;

use crate::config::SupervisorConfig;

/// Exponential restart delay for tunnel sessions.
///
/// Starts at `start`, doubles after every unsuccessful run up to `max`, and
/// goes back to `start` after any run that discovered a URL. Each delay gets
/// a uniform random jitter in `[0, jitter]` on top.
#[derive(Debug, Clone)]
pub struct Backoff {
    start: Duration,
    max: Duration,
    jitter: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(start: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            start,
            max,
            jitter,
            current: start.min(max),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.backoff_start, config.backoff_max, config.backoff_jitter)
    }

    /// Base delay for the next restart (no jitter); advances the sequence.
    pub fn next_base(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    /// Base delay plus jitter; advances the sequence. Saturates at
    /// `Duration::MAX` rather than overflowing.
    pub fn next_delay(&mut self) -> Duration {
        self.next_base().saturating_add(self.sample_jitter())
    }

    pub fn reset(&mut self) {
        self.current = self.start.min(self.max);
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::try_from_secs_f64(rng.gen_range(0.0..=self.jitter.as_secs_f64()))
            .unwrap_or(self.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn doubles_up_to_cap() {
        let mut backoff = Backoff::new(secs(5), secs(60), Duration::ZERO);
        let delays: Vec<_> = (0..7).map(|_| backoff.next_base()).collect();
        assert_eq!(
            delays,
            vec![secs(5), secs(10), secs(20), secs(40), secs(60), secs(60), secs(60)]
        );
    }

    #[test]
    fn reset_returns_to_start() {
        let mut backoff = Backoff::new(secs(5), secs(60), Duration::ZERO);
        for _ in 0..4 {
            backoff.next_base();
        }
        backoff.reset();
        assert_eq!(backoff.next_base(), secs(5));
        assert_eq!(backoff.next_base(), secs(10));
    }

    #[test]
    fn start_above_cap_is_clamped() {
        let mut backoff = Backoff::new(secs(90), secs(60), Duration::ZERO);
        assert_eq!(backoff.next_base(), secs(60));
        backoff.reset();
        assert_eq!(backoff.next_base(), secs(60));
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::MAX / 2 + secs(1), Duration::MAX, Duration::ZERO);
        backoff.next_base();
        assert_eq!(backoff.next_base(), Duration::MAX);
    }

    #[test]
    fn huge_cap_with_jitter_saturates() {
        let mut backoff = Backoff::new(secs(5), Duration::MAX, secs(5));
        for _ in 0..80 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn jitter_is_bounded() {
        let mut backoff = Backoff::new(secs(5), secs(60), secs(5));
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= secs(5), "delay {:?} below base", delay);
            assert!(delay <= secs(10), "delay {:?} above base + jitter", delay);
        }
    }
}
