//! Exponential backoff with jitter (`spec.md` §4.9 "Polling schedule").

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Tracks the un-jittered delay across a retry loop. Each call to
/// [`Backoff::next_delay`] returns a jittered value but advances the
/// internal state by a fresh random multiplier, so jitter never
/// compounds across attempts.
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.base,
        }
    }

    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        let jittered = apply_jitter(self.current, self.config.jitter, rng);
        let multiplier = rng.gen_range(self.config.multiplier_min..=self.config.multiplier_max);
        self.current = min(self.config.cap, self.current.mul_f64(multiplier));
        jittered
    }

    pub fn reset(&mut self) {
        self.current = self.config.base;
    }
}

fn apply_jitter(delay: Duration, jitter: f64, rng: &mut impl Rng) -> Duration {
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

fn min(a: Duration, b: Duration) -> Duration {
    if a < b {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delay_stays_within_jitter_band_of_base_on_first_attempt() {
        let mut backoff = Backoff::new(BackoffConfig::SERVER_POLL);
        let mut rng = StdRng::seed_from_u64(7);
        let delay = backoff.next_delay(&mut rng);
        let base = BackoffConfig::SERVER_POLL.base.as_secs_f64();
        let jitter = BackoffConfig::SERVER_POLL.jitter;
        assert!(delay.as_secs_f64() >= base * (1.0 - jitter) - 0.001);
        assert!(delay.as_secs_f64() <= base * (1.0 + jitter) + 0.001);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig::SERVER_POLL);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let delay = backoff.next_delay(&mut rng);
            let cap = BackoffConfig::SERVER_POLL.cap.as_secs_f64();
            assert!(delay.as_secs_f64() <= cap * (1.0 + BackoffConfig::SERVER_POLL.jitter) + 0.001);
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::new(BackoffConfig::SERVER_POLL);
        let mut rng = StdRng::seed_from_u64(1);
        backoff.next_delay(&mut rng);
        backoff.next_delay(&mut rng);
        backoff.reset();
        assert_eq!(backoff.current, BackoffConfig::SERVER_POLL.base);
    }
}
