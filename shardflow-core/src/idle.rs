use std::time::Duration;

use rand::Rng;

const FACTOR: f64 = 2.0;
const JITTER: f64 = 0.5;

/// Exponential delay between empty fetch cycles: `base * 2^(n-1)` with ±50% jitter, capped at
/// `max`. Reset as soon as a cycle sees records.
#[derive(Debug, Clone)]
pub(crate) struct IdleBackoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    empty_cycles: u32,
}

impl IdleBackoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: JITTER,
            empty_cycles: 0,
        }
    }

    #[cfg(test)]
    fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    pub(crate) fn reset(&mut self) {
        self.empty_cycles = 0;
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        self.empty_cycles = self.empty_cycles.saturating_add(1);
        // past 2^31 the delay is far beyond any sane cap anyway
        let exponent = (self.empty_cycles - 1).min(31) as i32;
        let mut delay_ms = self.base.as_millis() as f64 * FACTOR.powi(exponent);

        if self.jitter > 0.0 {
            delay_ms *= rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        }

        Duration::from_millis(delay_ms as u64).min(self.max)
    }
}
