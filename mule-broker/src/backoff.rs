use chrono::Duration;
use rand::Rng;

/// Exponential backoff with full jitter for retry scheduling.
///
/// The window doubles with each recorded failure up to `cap_secs`, and the
/// actual delay is drawn uniformly from `[0, window]` inclusive. Sampling the
/// whole window, not a band around it, is what breaks synchronized retry
/// storms when many jobs fail at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_secs: i64,
    pub cap_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 5,
            cap_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the jitter window after `attempts` failures, in
    /// seconds: `min(base * 2^(attempts - 1), cap)` with attempts clamped
    /// to at least 1.
    pub fn window_secs(&self, attempts: u32) -> i64 {
        let attempts = attempts.max(1);
        let exp = (attempts - 1).min(32);
        self.base_secs
            .saturating_mul(1_i64 << exp)
            .min(self.cap_secs)
    }

    /// Draw a full-jitter delay for the given failure count.
    pub fn delay<R: Rng>(&self, attempts: u32, rng: &mut R) -> Duration {
        Duration::seconds(rng.gen_range(0..=self.window_secs(attempts)))
    }
}
