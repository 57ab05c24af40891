//! Reconnect delay calculation.
//!
//! Formula: `min(max, initial * 2^attempt)` scaled by a symmetric jitter
//! of `±jitter_factor`, then clamped to `max` again so the cap holds.

use std::time::Duration;

/// Default jitter factor (±20 %).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff with jitter and an unbounded attempt count.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    jitter_factor: f64,
    attempt: u32,
}

impl Backoff {
    /// Creates a policy starting at `initial_ms` and capped at `max_ms`.
    #[must_use]
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms: max_ms.max(initial_ms),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            attempt: 0,
        }
    }

    /// Overrides the jitter factor (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forgets past failures; the next delay starts from `initial_ms`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let ms = self.delay_ms_with_random(self.attempt, rand::random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Delay for `attempt` with `random` drawn from `[0.0, 1.0)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_ms_with_random(&self, attempt: u32, random: f64) -> u64 {
        let exponential = self.initial_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_ms);

        // Maps random [0,1) to [-jitter, +jitter]
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        let with_jitter = (capped as f64 * jitter).round().max(0.0) as u64;
        with_jitter.min(self.max_ms)
    }
}
