use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Restart delay: doubles from `initial` up to `ceiling`, no jitter.
#[derive(Debug)]
pub struct RestartBackoff {
    inner: ExponentialBackoff,
    ceiling: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        let inner = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: ceiling,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self { inner, ceiling }
    }

    /// Delay before the next restart attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.inner.next_backoff().unwrap_or(self.ceiling).min(self.ceiling)
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}
