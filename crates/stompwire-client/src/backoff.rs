//! Reconnect delay scheduling.
//!
//! The delay to wait is [`ReconnectBackoff::current`]. In exponential mode it
//! doubles every time a wait completes, up to `max` (zero means no cap);
//! linear mode keeps it constant.

use std::time::Duration;

use crate::config::ReconnectMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    mode: ReconnectMode,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, mode: ReconnectMode) -> Self {
        Self {
            base,
            max,
            mode,
            current: base,
        }
    }

    /// Delay before the next attempt. Zero means do not reconnect.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record that the current delay has elapsed.
    pub fn advance(&mut self) {
        if self.mode != ReconnectMode::Exponential {
            return;
        }
        let doubled = self.current.saturating_mul(2);
        self.current = if self.max.is_zero() {
            doubled
        } else {
            doubled.min(self.max)
        };
    }

    /// Return to the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Replace parameters and reset to the new base.
    pub fn reconfigure(&mut self, base: Duration, max: Duration, mode: ReconnectMode) {
        *self = Self::new(base, max, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(backoff: &mut ReconnectBackoff, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| {
                let delay = backoff.current().as_millis() as u64;
                backoff.advance();
                delay
            })
            .collect()
    }

    #[test]
    fn exponential_doubles_up_to_cap() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(8000),
            ReconnectMode::Exponential,
        );
        assert_eq!(sequence(&mut backoff, 6), [1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn linear_holds_constant() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(1000),
            Duration::from_millis(8000),
            ReconnectMode::Linear,
        );
        assert_eq!(sequence(&mut backoff, 4), [1000, 1000, 1000, 1000]);
    }

    #[test]
    fn zero_cap_is_uncapped() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(500),
            Duration::ZERO,
            ReconnectMode::Exponential,
        );
        assert_eq!(sequence(&mut backoff, 6), [500, 1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::ZERO,
            ReconnectMode::Exponential,
        );
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(100));

        backoff.reconfigure(Duration::from_millis(50), Duration::ZERO, ReconnectMode::Linear);
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(50));
    }
}
