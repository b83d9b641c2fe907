use std::time::Duration;

/// Decides how long the client waits before the next dial attempt.
///
/// The client never gives up: a strategy only controls spacing. `attempt` is
/// the number of consecutive failed dials so far. It is 0 when an open
/// connection was lost and resets after each successful dial.
pub trait ReconnectStrategy: Send + Sync {
    fn next_delay(&self, attempt: usize) -> Duration;
}

/// Always waits the same amount of time between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ReconnectStrategy for FixedDelay {
    fn next_delay(&self, _attempt: usize) -> Duration {
        self.delay
    }
}

/// Doubles the delay on every failed attempt, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }
}

impl ReconnectStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31) as u32).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
