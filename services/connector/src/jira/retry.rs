use std::time::Duration;

/// Doubling delay schedule bounded by a ceiling.
///
/// Yields `min, 2*min, 4*min, ...` and stops once the next delay would
/// exceed `max`. A zero minimum is raised to one millisecond so the
/// schedule always terminates.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            next: min.max(Duration::from_millis(1)),
            max,
        }
    }

    /// Delay before the next retry, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.next > self.max {
            return None;
        }
        let delay = self.next;
        self.next = delay.saturating_mul(2);
        Some(delay)
    }
}
