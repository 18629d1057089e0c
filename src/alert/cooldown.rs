use std::time::{Duration, Instant};

/// Minimum spacing between two successful dispatches.
#[derive(Clone, Debug)]
pub struct Cooldown {
    period: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// True when nothing was dispatched yet or the period has fully elapsed.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            None => Duration::ZERO,
            Some(last) => self
                .period
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// Record a dispatch at `now`, returning the mark it replaced.
    pub fn mark(&mut self, now: Instant) -> Option<Instant> {
        self.last.replace(now)
    }

    /// Undo the mark made at `marked`, unless a later one superseded it.
    pub fn revert(&mut self, marked: Instant, previous: Option<Instant>) {
        if self.last == Some(marked) {
            self.last = previous;
        }
    }
}
