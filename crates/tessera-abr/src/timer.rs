use std::time::Duration;

use web_time::Instant;

/// Deadline-based timer driven by an external clock.
///
/// A timer is either disarmed, armed once, or armed with a period. Firing a
/// periodic timer moves its deadline forward by exactly one period, so a
/// caller that falls behind catches up tick by tick.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Timer {
    deadline: Option<Instant>,
    period: Option<Duration>,
}

impl Timer {
    pub(crate) fn once(at: Instant) -> Self {
        Self {
            deadline: Some(at),
            period: None,
        }
    }

    /// First tick one period after `now`.
    pub(crate) fn periodic(now: Instant, period: Duration) -> Self {
        Self {
            deadline: Some(now + period),
            period: Some(period),
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Move a periodic timer to `at` without changing its period.
    pub(crate) fn fire_at(&mut self, at: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(at);
        }
    }

    /// Consume the current deadline; periodic timers re-arm one period later.
    pub(crate) fn fire(&mut self) {
        self.deadline = match (self.deadline, self.period) {
            (Some(d), Some(p)) => Some(d + p),
            _ => None,
        };
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
        self.period = None;
    }
}
