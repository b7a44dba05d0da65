//! A single cached value with an optional deadline.

use std::time::Duration;

use tokio::time::Instant;

/// One stored value plus the instant after which the sweep may evict it.
///
/// An entry without a deadline is permanent: the sweep never treats it
/// as dead, it only goes away through an explicit delete or release.
#[derive(Debug, Clone)]
pub struct Cache<V> {
    value: V,
    deadline: Option<Instant>,
}

impl<V> Cache<V> {
    /// Create an entry with an absolute deadline.
    pub fn new(value: V, deadline: Option<Instant>) -> Self {
        Self { value, deadline }
    }

    /// Create an entry that expires `lifetime` from now.
    ///
    /// A lifetime too long to represent as an instant makes it permanent.
    pub fn expiring_in(value: V, lifetime: Duration) -> Self {
        Self::new(value, Instant::now().checked_add(lifetime))
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Replace the deadline. `None` makes the entry permanent.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Move the deadline to `extend_by` past `now` (or the current time).
    ///
    /// If that instant cannot be represented the entry becomes permanent.
    pub fn update_deadline(&mut self, extend_by: Duration, now: Option<Instant>) {
        let now = now.unwrap_or_else(Instant::now);
        self.deadline = now.checked_add(extend_by);
    }

    /// Whether the deadline has strictly passed at `at` (or now).
    ///
    /// Entries without a deadline are never dead.
    pub fn is_dead(&self, at: Option<Instant>) -> bool {
        match self.deadline {
            Some(deadline) => at.unwrap_or_else(Instant::now) > deadline,
            None => false,
        }
    }

    /// Time left until the deadline, `None` for permanent entries.
    ///
    /// Saturates at zero once the deadline has passed.
    pub fn remaining(&self, at: Option<Instant>) -> Option<Duration> {
        let at = at.unwrap_or_else(Instant::now);
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(at))
    }
}
