//! Flood tracking.
//!
//! Counts recent messages per user and flags users who send too many
//! inside a sliding window. State lives in a pooled cacher so idle
//! chats are dropped by the sweep.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::{Cacher, CacherConfig, CacherPool, Result};

/// Recent message times and warning count for one user.
#[derive(Debug, Clone, Default)]
struct UserFloodData {
    recent: VecDeque<Instant>,
    warnings: u32,
}

impl UserFloodData {
    /// Count a message sent at `now`, forgetting ones older than `window`.
    ///
    /// Returns whether the user is now over `max_messages`; every such
    /// message adds a warning.
    fn push(&mut self, now: Instant, window: Duration, max_messages: u32) -> bool {
        while self
            .recent
            .front()
            .is_some_and(|&sent| now.duration_since(sent) >= window)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(now);

        let over_limit = self.recent.len() > max_messages as usize;
        if over_limit {
            self.warnings += 1;
        }
        over_limit
    }
}

/// Per-chat tracking: users' windows and the last user who spoke.
#[derive(Debug, Clone, Default)]
pub struct ChatFloodState {
    users: HashMap<u64, UserFloodData>,
    last_user_id: Option<u64>,
}

impl ChatFloodState {
    /// Number of users with tracking data in this chat.
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }

    /// Make `user_id` the current speaker and return their data.
    ///
    /// A change of speaker breaks everyone else's run of messages.
    /// Warnings are kept.
    fn speaker(&mut self, user_id: u64) -> &mut UserFloodData {
        let previous = self.last_user_id.replace(user_id);
        if previous.is_some_and(|previous| previous != user_id) {
            self.users
                .iter_mut()
                .filter(|(other, _)| **other != user_id)
                .for_each(|(_, data)| data.recent.clear());
        }
        self.users.entry(user_id).or_default()
    }
}

/// Flood tracker over a pooled, auto-creating cacher keyed by chat.
#[derive(Clone)]
pub struct FloodTracker {
    chats: Cacher<i64, ChatFloodState>,
    idle_lifetime: Duration,
}

impl FloodTracker {
    /// Chats with no message for `idle_lifetime` are evicted by the sweep.
    pub fn new(pool: &CacherPool, idle_lifetime: Duration) -> Self {
        let chats = pool.acquire(
            "flood_tracker",
            CacherConfig::with_lifetime(idle_lifetime)
                .default_value()
                .on_dead(|chat_id: i64, state: ChatFloodState| {
                    debug!(
                        "Dropping idle flood state for chat {} ({} users)",
                        chat_id,
                        state.tracked_users()
                    );
                    Ok(())
                }),
        );

        Self {
            chats,
            idle_lifetime,
        }
    }

    /// Record a message and report `(is_flooding, warnings)` for its sender.
    ///
    /// Each message also pushes the chat's idle deadline forward.
    pub fn record_message(
        &self,
        chat_id: i64,
        user_id: u64,
        max_messages: u32,
        window: Duration,
    ) -> Result<(bool, u32)> {
        let now = Instant::now();

        let mut entry = self.chats.get_raw(&chat_id)?;
        entry.update_deadline(self.idle_lifetime, Some(now));

        let user = entry.value_mut().value_mut().speaker(user_id);
        let is_flooding = user.push(now, window, max_messages);
        Ok((is_flooding, user.warnings))
    }

    /// Warnings collected by a user in a chat.
    pub fn warnings(&self, chat_id: i64, user_id: u64) -> u32 {
        self.chats
            .get_mut(&chat_id)
            .and_then(|state| state.users.get(&user_id).map(|user| user.warnings))
            .unwrap_or(0)
    }

    /// Forget a user's messages and warnings in one chat.
    pub fn reset_user(&self, chat_id: i64, user_id: u64) {
        if let Some(mut chat_state) = self.chats.get_mut(&chat_id) {
            chat_state.users.remove(&user_id);
        }
    }

    /// Number of chats currently tracked.
    pub fn tracked_chats(&self) -> usize {
        self.chats.len()
    }
}
