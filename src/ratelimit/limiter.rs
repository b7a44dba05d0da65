//! Combined message/command gate used by the event loop.

use std::time::Duration;

use tracing::{debug, info};

use super::{Cooldown, FloodTracker};
use crate::cache::{CacherPool, Result};
use crate::config::{Config, FloodConfig};
use crate::utils::format_duration;

/// Idle chats keep their flood state for this many windows.
const IDLE_WINDOWS: u32 = 6;

/// Outcome of checking one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the message through.
    Allowed,
    /// Command rejected, the user may retry after this long.
    CoolingDown(Duration),
    /// User is flooding the chat.
    Flooding { warnings: u32 },
}

/// Gate for incoming messages: flood checks for everything, plus a
/// per-user cooldown for commands.
#[derive(Clone)]
pub struct RateLimiter {
    commands: Cooldown<u64>,
    flood: FloodTracker,
    flood_config: FloodConfig,
}

impl RateLimiter {
    pub fn new(pool: &CacherPool, config: &Config) -> Self {
        let idle = config.flood.window.saturating_mul(IDLE_WINDOWS);
        Self {
            commands: Cooldown::new(pool, "command_cooldown", config.cooldown),
            flood: FloodTracker::new(pool, idle),
            flood_config: config.flood.clone(),
        }
    }

    /// Check a message from `user_id` in `chat_id`.
    pub fn check(&self, chat_id: i64, user_id: u64, is_command: bool) -> Result<Verdict> {
        let (is_flooding, warnings) = self.flood.record_message(
            chat_id,
            user_id,
            self.flood_config.max_messages,
            self.flood_config.window,
        )?;

        if is_flooding {
            info!(
                "User {} is flooding in chat {} (warning {})",
                user_id, chat_id, warnings
            );
            return Ok(Verdict::Flooding { warnings });
        }

        if is_command && let Err(remaining) = self.commands.try_trigger(user_id) {
            debug!(
                "User {} on cooldown for {}",
                user_id,
                format_duration(remaining)
            );
            return Ok(Verdict::CoolingDown(remaining));
        }

        Ok(Verdict::Allowed)
    }

    /// Forget a user's flood history and command cooldown, e.g. after
    /// a moderator has dealt with them.
    pub fn pardon(&self, chat_id: i64, user_id: u64) {
        self.flood.reset_user(chat_id, user_id);
        self.commands.reset(&user_id);
    }
}
