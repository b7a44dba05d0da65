//! Rate limiting built on pooled cachers.
//!
//! - `Cooldown` - Per-key cooldowns (command spam, repeated triggers)
//! - `FloodTracker` - Per-chat sliding windows of user messages
//! - `RateLimiter` - Both of the above behind one check per message

mod cooldown;
mod flood;
mod limiter;

pub use cooldown::Cooldown;
pub use flood::{ChatFloodState, FloodTracker};
pub use limiter::{RateLimiter, Verdict};
