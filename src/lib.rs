//! rtcache - Expiring cache pool for chat bots
//!
//! ## Architecture
//!
//! - `cache` - Cachers with per-key deadlines, swept by one pool task
//! - `config` - Environment configuration
//! - `ratelimit` - Cooldowns and flood tracking built on the pool
//! - `utils` - Utility functions

pub mod cache;
pub mod config;
pub mod ratelimit;
pub mod utils;
