//! Cache module - expiring keyed caches swept by one background task.
//!
//! Every short-lived piece of bot state (AFK messages, DJ roles,
//! cooldowns, counters) lives in a cacher acquired from a shared pool.
//!
//! ## Architecture
//!
//! - `Cache` - One value plus an optional deadline
//! - `Cacher` - Keyed entries of one kind, with a default lifetime,
//!   an optional default-value factory and an optional `on_dead` callback
//! - `CacherPool` - Owns every cacher and periodically evicts expired
//!   entries, firing `on_dead` for each
//!
//! Expiry only happens in the sweep: reads return stale values until the
//! next pass, so entries may outlive their deadline by up to one
//! `sweep_interval`.
//!
//! ## Usage
//!
//! ```ignore
//! let pool = Arc::new(CacherPool::new(PoolConfig::default()));
//! pool.start();
//!
//! let counts: Cacher<u64, u32> = pool.acquire(
//!     "message_counts",
//!     CacherConfig::with_lifetime(Duration::from_secs(60)).default_value(),
//! );
//! *counts.read(&user_id)? += 1;
//! ```

mod cacher;
mod config;
mod entry;
mod error;
mod pool;

pub use cacher::{Cacher, EntryRef, ValueRef};
pub use config::{CacherConfig, PoolConfig};
pub use entry::Cache;
pub use error::{CacheError, Result};
pub use pool::{CacherPool, SweepStats};
