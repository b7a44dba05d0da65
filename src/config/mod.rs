//! Configuration module.
//!
//! Loads configuration from environment variables (and `.env`).

use std::env;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::cache::PoolConfig;
use crate::utils::parse_duration;

/// Flood detection limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodConfig {
    /// Messages allowed inside one window before a user counts as flooding.
    pub max_messages: u32,
    /// Sliding window for counting messages.
    pub window: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_messages: 5,
            window: Duration::from_secs(10),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Background sweep settings (`CACHE_SWEEP_INTERVAL`).
    pub pool: PoolConfig,

    /// Per-user command cooldown (`COOLDOWN_DURATION`).
    pub cooldown: Duration,

    /// Flood limits (`FLOOD_MAX_MESSAGES`, `FLOOD_WINDOW`).
    pub flood: FloodConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            cooldown: Duration::from_secs(3),
            flood: FloodConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; invalid values fall back to the
    /// default with a warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let sweep_interval =
            duration_var(&lookup, "CACHE_SWEEP_INTERVAL", defaults.pool.sweep_interval);

        let max_messages = match lookup("FLOOD_MAX_MESSAGES") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(
                    "Invalid FLOOD_MAX_MESSAGES '{}', using {}",
                    raw, defaults.flood.max_messages
                );
                defaults.flood.max_messages
            }),
            None => defaults.flood.max_messages,
        };

        Self {
            pool: PoolConfig::default().sweep_interval(sweep_interval),
            cooldown: duration_var(&lookup, "COOLDOWN_DURATION", defaults.cooldown),
            flood: FloodConfig {
                max_messages,
                window: duration_var(&lookup, "FLOOD_WINDOW", defaults.flood.window),
            },
        }
    }
}

fn duration_var<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    // Durations must fit on the clock, or every deadline built from them overflows.
    match parse_duration(&raw) {
        Some(duration) if Instant::now().checked_add(duration).is_some() => duration,
        _ => {
            warn!("Invalid {} '{}', using {:?}", key, raw, default);
            default
        }
    }
}
