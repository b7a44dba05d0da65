//! rtcache - message gate driven from stdin.
//!
//! Reads one message per line as `<chat_id> <user_id> <text>` and
//! reports how the rate limiter treats it, while the cacher pool sweeps
//! expired state in the background. Lines whose text starts with `/`
//! are commands and are also subject to the per-user cooldown.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rtcache::cache::CacherPool;
use rtcache::config::Config;
use rtcache::ratelimit::{RateLimiter, Verdict};
use rtcache::utils::format_duration;

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
struct IncomingMessage<'a> {
    chat_id: i64,
    user_id: u64,
    text: &'a str,
}

impl IncomingMessage<'_> {
    fn is_command(&self) -> bool {
        self.text.starts_with('/')
    }
}

fn parse_line(line: &str) -> Option<IncomingMessage<'_>> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let chat_id = parts.next()?.parse().ok()?;
    let user_id = parts.next()?.parse().ok()?;
    let text = parts.next().unwrap_or("").trim();

    Some(IncomingMessage {
        chat_id,
        user_id,
        text,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rtcache=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting rtcache...");

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let pool = Arc::new(CacherPool::new(config.pool.clone()));
    pool.start();

    let limiter = RateLimiter::new(&pool, &config);
    info!("Cachers registered: {:?}", pool.cacher_names());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let Some(msg) = parse_line(&line) else {
                    warn!("Skipping malformed line: {}", line);
                    continue;
                };

                match limiter.check(msg.chat_id, msg.user_id, msg.is_command())? {
                    Verdict::Allowed => info!(
                        "chat {} user {}: allowed {:?}",
                        msg.chat_id, msg.user_id, msg.text
                    ),
                    Verdict::CoolingDown(remaining) => info!(
                        "chat {} user {}: cooling down, retry in {}",
                        msg.chat_id,
                        msg.user_id,
                        format_duration(remaining)
                    ),
                    Verdict::Flooding { warnings } => info!(
                        "chat {} user {}: flooding (warning {})",
                        msg.chat_id, msg.user_id, warnings
                    ),
                }
            }
        }
    }

    pool.close();
    info!("{} cached entries at shutdown", pool.entry_count());

    Ok(())
}
