//! Per-key cooldowns.

use std::hash::Hash;
use std::time::Duration;

use tracing::debug;

use crate::cache::{Cache, Cacher, CacherConfig, CacherPool};

/// Per-key cooldown backed by a pooled cacher.
///
/// A key is cooling down while its entry is alive; the pool's sweep
/// clears finished cooldowns, and entries that are past their deadline
/// but not yet swept already count as finished.
#[derive(Clone)]
pub struct Cooldown<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    active: Cacher<K, ()>,
    duration: Duration,
}

impl<K> Cooldown<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new(pool: &CacherPool, name: &str, duration: Duration) -> Self {
        Self {
            active: pool.acquire(name, CacherConfig::with_lifetime(duration)),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start a cooldown for `key` unless one is running.
    ///
    /// Returns the time left as `Err` while `key` is cooling down. The
    /// check and the restart are atomic, so concurrent callers for the
    /// same key see exactly one success.
    pub fn try_trigger(&self, key: K) -> Result<(), Duration> {
        self.active.set_unless(key, (), time_left)
    }

    /// Time left on `key`'s cooldown, `None` if it may act now.
    pub fn remaining(&self, key: &K) -> Option<Duration> {
        let entry = self.active.get_raw(key).ok()?;
        time_left(&entry)
    }

    /// Cancel `key`'s cooldown. Returns `false` if none was running.
    pub fn reset(&self, key: &K) -> bool {
        let reset = self.active.delete(key).is_ok();
        if reset {
            debug!("Cooldown '{}' reset", self.active.name());
        }
        reset
    }
}

/// Time left on a cooldown entry, `None` once it has run out.
fn time_left(entry: &Cache<()>) -> Option<Duration> {
    match entry.remaining(None) {
        Some(remaining) => Some(remaining).filter(|remaining| !remaining.is_zero()),
        // Too long to put on the clock: never runs out.
        None => Some(Duration::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PoolConfig;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_until_expired() {
        let pool = CacherPool::new(PoolConfig::default());
        let cooldown = Cooldown::new(&pool, "command_cooldown", Duration::from_secs(3));

        assert_eq!(cooldown.try_trigger(1u64), Ok(()));
        assert_eq!(cooldown.try_trigger(1), Err(Duration::from_secs(3)));
        assert_eq!(cooldown.try_trigger(2), Ok(()));

        advance(Duration::from_secs(1)).await;
        assert_eq!(cooldown.remaining(&1), Some(Duration::from_secs(2)));

        // Expired but not yet swept: already free.
        advance(Duration::from_secs(5)).await;
        assert_eq!(cooldown.remaining(&1), None);
        assert_eq!(cooldown.try_trigger(1), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_cooldowns_are_swept() {
        let pool = CacherPool::new(PoolConfig::default());
        let cooldown = Cooldown::new(&pool, "command_cooldown", Duration::from_secs(3));

        cooldown.try_trigger("alice").unwrap();
        cooldown.try_trigger("bob").unwrap();
        assert_eq!(pool.entry_count(), 2);

        advance(Duration::from_secs(4)).await;
        assert_eq!(pool.sweep().evicted, 2);
        assert_eq!(pool.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let pool = CacherPool::new(PoolConfig::default());
        let cooldown = Cooldown::new(&pool, "command_cooldown", Duration::from_secs(60));

        cooldown.try_trigger(5u64).unwrap();
        assert!(cooldown.reset(&5));
        assert!(!cooldown.reset(&5));
        assert_eq!(cooldown.try_trigger(5), Ok(()));
        assert_eq!(cooldown.duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_concurrent_triggers_admit_one() {
        let pool = CacherPool::new(PoolConfig::default());
        let cooldown = Cooldown::new(&pool, "command_cooldown", Duration::from_secs(60));
        let barrier = Barrier::new(8);
        let admitted = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    if cooldown.try_trigger(42u64).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert!(cooldown.remaining(&42).is_some());
    }

    #[test]
    fn test_cooldown_too_long_for_clock_never_ends() {
        let pool = CacherPool::new(PoolConfig::default());
        let cooldown = Cooldown::new(&pool, "banned", Duration::MAX);

        assert_eq!(cooldown.try_trigger("spammer"), Ok(()));
        assert_eq!(cooldown.try_trigger("spammer"), Err(Duration::MAX));
        assert_eq!(pool.sweep().evicted, 0);
    }
}
