//! Cacher and pool configuration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

/// Factory used to create a value for a key read before being set.
pub(crate) type DefaultFactory<V> = Arc<dyn Fn() -> V + Send + Sync>;

/// Callback fired by the sweep for each expired entry.
pub(crate) enum OnDead<K, V> {
    /// Runs on the sweep task itself.
    Inline(Arc<dyn Fn(K, V) -> anyhow::Result<()> + Send + Sync>),
    /// Spawned as an independent task per evicted entry.
    Spawn(Arc<dyn Fn(K, V) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>),
}

/// Configuration for a single cacher.
///
/// Built with a small builder, then handed to
/// [`CacherPool::acquire`](super::CacherPool::acquire):
///
/// ```ignore
/// let afk: Cacher<u64, String> = pool.acquire(
///     "afk_messages",
///     CacherConfig::with_lifetime(Duration::from_secs(600)),
/// );
///
/// let counts: Cacher<u64, u32> = pool.acquire(
///     "message_counts",
///     CacherConfig::new().default_value(),
/// );
/// ```
pub struct CacherConfig<K, V> {
    /// Lifetime applied to entries written without an explicit one.
    /// `None` means such entries never expire.
    pub(crate) lifetime: Option<Duration>,

    /// Creates values for keys read before being set.
    pub(crate) default_factory: Option<DefaultFactory<V>>,

    /// Fired by the sweep right after an expired entry is removed.
    pub(crate) on_dead: Option<OnDead<K, V>>,
}

impl<K, V> Default for CacherConfig<K, V> {
    fn default() -> Self {
        Self {
            lifetime: None,
            default_factory: None,
            on_dead: None,
        }
    }
}

impl<K, V> CacherConfig<K, V> {
    /// Config with no lifetime, no factory and no callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config whose entries expire `lifetime` after being written.
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self::new().lifetime(lifetime)
    }

    /// Set the default lifetime (builder pattern).
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Entries written without an explicit lifetime never expire.
    #[must_use]
    pub fn no_lifetime(mut self) -> Self {
        self.lifetime = None;
        self
    }

    /// Auto-create missing values on read with `factory`.
    #[must_use]
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        self.default_factory = Some(Arc::new(factory));
        self
    }

    /// Auto-create missing values on read with `V::default()`.
    #[must_use]
    pub fn default_value(self) -> Self
    where
        V: Default + 'static,
    {
        self.default_with(V::default)
    }

    /// Call `callback` inline from the sweep for every expired entry.
    ///
    /// Keep it cheap; anything doing I/O belongs in
    /// [`on_dead_spawn`](Self::on_dead_spawn).
    #[must_use]
    pub fn on_dead<F>(mut self, callback: F) -> Self
    where
        F: Fn(K, V) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_dead = Some(OnDead::Inline(Arc::new(callback)));
        self
    }

    /// Spawn `callback` as its own task for every expired entry.
    #[must_use]
    pub fn on_dead_spawn<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_dead = Some(OnDead::Spawn(Arc::new(move |key, value| {
            callback(key, value).boxed()
        })));
        self
    }
}

impl<K, V> fmt::Debug for CacherConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_dead = match &self.on_dead {
            Some(OnDead::Inline(_)) => "inline",
            Some(OnDead::Spawn(_)) => "spawn",
            None => "none",
        };
        f.debug_struct("CacherConfig")
            .field("lifetime", &self.lifetime)
            .field("default_factory", &self.default_factory.is_some())
            .field("on_dead", &on_dead)
            .finish()
    }
}

/// Configuration for the pool's background sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// How often the sweep scans every registered cacher.
    /// Entries may outlive their deadline by up to this much.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Shortest period the sweep timer accepts.
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

    /// Longest period between two sweeps.
    pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Set the sweep interval (builder pattern).
    ///
    /// The interval is clamped between [`MIN_SWEEP_INTERVAL`](Self::MIN_SWEEP_INTERVAL)
    /// and [`MAX_SWEEP_INTERVAL`](Self::MAX_SWEEP_INTERVAL).
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.clamp(Self::MIN_SWEEP_INTERVAL, Self::MAX_SWEEP_INTERVAL);
        self
    }

    /// Period the sweep task actually ticks at.
    pub(crate) fn sweep_period(&self) -> Duration {
        self.sweep_interval.clamp(Self::MIN_SWEEP_INTERVAL, Self::MAX_SWEEP_INTERVAL)
    }
}
