//! Cacher pool - owns every cacher and the periodic expiry sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::cacher::{CacherInner, Swept};
use super::{Cacher, CacherConfig, PoolConfig};

/// Type-erased view of a cacher, as seen by the sweep.
trait Sweepable: Send + Sync {
    fn name(&self) -> &str;
    fn len(&self) -> usize;
    fn clear(&self);
    fn sweep(&self, now: Instant) -> Swept;
}

impl<K, V> Sweepable for CacherInner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        CacherInner::name(self)
    }

    fn len(&self) -> usize {
        CacherInner::len(self)
    }

    fn clear(&self) {
        CacherInner::clear(self)
    }

    fn sweep(&self, now: Instant) -> Swept {
        CacherInner::sweep(self, now)
    }
}

type Registry = RwLock<HashMap<usize, Arc<dyn Sweepable>>>;

/// Result of one sweep pass over the whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Cachers visited.
    pub cachers: usize,
    /// Entries removed because their deadline had passed.
    pub evicted: usize,
    /// `on_dead` callbacks that returned an error or panicked.
    pub callback_failures: usize,
}

/// Owner of all cachers and of the single background sweep.
///
/// Components receive the pool (usually as `Arc<CacherPool>`) at
/// construction and acquire the cachers they need from it:
///
/// ```ignore
/// let pool = Arc::new(CacherPool::new(PoolConfig::default()));
/// pool.start();
///
/// let dj_roles: Cacher<u64, u64> = pool.acquire(
///     "dj_roles",
///     CacherConfig::with_lifetime(Duration::from_secs(300)),
/// );
/// ```
///
/// Every `sweep_interval` the sweep removes all entries whose deadline
/// has passed, firing each cacher's `on_dead` callback. A failing
/// callback is logged and never stops the pass.
pub struct CacherPool {
    config: PoolConfig,
    cachers: Arc<Registry>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CacherPool {
    /// Create a pool. The sweep does not run until [`start`](Self::start).
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            cachers: Arc::new(RwLock::new(HashMap::new())),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Create and register a new cacher.
    ///
    /// Names are labels for logs and errors; they need not be unique.
    pub fn acquire<K, V>(&self, name: &str, config: CacherConfig<K, V>) -> Cacher<K, V>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        debug!("Acquiring cacher '{}' ({:?})", name, config);

        let cacher = Cacher::new(name, config);
        let sweepable: Arc<dyn Sweepable> = cacher.inner();
        self.cachers.write().insert(cacher.registry_key(), sweepable);

        cacher
    }

    /// Unregister a cacher and clear its entries.
    ///
    /// Returns `false` and does nothing if the cacher is not registered
    /// with this pool (for example, released twice).
    pub fn release<K, V>(&self, cacher: &Cacher<K, V>) -> bool
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let removed = self.cachers.write().remove(&cacher.registry_key());
        match removed {
            Some(sweepable) => {
                sweepable.clear();
                debug!("Released cacher '{}'", sweepable.name());
                true
            }
            None => false,
        }
    }

    /// Start the periodic sweep.
    ///
    /// Returns `false` if it is already running.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let cachers = Arc::clone(&self.cachers);
        let period = self.config.sweep_period();

        *task = Some(tokio::spawn(async move {
            let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let stats = sweep_registry(&cachers, Instant::now());
                if stats.evicted > 0 {
                    debug!(
                        "Sweep evicted {} entries across {} cachers ({} callback failures)",
                        stats.evicted, stats.cachers, stats.callback_failures
                    );
                }
            }
        }));

        info!("Cacher pool sweep started (every {:?})", period);
        true
    }

    /// Stop the periodic sweep. Cacher contents are kept.
    ///
    /// Spawned `on_dead` tasks already in flight run to completion.
    /// Returns `false` if the sweep was not running, including when its
    /// task has already exited.
    pub fn close(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                info!("Cacher pool sweep stopped");
                true
            }
            Some(_) => {
                warn!("Cacher pool sweep had already exited");
                false
            }
            None => false,
        }
    }

    /// Whether the background sweep is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one sweep pass right now.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(Instant::now())
    }

    /// Run one sweep pass as if the current time were `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepStats {
        sweep_registry(&self.cachers, now)
    }

    /// Get the number of registered cachers.
    pub fn len(&self) -> usize {
        self.cachers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cachers.read().is_empty()
    }

    /// Get the names of all registered cachers.
    pub fn cacher_names(&self) -> Vec<String> {
        self.cachers
            .read()
            .values()
            .map(|cacher| cacher.name().to_string())
            .collect()
    }

    /// Total entries held across all cachers.
    pub fn entry_count(&self) -> usize {
        self.cachers.read().values().map(|cacher| cacher.len()).sum()
    }
}

/// One pass over every registered cacher, all judged against `now`.
///
/// The registry lock is released before sweeping, so callbacks may
/// acquire or release cachers.
fn sweep_registry(cachers: &Registry, now: Instant) -> SweepStats {
    let snapshot: Vec<Arc<dyn Sweepable>> = cachers.read().values().cloned().collect();

    let mut stats = SweepStats {
        cachers: snapshot.len(),
        ..Default::default()
    };
    for cacher in snapshot {
        let swept = cacher.sweep(now);
        stats.evicted += swept.evicted;
        stats.callback_failures += swept.callback_failures;
    }
    stats
}

impl Default for CacherPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for CacherPool {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CacherPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacherPool")
            .field("sweep_interval", &self.config.sweep_interval)
            .field("running", &self.is_running())
            .field("cacher_names", &self.cacher_names())
            .finish()
    }
}
