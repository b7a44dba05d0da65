//! Keyed store of expiring entries.

use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{MappedRefMut, RefMut};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::{DefaultFactory, OnDead};
use super::{Cache, CacheError, CacherConfig, Result};

/// Live mutable reference to an entry, returned by [`Cacher::get_raw`].
pub type EntryRef<'a, K, V> = RefMut<'a, K, Cache<V>>;

/// Live mutable reference to a value, returned by [`Cacher::read`].
pub type ValueRef<'a, K, V> = MappedRefMut<'a, K, Cache<V>, V>;

/// A keyed collection of expiring entries of one logical kind.
///
/// Handles are cheap to clone and share the same entries. They are only
/// created by [`CacherPool::acquire`](super::CacherPool::acquire), which
/// keeps a reference so its sweep can evict expired entries.
///
/// Reads never check deadlines: an expired entry stays visible until
/// the next sweep removes it.
///
/// The references returned by [`read`](Self::read) and
/// [`get_raw`](Self::get_raw) lock part of the map. Drop them before
/// awaiting or before calling any other method on the same cacher.
pub struct Cacher<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Arc<CacherInner<K, V>>,
}

pub(crate) struct CacherInner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    name: Arc<str>,
    entries: DashMap<K, Cache<V>>,
    lifetime: Option<Duration>,
    default_factory: Option<DefaultFactory<V>>,
    on_dead: Option<OnDead<K, V>>,
}

/// What one sweep of one cacher did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Swept {
    pub evicted: usize,
    pub callback_failures: usize,
}

// Handles share entries, so V does not need to be Clone.
impl<K, V> Clone for Cacher<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cacher<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(name: impl Into<Arc<str>>, config: CacherConfig<K, V>) -> Self {
        Self {
            inner: Arc::new(CacherInner {
                name: name.into(),
                entries: DashMap::new(),
                lifetime: config.lifetime,
                default_factory: config.default_factory,
                on_dead: config.on_dead,
            }),
        }
    }

    /// Identity of the shared entries, used as the pool's registry key.
    pub(crate) fn registry_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn inner(&self) -> Arc<CacherInner<K, V>> {
        Arc::clone(&self.inner)
    }

    /// Name given at acquire time.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Lifetime applied to entries written without an explicit one.
    pub fn default_lifetime(&self) -> Option<Duration> {
        self.inner.lifetime
    }

    /// Insert or overwrite `key` using the default lifetime.
    ///
    /// Overwriting never fires the `on_dead` callback.
    pub fn set(&self, key: K, value: V) {
        let deadline = self.inner.deadline_after(None);
        self.inner.entries.insert(key, Cache::new(value, deadline));
    }

    /// Insert or overwrite `key`, expiring `lifetime` from now.
    pub fn set_with_lifetime(&self, key: K, value: V, lifetime: Duration) {
        let deadline = self.inner.deadline_after(Some(lifetime));
        self.inner.entries.insert(key, Cache::new(value, deadline));
    }

    /// Insert or overwrite `key` unless its current entry is kept.
    ///
    /// `keep` inspects the existing entry while its shard is locked, so
    /// the check and the write happen as one step. When it returns
    /// `Some`, nothing is written and that value comes back as `Err`.
    pub fn set_unless<T, F>(&self, key: K, value: V, keep: F) -> std::result::Result<(), T>
    where
        F: FnOnce(&Cache<V>) -> Option<T>,
    {
        let fresh = Cache::new(value, self.inner.deadline_after(None));
        match self.inner.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if let Some(kept) = keep(entry.get()) {
                    return Err(kept);
                }
                entry.insert(fresh);
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }
        Ok(())
    }

    /// Get a clone of the stored value without running the factory.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.value().value().clone())
    }

    /// Get a clone of the stored value, or `default` if absent.
    pub fn get_or(&self, key: &K, default: V) -> V
    where
        V: Clone,
    {
        self.get(key).unwrap_or(default)
    }

    /// Get a live reference to an existing value. Never auto-creates.
    pub fn get_mut(&self, key: &K) -> Option<ValueRef<'_, K, V>> {
        self.inner
            .entries
            .get_mut(key)
            .map(|entry| entry.map(|entry| entry.value_mut()))
    }

    /// Get a live reference to the stored value.
    ///
    /// A missing key is created from the default factory when one is
    /// configured, so in-place updates work on first use:
    ///
    /// ```ignore
    /// *counts.read(&user_id)? += 1;
    /// ```
    ///
    /// Without a factory a missing key is [`CacheError::KeyNotFound`].
    pub fn read(&self, key: &K) -> Result<ValueRef<'_, K, V>> {
        Ok(self.get_raw(key)?.map(|entry| entry.value_mut()))
    }

    /// Get a live reference to the entry itself, for deadline access.
    ///
    /// Auto-creates missing keys exactly like [`read`](Self::read).
    pub fn get_raw(&self, key: &K) -> Result<EntryRef<'_, K, V>> {
        if let Some(entry) = self.inner.entries.get_mut(key) {
            return Ok(entry);
        }

        let Some(factory) = &self.inner.default_factory else {
            return Err(self.not_found());
        };

        let deadline = self.inner.deadline_after(None);
        Ok(self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| Cache::new(factory(), deadline)))
    }

    /// Check if a key exists. Never auto-creates.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Remove a key immediately, returning its value.
    ///
    /// The `on_dead` callback is not fired.
    pub fn delete(&self, key: &K) -> Result<V> {
        self.inner
            .entries
            .remove(key)
            .map(|(_, entry)| entry.into_value())
            .ok_or_else(|| self.not_found())
    }

    /// Snapshot of the current keys, including expired but unswept ones.
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of the current values.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.value().value().clone())
            .collect()
    }

    /// Snapshot of the current key/value pairs.
    pub fn items(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.inner
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value().clone()))
            .collect()
    }

    /// Number of entries, including expired but unswept ones.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Remove all entries without firing callbacks.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    fn not_found(&self) -> CacheError {
        CacheError::KeyNotFound {
            cacher: self.inner.name.to_string(),
        }
    }
}

impl<K, V> CacherInner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    /// Deadline for an entry written now. Lifetimes that overflow the
    /// clock leave the entry permanent.
    fn deadline_after(&self, lifetime: Option<Duration>) -> Option<Instant> {
        lifetime
            .or(self.lifetime)
            .and_then(|lifetime| Instant::now().checked_add(lifetime))
    }

    /// Evict every entry that is dead at `now`.
    ///
    /// Dead keys are collected first and removed one by one, so callbacks
    /// run without any map lock held. An entry rewritten between the scan
    /// and its removal is re-checked and kept if it is alive again.
    pub(crate) fn sweep(&self, now: Instant) -> Swept {
        let dead: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_dead(Some(now)))
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = Swept::default();
        for key in dead {
            let Some((key, entry)) = self
                .entries
                .remove_if(&key, |_, entry| entry.is_dead(Some(now)))
            else {
                continue;
            };

            swept.evicted += 1;
            if !self.fire_on_dead(key, entry.into_value()) {
                swept.callback_failures += 1;
            }
        }

        if swept.evicted > 0 {
            debug!("Cacher '{}': evicted {} entries", self.name, swept.evicted);
        }
        swept
    }

    /// Fire the `on_dead` callback, returning `false` if it failed.
    fn fire_on_dead(&self, key: K, value: V) -> bool {
        let Some(on_dead) = &self.on_dead else {
            return true;
        };

        match on_dead {
            OnDead::Inline(callback) => {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(key, value))) {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!("on_dead callback for cacher '{}' failed: {:#}", self.name, e);
                        false
                    }
                    Err(_) => {
                        warn!("on_dead callback for cacher '{}' panicked", self.name);
                        false
                    }
                }
            }
            OnDead::Spawn(callback) => {
                let Ok(handle) = Handle::try_current() else {
                    warn!(
                        "No Tokio runtime to spawn on_dead callback for cacher '{}'",
                        self.name
                    );
                    return false;
                };

                let future = match panic::catch_unwind(AssertUnwindSafe(|| callback(key, value))) {
                    Ok(future) => future,
                    Err(_) => {
                        warn!("on_dead callback for cacher '{}' panicked", self.name);
                        return false;
                    }
                };

                let name = Arc::clone(&self.name);
                handle.spawn(async move {
                    if let Err(e) = future.await {
                        warn!("on_dead task for cacher '{}' failed: {:#}", name, e);
                    }
                });
                true
            }
        }
    }
}

impl<K, V> fmt::Debug for Cacher<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacher")
            .field("name", &self.inner.name)
            .field("entry_count", &self.inner.entries.len())
            .field("lifetime", &self.inner.lifetime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn cacher<V>(config: CacherConfig<&'static str, V>) -> Cacher<&'static str, V>
    where
        V: Send + Sync + 'static,
    {
        Cacher::new("test", config)
    }

    #[test]
    fn test_set_get_overwrite() {
        let cache = cacher(CacherConfig::new());

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get_or(&"a", 7), 7);
        assert!(!cache.contains(&"a"));

        cache.set("a", 1);
        cache.set("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_read_without_factory_is_not_found() {
        let cache: Cacher<&str, u32> = cacher(CacherConfig::new());

        let err = cache.read(&"missing").unwrap_err();
        assert_eq!(
            err,
            CacheError::KeyNotFound {
                cacher: "test".to_string()
            }
        );
        assert!(cache.get_raw(&"missing").is_err());
        assert!(!cache.contains(&"missing"));
    }

    #[test]
    fn test_read_auto_creates_with_factory() {
        let cache: Cacher<&str, Vec<u32>> = cacher(CacherConfig::new().default_with(Vec::new));

        assert_eq!(*cache.read(&"x").unwrap(), Vec::<u32>::new());
        assert!(cache.contains(&"x"));
    }

    #[test]
    fn test_read_returns_live_reference() {
        let counts: Cacher<&str, u32> = cacher(CacherConfig::new().default_value());

        *counts.read(&"user").unwrap() += 1;
        *counts.read(&"user").unwrap() += 1;
        assert_eq!(counts.get(&"user"), Some(2));

        let lists: Cacher<&str, Vec<&str>> = cacher(CacherConfig::new().default_value());
        lists.read(&"queue").unwrap().push("song");
        assert_eq!(lists.get(&"queue"), Some(vec!["song"]));
    }

    #[test]
    fn test_get_does_not_run_factory() {
        let cache: Cacher<&str, u32> = cacher(CacherConfig::new().default_with(|| 42));

        assert_eq!(cache.get(&"x"), None);
        assert!(cache.get_mut(&"x").is_none());
        assert!(!cache.contains(&"x"));

        cache.set("x", 1);
        *cache.get_mut(&"x").unwrap() += 1;
        assert_eq!(cache.get(&"x"), Some(2));
    }

    #[test]
    fn test_delete() {
        let cache = cacher(CacherConfig::new());
        cache.set("k", "v");

        assert_eq!(cache.delete(&"k"), Ok("v"));
        assert!(!cache.contains(&"k"));
        assert!(matches!(
            cache.delete(&"missing"),
            Err(CacheError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshots() {
        let cache = cacher(CacherConfig::new());
        cache.set("a", 1);
        cache.set("b", 2);

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let mut values = cache.values();
        values.sort();
        assert_eq!(values, vec![1, 2]);

        let mut items = cache.items();
        items.sort();
        assert_eq!(items, vec![("a", 1), ("b", 2)]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.items().is_empty());
    }

    #[test]
    fn test_deadlines_follow_lifetime_rules() {
        let permanent = cacher(CacherConfig::new());
        permanent.set("k", 1);
        assert_eq!(permanent.get_raw(&"k").unwrap().deadline(), None);

        let timed = cacher(CacherConfig::with_lifetime(Duration::from_secs(60)));
        let before = Instant::now();
        timed.set("default", 1);
        timed.set_with_lifetime("explicit", 2, Duration::from_secs(5));

        let default_deadline = timed.get_raw(&"default").unwrap().deadline().unwrap();
        let explicit_deadline = timed.get_raw(&"explicit").unwrap().deadline().unwrap();
        assert!(default_deadline >= before + Duration::from_secs(60));
        assert!(explicit_deadline < before + Duration::from_secs(60));
    }

    #[test]
    fn test_overflowing_lifetime_never_expires() {
        let cache = cacher(CacherConfig::with_lifetime(Duration::MAX));
        cache.set("default", 1);
        cache.set_with_lifetime("explicit", 2, Duration::MAX);

        assert_eq!(cache.get_raw(&"default").unwrap().deadline(), None);
        assert_eq!(cache.get_raw(&"explicit").unwrap().deadline(), None);

        let swept = cache.inner().sweep(Instant::now() + Duration::from_secs(3600));
        assert_eq!(swept.evicted, 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_set_unless() {
        let cache = cacher(CacherConfig::new());

        assert_eq!(cache.set_unless("k", 1, |_| Some("busy")), Ok(()));
        assert_eq!(cache.set_unless("k", 2, |entry| Some(*entry.value())), Err(1));
        assert_eq!(cache.get(&"k"), Some(1));

        assert_eq!(cache.set_unless("k", 3, |_| None::<u32>), Ok(()));
        assert_eq!(cache.get(&"k"), Some(3));
    }

    #[test]
    fn test_sweep_keeps_live_and_permanent_entries() {
        let cache = cacher(CacherConfig::new());
        cache.set("permanent", 1);
        cache.set_with_lifetime("short", 2, Duration::from_secs(1));
        cache.set_with_lifetime("long", 3, Duration::from_secs(100));

        let swept = cache.inner().sweep(Instant::now() + Duration::from_secs(10));

        assert_eq!(swept.evicted, 1);
        assert!(cache.contains(&"permanent"));
        assert!(cache.contains(&"long"));
        assert!(!cache.contains(&"short"));
    }

    #[test]
    fn test_sweep_counts_failing_inline_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let config: CacherConfig<&'static str, u32> = CacherConfig::new();
        let cache = cacher(config.on_dead(move |key, value| {
            log.lock().unwrap().push((key, value));
            if key == "bad" {
                anyhow::bail!("callback refused {}", key);
            }
            Ok(())
        }));
        cache.set_with_lifetime("good", 1, Duration::from_secs(1));
        cache.set_with_lifetime("bad", 2, Duration::from_secs(1));

        let swept = cache.inner().sweep(Instant::now() + Duration::from_secs(2));

        assert_eq!(
            swept,
            Swept {
                evicted: 2,
                callback_failures: 1
            }
        );
        assert!(cache.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_sweep_survives_panicking_callback() {
        let cache: Cacher<&str, u32> =
            cacher(CacherConfig::new().on_dead(|_, _| panic!("boom")));
        cache.set_with_lifetime("a", 1, Duration::from_secs(1));

        let swept = cache.inner().sweep(Instant::now() + Duration::from_secs(2));

        assert_eq!(swept.evicted, 1);
        assert_eq!(swept.callback_failures, 1);
        assert!(!cache.contains(&"a"));
    }
}
