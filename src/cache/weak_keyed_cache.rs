//! A concurrent memo that holds its values weakly.
//!
//! [`WeakKeyedCache`] maps keys to values produced by a delegate. The cache
//! itself never keeps a value alive: once every [`CacheRef`] to a value is
//! dropped the entry is dead, and the next operation on the cache sweeps it.
//!
//! # Concurrency
//!
//! Entries are spread over independently locked shards. The delegate always
//! runs with no lock held, so computing one key never blocks lookups or
//! computations of other keys. Concurrent misses on the *same* key are not
//! collapsed: each caller runs the delegate, the first insertion wins the
//! slot, and the others get their own fresh value back without it being
//! stored. Use a [`DeferredCell`](crate::control::DeferredCell) per key when
//! the delegate must run exactly once.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::RwLock;

use super::hasher::{DefaultHashBuilder, shard_index};
use super::reclaim::{CacheRef, ReclaimQueue, WeakHandle};

/// Number of shards used by [`WeakKeyedCache::new`].
pub const DEFAULT_SHARD_COUNT: usize = 16;

type Shard<K, V, S> = RwLock<HashMap<K, WeakHandle<K, V>, S>>;

/// A thread-safe memo whose entries vanish once their values are no longer
/// referenced outside the cache.
///
/// # Type Parameters
///
/// * `K` - The key type
/// * `V` - The cached value type
/// * `S` - The hasher builder (see [`DefaultHashBuilder`])
///
/// # Examples
///
/// ```rust
/// use lazy_memo::cache::WeakKeyedCache;
///
/// let cache: WeakKeyedCache<String, usize> = WeakKeyedCache::new();
///
/// let length = cache.get_or_compute("hello".to_string(), |key| key.len());
/// assert_eq!(*length, 5);
///
/// // Hit: the delegate is not called while `length` is alive
/// let again = cache.get_or_compute("hello".to_string(), |_| unreachable!());
/// assert_eq!(*again, 5);
///
/// // Once every reference is gone the entry is swept and recomputed
/// drop(length);
/// drop(again);
/// let recomputed = cache.get_or_compute("hello".to_string(), |_| 99);
/// assert_eq!(*recomputed, 99);
/// ```
pub struct WeakKeyedCache<K, V, S = DefaultHashBuilder> {
    shards: Box<[Shard<K, V, S>]>,
    hash_builder: S,
    mask: usize,
    reclaimed: Arc<ReclaimQueue<K>>,
}

impl<K, V> WeakKeyedCache<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache with [`DEFAULT_SHARD_COUNT`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    /// Creates an empty cache with at least `shard_count` shards.
    ///
    /// The count is rounded up to a power of two; zero is treated as one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::cache::WeakKeyedCache;
    ///
    /// let cache: WeakKeyedCache<u64, u64> = WeakKeyedCache::with_shards(5);
    /// assert_eq!(cache.shard_count(), 8);
    /// ```
    pub fn with_shards(shard_count: usize) -> Self {
        Self::with_shards_and_hasher(shard_count, DefaultHashBuilder::default())
    }
}

impl<K, V, S> WeakKeyedCache<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Creates an empty cache that hashes keys with `hash_builder`.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_shards_and_hasher(DEFAULT_SHARD_COUNT, hash_builder)
    }

    /// Creates an empty cache with at least `shard_count` shards, hashing
    /// keys with `hash_builder`.
    pub fn with_shards_and_hasher(shard_count: usize, hash_builder: S) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();

        Self {
            shards,
            hash_builder,
            mask: shard_count - 1,
            reclaimed: Arc::new(ReclaimQueue::new()),
        }
    }
}

impl<K, V, S> WeakKeyedCache<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// Returns the value for `key`, computing it with `delegate` on a miss.
    ///
    /// Reclaimed entries are swept first. A key whose previous value has
    /// been dropped counts as a miss.
    ///
    /// If several threads miss on the same key at once, each runs the
    /// delegate; only the first insertion is stored, but every caller
    /// receives the value it computed.
    ///
    /// # Panics
    ///
    /// Propagates a panic from `delegate`; nothing is cached in that case.
    pub fn get_or_compute<D>(&self, key: K, delegate: D) -> CacheRef<K, V>
    where
        D: FnOnce(&K) -> V,
    {
        match self.try_get_or_compute(key, |key| Ok::<V, Infallible>(delegate(key))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for a fallible delegate.
    ///
    /// # Errors
    ///
    /// Returns the delegate's error unchanged. Failures are not cached; the
    /// next call for the same key runs the delegate again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::cache::WeakKeyedCache;
    ///
    /// let cache: WeakKeyedCache<&str, i32> = WeakKeyedCache::new();
    ///
    /// assert!(cache.try_get_or_compute("x", |key| key.parse::<i32>()).is_err());
    /// assert!(cache.is_empty());
    ///
    /// let parsed = cache.try_get_or_compute("12", |key| key.parse::<i32>()).unwrap();
    /// assert_eq!(*parsed, 12);
    /// ```
    pub fn try_get_or_compute<D, E>(&self, key: K, delegate: D) -> Result<CacheRef<K, V>, E>
    where
        D: FnOnce(&K) -> Result<V, E>,
    {
        self.sweep_reclaimed();

        let shard = &self.shards[self.shard_of(&key)];
        if let Some(value) = shard.read().get(&key).and_then(WeakHandle::upgrade) {
            tracing::trace!("WeakKeyedCache: hit");
            return Ok(value);
        }

        tracing::trace!("WeakKeyedCache: miss, running delegate");
        let value = delegate(&key)?;
        let fresh = CacheRef::track(value, key.clone(), Arc::downgrade(&self.reclaimed));

        let mut entries = shard.write();
        match entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    tracing::trace!("WeakKeyedCache: lost insertion race, value not stored");
                } else {
                    occupied.insert(CacheRef::downgrade(&fresh));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheRef::downgrade(&fresh));
            }
        }
        drop(entries);

        Ok(fresh)
    }

    /// Returns the live value for `key` without computing anything.
    pub fn get<Q>(&self, key: &Q) -> Option<CacheRef<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.sweep_reclaimed();
        self.shards[self.shard_of(key)]
            .read()
            .get(key)
            .and_then(WeakHandle::upgrade)
    }

    /// Returns whether `key` has a live value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shards[self.shard_of(key)]
            .read()
            .get(key)
            .is_some_and(WeakHandle::is_live)
    }

    /// Removes the entry for `key`. Outstanding references stay valid.
    ///
    /// Returns `true` if an entry was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shards[self.shard_of(key)].write().remove(key).is_some()
    }

    /// Drops every entry. Outstanding references stay valid.
    pub fn clear(&self) {
        for shard in &*self.shards {
            shard.write().clear();
        }
    }

    /// Returns the number of stored entries.
    ///
    /// Includes entries whose values were reclaimed but not yet swept; call
    /// [`purge`](Self::purge) first for an exact live count.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Removes every dead entry, returning how many were removed.
    ///
    /// Unlike the sweep every operation performs, this probes all shards
    /// rather than only the keys reported through reclamation.
    pub fn purge(&self) -> usize {
        let mut removed = self.sweep_reclaimed();
        for shard in &*self.shards {
            let mut entries = shard.write();
            let before = entries.len();
            entries.retain(|_, handle| handle.is_live());
            removed += before - entries.len();
        }
        tracing::debug!(removed, "WeakKeyedCache: purged dead entries");
        removed
    }

    /// Removes the entries named in the reclamation queue that are still
    /// dead. A key may have been refilled since its old value was dropped.
    fn sweep_reclaimed(&self) -> usize {
        let reclaimed = self.reclaimed.drain();
        if reclaimed.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for key in reclaimed {
            let mut entries = self.shards[self.shard_of(&key)].write();
            if entries.get(&key).is_some_and(|handle| !handle.is_live()) {
                entries.remove(&key);
                removed += 1;
            }
        }
        tracing::trace!(removed, "WeakKeyedCache: swept reclaimed entries");
        removed
    }

    fn shard_of<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        shard_index(&self.hash_builder, key, self.mask)
    }
}

impl<K, V> Default for WeakKeyedCache<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for WeakKeyedCache<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: usize = self.shards.iter().map(|shard| shard.read().len()).sum();
        formatter
            .debug_struct("WeakKeyedCache")
            .field("entries", &entries)
            .field("shards", &self.shards.len())
            .field("pending_reclaimed", &self.reclaimed.pending())
            .finish()
    }
}
