//! Weak handles and reclamation notifications.
//!
//! A cached value lives in a [`Tracked`] allocation that remembers the key
//! it is filed under. The cache keeps only a [`WeakHandle`] to it; callers
//! hold [`CacheRef`]s. When the last `CacheRef` is dropped, the tracked
//! value deposits its key into the owning cache's [`ReclaimQueue`] so the
//! dead entry can be swept on the next cache operation.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Keys drained from a [`ReclaimQueue`] in one sweep.
pub(crate) type Reclaimed<K> = SmallVec<[K; 8]>;

/// Keys whose values have been reclaimed, awaiting a sweep.
///
/// The mutex is a leaf lock: nothing else is acquired while holding it.
pub(crate) struct ReclaimQueue<K> {
    keys: Mutex<Vec<K>>,
    pending: AtomicUsize,
}

impl<K> ReclaimQueue<K> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
        }
    }

    fn push(&self, key: K) {
        let mut keys = self.keys.lock();
        keys.push(key);
        self.pending.store(keys.len(), Ordering::Release);
    }

    /// Takes every queued key. Cheap when the queue is empty.
    pub(crate) fn drain(&self) -> Reclaimed<K> {
        if self.pending.load(Ordering::Acquire) == 0 {
            return Reclaimed::new();
        }
        let mut keys = self.keys.lock();
        self.pending.store(0, Ordering::Release);
        keys.drain(..).collect()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// A cached value together with the key it is filed under.
pub(crate) struct Tracked<K, V> {
    value: V,
    key: Option<K>,
    queue: Weak<ReclaimQueue<K>>,
}

impl<K, V> Drop for Tracked<K, V> {
    fn drop(&mut self) {
        if let (Some(key), Some(queue)) = (self.key.take(), self.queue.upgrade()) {
            queue.push(key);
        }
    }
}

/// A weak reference to a cached value, as stored in the cache's map.
pub(crate) struct WeakHandle<K, V> {
    referent: Weak<Tracked<K, V>>,
}

impl<K, V> WeakHandle<K, V> {
    /// Returns a strong reference if the value is still alive.
    pub(crate) fn upgrade(&self) -> Option<CacheRef<K, V>> {
        self.referent.upgrade().map(|inner| CacheRef { inner })
    }

    /// Returns whether anything outside the cache still holds the value.
    ///
    /// Never runs the value's destructor, so it is safe to call under a
    /// shard lock.
    pub(crate) fn is_live(&self) -> bool {
        self.referent.strong_count() > 0
    }
}

/// A strong, shared reference to a value held by a
/// [`WeakKeyedCache`](super::WeakKeyedCache).
///
/// The cache entry stays alive as long as any clone of this reference
/// exists. Dereferences to the value.
///
/// # Examples
///
/// ```rust
/// use lazy_memo::cache::{CacheRef, WeakKeyedCache};
///
/// let cache: WeakKeyedCache<u32, String> = WeakKeyedCache::new();
/// let first = cache.get_or_compute(7, |key| key.to_string());
/// let second = cache.get_or_compute(7, |_| unreachable!());
///
/// assert_eq!(&*first, "7");
/// assert!(CacheRef::ptr_eq(&first, &second));
/// ```
pub struct CacheRef<K, V> {
    inner: Arc<Tracked<K, V>>,
}

impl<K, V> CacheRef<K, V> {
    pub(crate) fn track(value: V, key: K, queue: Weak<ReclaimQueue<K>>) -> Self {
        Self {
            inner: Arc::new(Tracked {
                value,
                key: Some(key),
                queue,
            }),
        }
    }

    pub(crate) fn downgrade(this: &Self) -> WeakHandle<K, V> {
        WeakHandle {
            referent: Arc::downgrade(&this.inner),
        }
    }

    /// Returns whether two references point at the same cached value.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Returns the number of live references to the value.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }
}

impl<K, V> Clone for CacheRef<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Deref for CacheRef<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.inner.value
    }
}

impl<K, V> AsRef<V> for CacheRef<K, V> {
    fn as_ref(&self) -> &V {
        &self.inner.value
    }
}

impl<K, V: fmt::Debug> fmt::Debug for CacheRef<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner.value, formatter)
    }
}

impl<K, V: fmt::Display> fmt::Display for CacheRef<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.value, formatter)
    }
}

impl<K, V: PartialEq> PartialEq for CacheRef<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.value == other.inner.value
    }
}

impl<K, V: Eq> Eq for CacheRef<K, V> {}
