//! A function memoized through a [`WeakKeyedCache`].

use std::fmt;
use std::hash::{BuildHasher, Hash};

use super::hasher::DefaultHashBuilder;
use super::reclaim::CacheRef;
use super::weak_keyed_cache::WeakKeyedCache;

/// Binds a delegate function to its own [`WeakKeyedCache`].
///
/// Each memoizer owns a private cache, so two memoizers never share
/// results even when built from the same delegate.
///
/// # Examples
///
/// ```rust
/// use lazy_memo::cache::WeakMemoizer;
///
/// let squares = WeakMemoizer::new(|n: &u64| n * n);
///
/// let nine = squares.get(3);
/// assert_eq!(*nine, 9);
/// assert_eq!(squares.cache().len(), 1);
/// ```
pub struct WeakMemoizer<K, V, D, S = DefaultHashBuilder> {
    delegate: D,
    cache: WeakKeyedCache<K, V, S>,
}

impl<K, V, D> WeakMemoizer<K, V, D, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
    D: Fn(&K) -> V,
{
    /// Creates a memoizer over `delegate` with an empty default cache.
    pub fn new(delegate: D) -> Self {
        Self::with_cache(delegate, WeakKeyedCache::new())
    }
}

impl<K, V, D, S> WeakMemoizer<K, V, D, S>
where
    K: Eq + Hash + Clone,
    D: Fn(&K) -> V,
    S: BuildHasher,
{
    /// Creates a memoizer that stores results in `cache`.
    pub const fn with_cache(delegate: D, cache: WeakKeyedCache<K, V, S>) -> Self {
        Self { delegate, cache }
    }

    /// Returns the memoized result for `key`, calling the delegate on a miss.
    pub fn get(&self, key: K) -> CacheRef<K, V> {
        self.cache.get_or_compute(key, &self.delegate)
    }

    /// Returns the underlying cache.
    pub const fn cache(&self) -> &WeakKeyedCache<K, V, S> {
        &self.cache
    }
}

impl<K, V, D, S> fmt::Debug for WeakMemoizer<K, V, D, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WeakMemoizer")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[rstest]
    fn test_memoizers_do_not_share_results() {
        let calls = AtomicUsize::new(0);
        let delegate = |key: &u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            key * 10
        };
        let left = WeakMemoizer::new(delegate);
        let right = WeakMemoizer::new(delegate);

        let from_left = left.get(4);
        let from_right = right.get(4);

        assert_eq!(*from_left, 40);
        assert_eq!(*from_right, 40);
        assert!(!CacheRef::ptr_eq(&from_left, &from_right));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn test_live_result_is_reused() {
        let calls = AtomicUsize::new(0);
        let memo = WeakMemoizer::new(|key: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            key.to_uppercase()
        });

        let first = memo.get("abc".to_string());
        let second = memo.get("abc".to_string());

        assert!(CacheRef::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn test_with_cache_uses_given_shards() {
        let memo = WeakMemoizer::with_cache(|key: &u8| *key, WeakKeyedCache::with_shards(2));
        assert_eq!(memo.cache().shard_count(), 2);
        assert!(format!("{memo:?}").starts_with("WeakMemoizer { cache: WeakKeyedCache"));
    }
}
