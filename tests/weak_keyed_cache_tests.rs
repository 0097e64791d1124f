#![cfg(feature = "cache")]

use lazy_memo::cache::{CacheRef, WeakKeyedCache, WeakMemoizer};
use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[fixture]
fn cache() -> WeakKeyedCache<String, String> {
    WeakKeyedCache::with_shards(4)
}

// =============================================================================
// Memoization While Reachable
// =============================================================================

#[rstest]
fn cache_returns_same_value_while_referenced(cache: WeakKeyedCache<String, String>) {
    let calls = AtomicUsize::new(0);
    let delegate = |key: &String| {
        calls.fetch_add(1, Ordering::SeqCst);
        key.repeat(2)
    };

    let first = cache.get_or_compute("ab".to_string(), delegate);
    let second = cache.get_or_compute("ab".to_string(), delegate);

    assert_eq!(&*first, "abab");
    assert!(CacheRef::ptr_eq(&first, &second));
    assert_eq!(CacheRef::strong_count(&first), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
fn cache_recomputes_after_value_is_dropped(cache: WeakKeyedCache<String, String>) {
    let calls = AtomicUsize::new(0);
    let delegate = |key: &String| {
        calls.fetch_add(1, Ordering::SeqCst);
        key.to_uppercase()
    };

    let first = cache.get_or_compute("key".to_string(), delegate);
    drop(first);
    assert!(!cache.contains_key("key"));

    let second = cache.get_or_compute("key".to_string(), delegate);
    assert_eq!(&*second, "KEY");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.contains_key("key"));
}

#[rstest]
fn cache_instances_are_isolated() {
    let left: WeakKeyedCache<u32, u32> = WeakKeyedCache::new();
    let right: WeakKeyedCache<u32, u32> = WeakKeyedCache::new();

    let from_left = left.get_or_compute(1, |key| key + 100);
    let from_right = right.get_or_compute(1, |key| key + 200);

    assert_eq!(*from_left, 101);
    assert_eq!(*from_right, 201);
    assert!(right.get(&2).is_none());
    drop(from_right);
    assert!(left.get(&1).is_some());
}

#[rstest]
fn cache_keeps_values_alive_only_through_references(cache: WeakKeyedCache<String, String>) {
    let held: Vec<_> = (0..32)
        .map(|index| cache.get_or_compute(format!("k{index}"), |key| key.clone()))
        .collect();
    assert_eq!(cache.len(), 32);

    let survivors: Vec<_> = held.into_iter().step_by(2).collect();
    assert_eq!(cache.purge(), 16);
    assert_eq!(cache.len(), 16);

    for survivor in &survivors {
        let found = cache.get(survivor.as_str()).unwrap();
        assert!(CacheRef::ptr_eq(&found, survivor));
    }

    drop(survivors);
    assert_eq!(cache.purge(), 16);
    assert!(cache.is_empty());
}

// =============================================================================
// Fallible Delegates
// =============================================================================

#[rstest]
fn failing_delegate_leaves_cache_unchanged(cache: WeakKeyedCache<String, String>) {
    let outcome = cache.try_get_or_compute("bad".to_string(), |_| Err::<String, _>("refused"));

    assert_eq!(outcome.err(), Some("refused"));
    assert!(cache.is_empty());
    assert!(cache.get("bad").is_none());
}

#[rstest]
fn failing_delegate_does_not_disturb_live_entry(cache: WeakKeyedCache<String, String>) {
    let live = cache.get_or_compute("key".to_string(), |_| "v1".to_string());
    let hit = cache.try_get_or_compute("key".to_string(), |_| Err::<String, _>("unused"));

    assert!(hit.is_ok_and(|hit| CacheRef::ptr_eq(&hit, &live)));
}

#[rstest]
fn panicking_delegate_caches_nothing() {
    let cache: Arc<WeakKeyedCache<u32, u32>> = Arc::new(WeakKeyedCache::new());
    let worker = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_or_compute(1, |_| panic!("delegate exploded")))
    };

    assert!(worker.join().is_err());
    assert!(cache.is_empty());
    assert_eq!(*cache.get_or_compute(1, |key| key * 3), 3);
}

// =============================================================================
// Concurrency
// =============================================================================

#[rstest]
fn racing_misses_each_return_their_own_value() {
    let cache: Arc<WeakKeyedCache<u32, usize>> = Arc::new(WeakKeyedCache::new());
    let inside_delegate = Arc::new(Barrier::new(2));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let inside_delegate = Arc::clone(&inside_delegate);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache.get_or_compute(9, |_| {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    inside_delegate.wait();
                    call
                })
            })
        })
        .collect();

    let results: Vec<CacheRef<u32, usize>> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(*results[0], *results[1]);

    let stored = cache.get(&9).unwrap();
    assert!(results.iter().any(|result| CacheRef::ptr_eq(result, &stored)));
    assert_eq!(cache.len(), 1);
}

#[rstest]
fn distinct_keys_compute_in_parallel() {
    let cache: Arc<WeakKeyedCache<u32, u32>> = Arc::new(WeakKeyedCache::with_shards(8));
    let barrier = Arc::new(Barrier::new(4));

    // Every delegate waits for all four, so this only finishes if no
    // delegate holds a lock another key needs.
    let handles: Vec<_> = (0..4)
        .map(|key| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let value = cache.get_or_compute(key, |key| {
                    barrier.wait();
                    key * 10
                });
                *value
            })
        })
        .collect();

    let mut values: Vec<u32> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 10, 20, 30]);
}

#[rstest]
fn shared_value_observed_from_many_threads() {
    let cache: Arc<WeakKeyedCache<&'static str, Vec<u8>>> = Arc::new(WeakKeyedCache::new());
    let held = cache.get_or_compute("blob", |_| vec![7; 128]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_or_compute("blob", |_| Vec::new()))
        })
        .collect();

    for handle in handles {
        assert!(CacheRef::ptr_eq(&handle.join().unwrap(), &held));
    }
}

// =============================================================================
// Memoizer
// =============================================================================

#[rstest]
fn memoizer_reuses_and_releases_results() {
    let calls = AtomicUsize::new(0);
    let lengths = WeakMemoizer::new(|key: &String| {
        calls.fetch_add(1, Ordering::SeqCst);
        key.len()
    });

    let first = lengths.get("four".to_string());
    let second = lengths.get("four".to_string());
    assert!(CacheRef::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop((first, second));
    assert_eq!(*lengths.get("four".to_string()), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
