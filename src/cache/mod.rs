//! Weakly held memoization.
//!
//! This module provides:
//!
//! - [`WeakKeyedCache`]: A sharded, thread-safe memo whose entries disappear
//!   once nothing outside the cache references their values
//! - [`WeakMemoizer`]: A delegate function bound to its own cache
//! - [`CacheRef`]: The shared reference a cache hands out; holding it keeps
//!   the entry alive
//!
//! # Examples
//!
//! ```rust
//! use lazy_memo::cache::{CacheRef, WeakKeyedCache};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let cache: Arc<WeakKeyedCache<u32, String>> = Arc::new(WeakKeyedCache::new());
//! let held = cache.get_or_compute(1, |key| format!("entry {key}"));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let cache = Arc::clone(&cache);
//!         thread::spawn(move || cache.get_or_compute(1, |_| unreachable!()))
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert!(CacheRef::ptr_eq(&handle.join().unwrap(), &held));
//! }
//! ```

mod hasher;
mod memoizer;
mod reclaim;
mod weak_keyed_cache;

pub use hasher::DefaultHashBuilder;
pub use memoizer::WeakMemoizer;
pub use reclaim::CacheRef;
pub use weak_keyed_cache::{DEFAULT_SHARD_COUNT, WeakKeyedCache};
