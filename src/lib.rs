//! # lazy-memo
//!
//! Concurrent deferred values and weakly held memoization.
//!
//! ## Overview
//!
//! - **Deferred cells**: [`DeferredCell`](control::DeferredCell) computes a
//!   value exactly once from a fallible factory, shares the outcome with
//!   every caller, and supports cancellation, reentrancy detection and
//!   interruptible waiting
//! - **Interruption**: [`control::interrupt`] gives each thread a flag that
//!   other threads can raise to abandon blocking waits
//! - **Weak caches**: [`WeakKeyedCache`](cache::WeakKeyedCache) memoizes a
//!   function while letting unreferenced results be reclaimed
//!
//! ## Feature Flags
//!
//! - `control`: Deferred cells and interruption (default)
//! - `cache`: Weakly held caches, implies `control` (default)
//! - `fxhash`: Use `rustc-hash` as the cache's default hasher
//! - `ahash`: Use `ahash` as the cache's default hasher
//! - `full`: Enable all features
//!
//! ## Example
//!
//! ```rust
//! use lazy_memo::prelude::*;
//!
//! let cell = DeferredCell::infallible(|| 6 * 7);
//! assert_eq!(*cell.get().unwrap(), 42);
//!
//! let cache: WeakKeyedCache<u32, u32> = WeakKeyedCache::new();
//! let doubled = cache.get_or_compute(21, |key| key * 2);
//! assert_eq!(*doubled, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use lazy_memo::prelude::*;
/// ```
pub mod prelude {

    #[cfg(feature = "control")]
    pub use crate::control::*;

    #[cfg(feature = "cache")]
    pub use crate::cache::*;
}

#[cfg(feature = "control")]
pub mod control;

#[cfg(feature = "cache")]
pub mod cache;
