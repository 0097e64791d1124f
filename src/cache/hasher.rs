//! Hasher selection for [`WeakKeyedCache`](super::WeakKeyedCache).
//!
//! The `fxhash` feature switches the default to `rustc_hash`'s `FxHasher`,
//! the `ahash` feature to `ahash`; otherwise std's SipHash `RandomState` is
//! used. When both features are enabled `fxhash` wins.

use std::hash::{BuildHasher, Hash};

/// The hasher builder a cache uses when none is given.
#[cfg(feature = "fxhash")]
pub type DefaultHashBuilder = rustc_hash::FxBuildHasher;

/// The hasher builder a cache uses when none is given.
#[cfg(all(feature = "ahash", not(feature = "fxhash")))]
pub type DefaultHashBuilder = ahash::RandomState;

/// The hasher builder a cache uses when none is given.
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type DefaultHashBuilder = std::collections::hash_map::RandomState;

/// Picks the shard for `key`.
///
/// Uses the upper half of the hash; the per-shard maps consume the lower
/// bits, and weak hashers such as Fx mix the high bits best.
#[inline]
pub(crate) fn shard_index<Q, S>(hash_builder: &S, key: &Q, mask: usize) -> usize
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    #[allow(clippy::cast_possible_truncation)]
    let high = (hash_builder.hash_one(key) >> 32) as usize;
    high & mask
}
