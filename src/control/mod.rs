//! Deferred computation for concurrent programs.
//!
//! This module provides:
//!
//! - [`DeferredCell`]: A thread-safe value computed exactly once by a
//!   fallible factory, with cancellation and reentrancy detection
//! - [`DeferredError`]: The failures a cell can report
//! - [`interrupt`]: Cooperative per-thread interruption, used to abandon
//!   waits on a cell
//!
//! # Examples
//!
//! ## Exactly-once Initialization
//!
//! ```rust
//! use lazy_memo::control::DeferredCell;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::thread;
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let calls_clone = Arc::clone(&calls);
//! let config = Arc::new(DeferredCell::infallible(move || {
//!     calls_clone.fetch_add(1, Ordering::SeqCst);
//!     "loaded".to_string()
//! }));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let config = Arc::clone(&config);
//!         thread::spawn(move || config.get().unwrap().len())
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), 6);
//! }
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Cancellation
//!
//! ```rust
//! use lazy_memo::control::{DeferredCell, DeferredError};
//!
//! let cell = DeferredCell::infallible(|| 42);
//! cell.cancel();
//!
//! assert!(matches!(cell.get(), Err(DeferredError::Cancelled(_))));
//! ```

mod deferred_cell;
mod error;
pub mod interrupt;

pub use deferred_cell::{CellState, DeferredCell};
pub use error::{
    CancellationError, DeferredError, InitializationError, InterruptedError, ReentrancyError,
};
pub use interrupt::InterruptHandle;
