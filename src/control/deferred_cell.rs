//! Thread-safe, exactly-once, cancellable deferred values.
//!
//! This module provides [`DeferredCell<T, E, F>`], a single-slot container
//! that runs a fallible factory the first time it is observed and then
//! hands the same outcome to every caller, on every thread.
//!
//! # State Machine
//!
//! ```text
//!                 get()                 Ok(value)
//!  Unstarted ──────────────► InProgress ──────────► Done
//!      │                        │  │
//!      │ cancel()      cancel() │  │ Err / panic / re-entry
//!      ▼                        ▼  ▼
//!  Cancelled ◄──────────────────┘  Failed
//! ```
//!
//! Transitions happen under one mutex; the transition into a terminal state
//! and the wake-up of every waiter happen in the same critical section.
//!
//! # Waiting
//!
//! A caller that finds another thread computing blocks on a condition
//! variable until the outcome is published. [`DeferredCell::get`] keeps
//! waiting through interruptions (see [`interrupt`](super::interrupt)) and
//! leaves the interrupt flag raised for the caller to observe;
//! [`DeferredCell::get_interruptible`] gives up with
//! [`InterruptedError`] instead.
//!
//! # Examples
//!
//! ```rust
//! use lazy_memo::control::DeferredCell;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let cell = Arc::new(DeferredCell::infallible(|| {
//!     println!("Computing...");
//!     42
//! }));
//!
//! let handles: Vec<_> = (0..10)
//!     .map(|_| {
//!         let cell = Arc::clone(&cell);
//!         thread::spawn(move || *cell.get().unwrap())
//!     })
//!     .collect();
//!
//! // "Computing..." is printed once
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), 42);
//! }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use static_assertions::{assert_impl_all, assert_not_impl_any};

use super::error::{
    CancellationError, DeferredError, InitializationError, InterruptedError, ReentrancyError,
};
use super::interrupt::{self, Unblock};

/// The lifecycle phase of a [`DeferredCell`].
///
/// Phases only move forward; `Done`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellState {
    /// Nobody has asked for the value yet.
    Unstarted,
    /// A thread is running the factory.
    InProgress,
    /// The value is available.
    Done,
    /// The cell was cancelled before producing a value.
    Cancelled,
    /// The factory failed, panicked or re-entered the cell.
    Failed,
}

impl CellState {
    /// Returns `true` for `Done`, `Cancelled` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    phase: CellState,
    owner: Option<ThreadId>,
    reentered: bool,
}

/// The mutex-guarded status and the condition variable waiters sleep on.
///
/// Kept free of the cell's type parameters so a blocked thread can publish
/// it to its interrupter.
struct Gate {
    status: Mutex<Status>,
    settled: Condvar,
}

impl Gate {
    fn new(phase: CellState) -> Self {
        Self {
            status: Mutex::new(Status {
                phase,
                owner: None,
                reentered: false,
            }),
            settled: Condvar::new(),
        }
    }
}

impl Unblock for Gate {
    fn unblock(&self) {
        let _status = self.status.lock();
        self.settled.notify_all();
    }
}

enum Failure<E> {
    Factory(Arc<E>),
    Reentrant,
    Poisoned,
}

impl<E> Failure<E> {
    fn to_error(&self) -> DeferredError<E> {
        match self {
            Self::Factory(cause) => InitializationError::new(Arc::clone(cause)).into(),
            Self::Reentrant => ReentrancyError.into(),
            Self::Poisoned => DeferredError::Poisoned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Uninterruptible,
    Interruptible,
}

/// A thread-safe value computed at most once by a fallible factory.
///
/// The first caller of [`get`](Self::get) (or
/// [`get_interruptible`](Self::get_interruptible)) runs the factory; callers
/// arriving meanwhile block until it finishes. Every caller then sees the
/// same value (the same reference) or the same failure. Failures are never
/// retried: build a new cell to try again.
///
/// # Type Parameters
///
/// * `T` - The type of the computed value
/// * `E` - The factory's error type (defaults to [`Infallible`])
/// * `F` - The type of the factory (defaults to `fn() -> Result<T, E>`)
///
/// # Thread Safety
///
/// `DeferredCell` is `Send + Sync` when `T: Send + Sync`, `E: Send + Sync`
/// and `F: Send`. Once the value is published, reads take no lock.
///
/// # Examples
///
/// ```rust
/// use lazy_memo::control::{DeferredCell, DeferredError};
///
/// let cell = DeferredCell::new(|| "42".parse::<i32>());
/// assert_eq!(cell.get().ok(), Some(&42));
///
/// let broken = DeferredCell::new(|| "forty-two".parse::<i32>());
/// assert!(matches!(broken.get(), Err(DeferredError::Initialization(_))));
/// ```
pub struct DeferredCell<T, E = Infallible, F = fn() -> Result<T, E>> {
    gate: Arc<Gate>,
    factory: Mutex<Option<F>>,
    value: OnceLock<T>,
    failure: OnceLock<Failure<E>>,
}

assert_impl_all!(DeferredCell<String, std::io::Error>: Send, Sync);
assert_not_impl_any!(DeferredCell<std::rc::Rc<i32>>: Send, Sync);

impl<T, E, F: FnOnce() -> Result<T, E>> DeferredCell<T, E, F> {
    /// Creates a cell that will run `factory` on first access.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::new(|| {
    ///     println!("Initializing...");
    ///     Ok::<_, std::io::Error>(42)
    /// });
    /// // Nothing printed yet
    /// assert!(!cell.is_initialized());
    /// ```
    pub fn new(factory: F) -> Self {
        Self {
            gate: Arc::new(Gate::new(CellState::Unstarted)),
            factory: Mutex::new(Some(factory)),
            value: OnceLock::new(),
            failure: OnceLock::new(),
        }
    }

    /// Returns the value, computing it on this thread if nobody has yet.
    ///
    /// Blocks while another thread is computing. Interruptions received while
    /// blocked do not end the wait; the thread's interrupt flag stays raised
    /// so the caller can react to it afterwards.
    ///
    /// # Errors
    ///
    /// - [`DeferredError::Initialization`] if the factory returned an error
    /// - [`DeferredError::Reentrant`] if called from inside this cell's own
    ///   factory, or if the factory did so earlier
    /// - [`DeferredError::Cancelled`] if the cell was cancelled
    /// - [`DeferredError::Poisoned`] if the factory panicked
    ///
    /// # Panics
    ///
    /// Resumes the factory's panic on the thread that ran it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| vec![1, 2, 3]);
    /// let first = cell.get().unwrap();
    /// let second = cell.get().unwrap();
    /// assert!(std::ptr::eq(first, second));
    /// ```
    pub fn get(&self) -> Result<&T, DeferredError<E>> {
        self.observe(Wait::Uninterruptible)
    }

    /// Like [`get`](Self::get), but gives up if this thread is interrupted
    /// while waiting for another thread's computation.
    ///
    /// The interrupt flag is consumed when the wait is abandoned. The cell is
    /// not affected: the computation carries on and later callers still see
    /// its outcome. Outcomes that are already settled are returned without
    /// looking at the flag.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`DeferredError::Interrupted`].
    ///
    /// # Panics
    ///
    /// Resumes the factory's panic on the thread that ran it.
    pub fn get_interruptible(&self) -> Result<&T, DeferredError<E>> {
        self.observe(Wait::Interruptible)
    }

    fn observe(&self, wait: Wait) -> Result<&T, DeferredError<E>> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }

        let mut status = self.gate.status.lock();
        let phase = status.phase;
        match phase {
            CellState::Unstarted => {
                let current = thread::current().id();
                status.phase = CellState::InProgress;
                status.owner = Some(current);
                let factory = self.factory.lock().take();
                drop(status);

                tracing::debug!(thread = ?current, "DeferredCell: computing value");
                let result = match factory {
                    Some(factory) => catch_unwind(AssertUnwindSafe(factory))
                        .map(|outcome| outcome.map_err(|cause| Failure::Factory(Arc::new(cause)))),
                    None => Ok(Err(Failure::Poisoned)),
                };
                self.settle(result)
            }
            CellState::InProgress if status.owner == Some(thread::current().id()) => {
                status.reentered = true;
                tracing::warn!("DeferredCell: factory re-entered its own cell");
                Err(ReentrancyError.into())
            }
            CellState::InProgress => {
                self.wait_until_settled(&mut status, wait)?;
                self.outcome(status.phase)
            }
            CellState::Done | CellState::Cancelled | CellState::Failed => self.outcome(phase),
        }
    }

    /// Blocks until the status leaves `InProgress`.
    fn wait_until_settled(
        &self,
        status: &mut MutexGuard<'_, Status>,
        wait: Wait,
    ) -> Result<(), InterruptedError> {
        let _blocked = interrupt::block_on(Arc::clone(&self.gate) as Arc<dyn Unblock>);

        while status.phase == CellState::InProgress {
            if wait == Wait::Interruptible && interrupt::take_interrupt() {
                tracing::debug!("DeferredCell: wait abandoned after interrupt");
                return Err(InterruptedError);
            }
            self.gate.settled.wait(status);
        }
        Ok(())
    }

    /// Publishes the factory's outcome and wakes every waiter.
    fn settle(
        &self,
        result: thread::Result<Result<T, Failure<E>>>,
    ) -> Result<&T, DeferredError<E>> {
        let mut status = self.gate.status.lock();
        status.owner = None;
        let reentered = std::mem::take(&mut status.reentered);

        if status.phase == CellState::Cancelled {
            drop(status);
            tracing::debug!("DeferredCell: discarding result computed after cancellation");
            return match result {
                Err(payload) => resume_unwind(payload),
                Ok(_) => Err(CancellationError.into()),
            };
        }

        let mut discarded = None;
        let mut panic_payload = None;
        let failure = match result {
            Ok(outcome) if reentered => {
                discarded = outcome.ok();
                Some(Failure::Reentrant)
            }
            Ok(Ok(value)) => {
                discarded = self.value.set(value).err();
                None
            }
            Ok(Err(failure)) => Some(failure),
            Err(payload) => {
                panic_payload = Some(payload);
                Some(Failure::Poisoned)
            }
        };

        status.phase = match failure {
            None => CellState::Done,
            Some(failure) => {
                let _ = self.failure.set(failure);
                CellState::Failed
            }
        };
        let phase = status.phase;
        self.gate.settled.notify_all();
        drop(status);
        drop(discarded);

        if let Some(payload) = panic_payload {
            tracing::warn!("DeferredCell: factory panicked");
            resume_unwind(payload);
        }
        if phase == CellState::Failed {
            tracing::warn!("DeferredCell: initialization failed");
        } else {
            tracing::debug!("DeferredCell: value published");
        }
        self.outcome(phase)
    }

    fn outcome(&self, phase: CellState) -> Result<&T, DeferredError<E>> {
        match phase {
            CellState::Done => self.value.get().ok_or(DeferredError::Poisoned),
            CellState::Failed => Err(self
                .failure
                .get()
                .map_or(DeferredError::Poisoned, Failure::to_error)),
            CellState::Cancelled => Err(CancellationError.into()),
            CellState::Unstarted | CellState::InProgress => {
                unreachable!("DeferredCell: outcome requested before settling")
            }
        }
    }

    /// Consumes the cell and returns its value.
    ///
    /// Runs the factory in place if nobody has yet.
    ///
    /// # Errors
    ///
    /// Returns the cell's terminal failure, or the factory's error wrapped
    /// in [`DeferredError::Initialization`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| 42);
    /// assert_eq!(cell.into_inner().ok(), Some(42));
    /// ```
    pub fn into_inner(self) -> Result<T, DeferredError<E>> {
        let Self {
            gate,
            factory,
            value,
            failure,
        } = self;
        let phase = gate.status.lock().phase;

        match phase {
            CellState::Done => value.into_inner().ok_or(DeferredError::Poisoned),
            CellState::Failed => Err(failure
                .into_inner()
                .map_or(DeferredError::Poisoned, |failure| failure.to_error())),
            CellState::Cancelled => Err(CancellationError.into()),
            CellState::Unstarted => {
                let factory = factory.into_inner().ok_or(DeferredError::Poisoned)?;
                factory().map_err(|cause| InitializationError::new(Arc::new(cause)).into())
            }
            CellState::InProgress => Err(DeferredError::Poisoned),
        }
    }

    /// Returns a new cell that, when observed, consumes this one and applies
    /// `function` to its value.
    ///
    /// Failures of this cell surface as the new cell's factory error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| 21);
    /// let doubled = cell.map(|value| value * 2);
    /// assert_eq!(doubled.get().ok(), Some(&42));
    /// ```
    pub fn map<U, G>(
        self,
        function: G,
    ) -> DeferredCell<U, DeferredError<E>, impl FnOnce() -> Result<U, DeferredError<E>>>
    where
        G: FnOnce(T) -> U,
    {
        DeferredCell::new(move || self.into_inner().map(function))
    }
}

impl<T> DeferredCell<T, Infallible, fn() -> Result<T, Infallible>> {
    /// Creates a cell from a factory that cannot fail.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| "hello".to_string());
    /// assert_eq!(cell.get().unwrap(), "hello");
    /// ```
    pub fn infallible<G>(
        factory: G,
    ) -> DeferredCell<T, Infallible, impl FnOnce() -> Result<T, Infallible>>
    where
        G: FnOnce() -> T,
    {
        DeferredCell::new(move || Ok(factory()))
    }

    /// Creates a cell that already holds `value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::new_with_value(42);
    /// assert!(cell.is_initialized());
    /// ```
    pub fn new_with_value(value: T) -> Self {
        Self {
            gate: Arc::new(Gate::new(CellState::Done)),
            factory: Mutex::new(None),
            value: OnceLock::from(value),
            failure: OnceLock::new(),
        }
    }

    /// Lifts a value into a settled cell; same as
    /// [`new_with_value`](Self::new_with_value).
    pub fn pure(value: T) -> Self {
        Self::new_with_value(value)
    }
}

impl<T, E, F> DeferredCell<T, E, F> {
    /// Cancels the cell unless it has already settled.
    ///
    /// A factory that is already running is not stopped, but whatever it
    /// returns is dropped. From now on every `get` variant, including the
    /// one running the factory, returns [`DeferredError::Cancelled`].
    ///
    /// Returns `true` if this call cancelled the cell.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| 42);
    /// assert!(cell.cancel());
    /// assert!(!cell.cancel());
    /// assert!(cell.get().is_err());
    /// ```
    pub fn cancel(&self) -> bool {
        let mut status = self.gate.status.lock();
        let unused_factory = match status.phase {
            CellState::Unstarted => self.factory.lock().take(),
            CellState::InProgress => None,
            CellState::Done | CellState::Cancelled | CellState::Failed => return false,
        };
        let was_running = status.phase == CellState::InProgress;
        status.phase = CellState::Cancelled;
        status.owner = None;
        self.gate.settled.notify_all();
        drop(status);
        drop(unused_factory);

        tracing::debug!(was_running, "DeferredCell: cancelled");
        true
    }

    /// Returns whether the value has been computed. Never blocks on the
    /// computation.
    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// Returns whether the cell has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state() == CellState::Cancelled
    }

    /// Returns whether the cell has failed.
    pub fn is_failed(&self) -> bool {
        self.state() == CellState::Failed
    }

    /// Returns the current phase.
    pub fn state(&self) -> CellState {
        self.gate.status.lock().phase
    }

    /// Returns the value if it has been computed, without triggering the
    /// factory.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_memo::control::DeferredCell;
    ///
    /// let cell = DeferredCell::infallible(|| 42);
    /// assert!(cell.peek().is_none());
    ///
    /// let _ = cell.get();
    /// assert_eq!(cell.peek(), Some(&42));
    /// ```
    pub fn peek(&self) -> Option<&T> {
        self.value.get()
    }
}

fn default_factory<T: Default>() -> Result<T, Infallible> {
    Ok(T::default())
}

impl<T: Default> Default for DeferredCell<T> {
    /// Creates a cell that computes `T::default()`.
    fn default() -> Self {
        Self::new(default_factory::<T>)
    }
}

impl<T: fmt::Debug, E, F> fmt::Debug for DeferredCell<T, E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.peek(), self.state()) {
            (Some(value), _) => fmt::Debug::fmt(value, formatter),
            (None, CellState::Cancelled) => formatter.write_str("<cancelled>"),
            (None, CellState::Failed) => formatter.write_str("<failed>"),
            (None, _) => formatter.write_str("<uninit>"),
        }
    }
}

impl<T: fmt::Display, E, F> fmt::Display for DeferredCell<T, E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.peek(), self.state()) {
            (Some(value), _) => fmt::Display::fmt(value, formatter),
            (None, CellState::Cancelled) => formatter.write_str("<cancelled>"),
            (None, CellState::Failed) => formatter.write_str("<failed>"),
            (None, _) => formatter.write_str("<uninit>"),
        }
    }
}
