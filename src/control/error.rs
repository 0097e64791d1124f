//! Error types for deferred cells.
//!
//! Every failure a [`DeferredCell`](super::DeferredCell) can report is
//! terminal for that cell, except [`InterruptedError`], which only concerns
//! the waiting thread. All of them are collected in [`DeferredError`].

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// The factory of a deferred cell returned an error.
///
/// The cause is shared: every caller that observes the failure receives a
/// clone of the same `Arc`, so callers can check identity with
/// [`Arc::ptr_eq`] on [`InitializationError::shared_cause`].
///
/// # Examples
///
/// ```rust
/// use lazy_memo::control::{DeferredCell, DeferredError};
///
/// let cell = DeferredCell::new(|| Err::<i32, _>("disk on fire"));
///
/// match cell.get() {
///     Err(DeferredError::Initialization(error)) => assert_eq!(*error.cause(), "disk on fire"),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub struct InitializationError<E> {
    cause: Arc<E>,
}

impl<E> InitializationError<E> {
    pub(crate) const fn new(cause: Arc<E>) -> Self {
        Self { cause }
    }

    /// Returns the error produced by the factory.
    pub fn cause(&self) -> &E {
        &self.cause
    }

    /// Returns the shared handle to the cause.
    pub const fn shared_cause(&self) -> &Arc<E> {
        &self.cause
    }
}

impl<E> Clone for InitializationError<E> {
    fn clone(&self) -> Self {
        Self {
            cause: Arc::clone(&self.cause),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for InitializationError<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InitializationError")
            .field("cause", &self.cause)
            .finish()
    }
}

impl<E: fmt::Display> fmt::Display for InitializationError<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "DeferredCell: initialization failed: {}", self.cause)
    }
}

impl<E: Error + 'static> Error for InitializationError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.cause)
    }
}

/// The thread computing a cell called back into the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReentrancyError;

impl fmt::Display for ReentrancyError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("DeferredCell: factory re-entered its own cell")
    }
}

impl Error for ReentrancyError {}

/// The cell was cancelled before it produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationError;

impl fmt::Display for CancellationError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("DeferredCell: cancelled")
    }
}

impl Error for CancellationError {}

/// The waiting thread was interrupted before the computation finished.
///
/// Only [`DeferredCell::get_interruptible`](super::DeferredCell::get_interruptible)
/// returns this; the cell itself is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptedError;

impl fmt::Display for InterruptedError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("DeferredCell: interrupted while waiting")
    }
}

impl Error for InterruptedError {}

/// Every way observing a [`DeferredCell`](super::DeferredCell) can fail.
///
/// `Clone` does not require `E: Clone`; the factory cause is shared.
///
/// # Examples
///
/// ```rust
/// use lazy_memo::control::{DeferredCell, DeferredError};
///
/// let cell = DeferredCell::infallible(|| 42);
/// cell.cancel();
///
/// assert!(matches!(cell.get(), Err(DeferredError::Cancelled(_))));
/// ```
pub enum DeferredError<E> {
    /// The factory returned an error.
    Initialization(InitializationError<E>),
    /// The factory re-entered its own cell.
    Reentrant(ReentrancyError),
    /// The cell was cancelled.
    Cancelled(CancellationError),
    /// The waiting thread was interrupted.
    Interrupted(InterruptedError),
    /// The factory panicked.
    Poisoned,
}

impl<E> DeferredError<E> {
    /// Returns the factory cause if this is an initialization failure.
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::Initialization(error) => Some(error.cause()),
            _ => None,
        }
    }

    /// Returns `true` for the terminal failures that the cell remembers.
    ///
    /// Only [`DeferredError::Interrupted`] is not terminal.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Interrupted(_))
    }
}

impl<E> Clone for DeferredError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Initialization(error) => Self::Initialization(error.clone()),
            Self::Reentrant(error) => Self::Reentrant(*error),
            Self::Cancelled(error) => Self::Cancelled(*error),
            Self::Interrupted(error) => Self::Interrupted(*error),
            Self::Poisoned => Self::Poisoned,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for DeferredError<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization(error) => formatter
                .debug_tuple("Initialization")
                .field(error)
                .finish(),
            Self::Reentrant(error) => formatter.debug_tuple("Reentrant").field(error).finish(),
            Self::Cancelled(error) => formatter.debug_tuple("Cancelled").field(error).finish(),
            Self::Interrupted(error) => formatter.debug_tuple("Interrupted").field(error).finish(),
            Self::Poisoned => formatter.write_str("Poisoned"),
        }
    }
}

impl<E: fmt::Display> fmt::Display for DeferredError<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization(error) => write!(formatter, "{error}"),
            Self::Reentrant(error) => write!(formatter, "{error}"),
            Self::Cancelled(error) => write!(formatter, "{error}"),
            Self::Interrupted(error) => write!(formatter, "{error}"),
            Self::Poisoned => formatter.write_str("DeferredCell: factory panicked"),
        }
    }
}

impl<E: Error + 'static> Error for DeferredError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Initialization(error) => Some(error),
            Self::Reentrant(error) => Some(error),
            Self::Cancelled(error) => Some(error),
            Self::Interrupted(error) => Some(error),
            Self::Poisoned => None,
        }
    }
}

impl<E> From<InitializationError<E>> for DeferredError<E> {
    fn from(error: InitializationError<E>) -> Self {
        Self::Initialization(error)
    }
}

impl<E> From<ReentrancyError> for DeferredError<E> {
    fn from(error: ReentrancyError) -> Self {
        Self::Reentrant(error)
    }
}

impl<E> From<CancellationError> for DeferredError<E> {
    fn from(error: CancellationError) -> Self {
        Self::Cancelled(error)
    }
}

impl<E> From<InterruptedError> for DeferredError<E> {
    fn from(error: InterruptedError) -> Self {
        Self::Interrupted(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("boom")
        }
    }

    impl Error for Boom {}

    #[rstest]
    fn test_initialization_error_display() {
        let error = InitializationError::new(Arc::new(Boom));
        assert_eq!(
            format!("{error}"),
            "DeferredCell: initialization failed: boom"
        );
    }

    #[rstest]
    fn test_initialization_error_source_is_cause() {
        let error = InitializationError::new(Arc::new(Boom));
        let source = error.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("boom"));
    }

    #[rstest]
    fn test_clone_shares_cause() {
        let error: DeferredError<Boom> = InitializationError::new(Arc::new(Boom)).into();
        let cloned = error.clone();
        match (&error, &cloned) {
            (DeferredError::Initialization(left), DeferredError::Initialization(right)) => {
                assert!(Arc::ptr_eq(left.shared_cause(), right.shared_cause()));
            }
            _ => panic!("expected initialization errors"),
        }
    }

    #[rstest]
    #[case(DeferredError::<Boom>::Reentrant(ReentrancyError), "DeferredCell: factory re-entered its own cell")]
    #[case(DeferredError::<Boom>::Cancelled(CancellationError), "DeferredCell: cancelled")]
    #[case(DeferredError::<Boom>::Interrupted(InterruptedError), "DeferredCell: interrupted while waiting")]
    #[case(DeferredError::<Boom>::Poisoned, "DeferredCell: factory panicked")]
    fn test_deferred_error_display(#[case] error: DeferredError<Boom>, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    fn test_only_interrupted_is_not_terminal() {
        assert!(!DeferredError::<Boom>::Interrupted(InterruptedError).is_terminal());
        assert!(DeferredError::<Boom>::Cancelled(CancellationError).is_terminal());
        assert!(DeferredError::<Boom>::Poisoned.is_terminal());
    }

    #[rstest]
    fn test_cause_accessor() {
        let error: DeferredError<&str> = InitializationError::new(Arc::new("nope")).into();
        assert_eq!(error.cause(), Some(&"nope"));
        assert_eq!(DeferredError::<&str>::Poisoned.cause(), None);
    }
}
