//! Cooperative thread interruption.
//!
//! Every thread owns an advisory interrupt flag. Any thread holding an
//! [`InterruptHandle`] for it can raise the flag; code running on the
//! flagged thread decides what to do about it. Raising the flag also wakes
//! the target if it is blocked inside a
//! [`DeferredCell`](super::DeferredCell), so an interruptible wait can give
//! up and a non-interruptible one can go back to sleep.
//!
//! # Examples
//!
//! ```rust
//! use lazy_memo::control::interrupt;
//! use std::sync::mpsc;
//! use std::thread;
//!
//! let (sender, receiver) = mpsc::channel();
//! let worker = thread::spawn(move || {
//!     sender.send(interrupt::current()).unwrap();
//!     while !interrupt::is_interrupted() {
//!         thread::yield_now();
//!     }
//!     interrupt::take_interrupt()
//! });
//!
//! receiver.recv().unwrap().interrupt();
//! assert!(worker.join().unwrap());
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// Something a thread can be blocked on and woken from.
///
/// Implementors must take the same lock the sleeper re-checks its flag
/// under before notifying, otherwise the wake-up can be lost.
pub(crate) trait Unblock: Send + Sync {
    fn unblock(&self);
}

struct InterruptState {
    thread: ThreadId,
    interrupted: AtomicBool,
    blocker: Mutex<Option<Arc<dyn Unblock>>>,
}

impl InterruptState {
    fn new() -> Self {
        Self {
            thread: thread::current().id(),
            interrupted: AtomicBool::new(false),
            blocker: Mutex::new(None),
        }
    }
}

thread_local! {
    static CURRENT: Arc<InterruptState> = Arc::new(InterruptState::new());
}

/// A handle for interrupting one particular thread.
///
/// Obtained on the target thread through [`current`], then sent wherever
/// the interruption will be requested from. Cloning is cheap.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

impl InterruptHandle {
    /// Raises the interrupt flag of the target thread and wakes it if it is
    /// blocked on a deferred cell.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);

        // Clone out so the registration lock is released before unblocking.
        let blocker = self.state.blocker.lock().clone();
        if let Some(blocker) = blocker {
            blocker.unblock();
        }
    }

    /// Returns whether the target thread's flag is currently raised.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Returns the id of the thread this handle interrupts.
    pub fn thread_id(&self) -> ThreadId {
        self.state.thread
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InterruptHandle")
            .field("thread", &self.state.thread)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Returns an interrupt handle for the calling thread.
pub fn current() -> InterruptHandle {
    CURRENT.with(|state| InterruptHandle {
        state: Arc::clone(state),
    })
}

/// Returns whether the calling thread's interrupt flag is raised, leaving it
/// untouched.
pub fn is_interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.load(Ordering::SeqCst))
}

/// Clears the calling thread's interrupt flag and returns its previous
/// value.
pub fn take_interrupt() -> bool {
    CURRENT.with(|state| state.interrupted.swap(false, Ordering::SeqCst))
}

/// Clears the calling thread's interrupt flag.
pub fn clear_interrupt() {
    let _ = take_interrupt();
}

/// Marks the calling thread as blocked on `blocker` until the returned
/// guard is dropped.
///
/// The flag must be checked after this call and before sleeping.
pub(crate) fn block_on(blocker: Arc<dyn Unblock>) -> Blocked {
    let state = CURRENT.with(Arc::clone);
    *state.blocker.lock() = Some(blocker);
    Blocked { state }
}

/// Registration of the current thread as blocked; cleared on drop.
pub(crate) struct Blocked {
    state: Arc<InterruptState>,
}

impl Drop for Blocked {
    fn drop(&mut self) {
        self.state.blocker.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct CountingBlocker {
        wakes: AtomicUsize,
    }

    impl Unblock for CountingBlocker {
        fn unblock(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[rstest]
    fn test_fresh_thread_is_not_interrupted() {
        thread::spawn(|| assert!(!is_interrupted())).join().unwrap();
    }

    #[rstest]
    fn test_self_interrupt_sets_and_take_clears() {
        thread::spawn(|| {
            current().interrupt();
            assert!(is_interrupted());
            assert!(take_interrupt());
            assert!(!is_interrupted());
            assert!(!take_interrupt());
        })
        .join()
        .unwrap();
    }

    #[rstest]
    fn test_clear_interrupt() {
        thread::spawn(|| {
            current().interrupt();
            clear_interrupt();
            assert!(!is_interrupted());
        })
        .join()
        .unwrap();
    }

    #[rstest]
    fn test_interrupt_from_other_thread() {
        let (handle_sender, handle_receiver) = mpsc::channel();
        let (go_sender, go_receiver) = mpsc::channel::<()>();

        let worker = thread::spawn(move || {
            handle_sender.send(current()).unwrap();
            go_receiver.recv().unwrap();
            is_interrupted()
        });

        let handle = handle_receiver.recv().unwrap();
        assert_eq!(handle.thread_id(), worker.thread().id());
        handle.interrupt();
        assert!(handle.is_interrupted());
        go_sender.send(()).unwrap();

        assert!(worker.join().unwrap());
    }

    #[rstest]
    fn test_interrupt_wakes_registered_blocker() {
        thread::spawn(|| {
            let blocker = Arc::new(CountingBlocker {
                wakes: AtomicUsize::new(0),
            });
            let registration = block_on(Arc::clone(&blocker) as Arc<dyn Unblock>);
            current().interrupt();
            assert_eq!(blocker.wakes.load(Ordering::SeqCst), 1);

            drop(registration);
            current().interrupt();
            assert_eq!(blocker.wakes.load(Ordering::SeqCst), 1);
            clear_interrupt();
        })
        .join()
        .unwrap();
    }

    #[rstest]
    fn test_debug_names_thread() {
        let handle = current();
        let rendered = format!("{handle:?}");
        assert!(rendered.starts_with("InterruptHandle"));
        assert!(rendered.contains("interrupted"));
    }
}
