//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to efficiently block until a
//! certain condition is met, without consuming CPU cycles. It is always used
//! in conjunction with a [`Mutex`] that guards access to shared data. It is
//! generally used when a thread needs to *wait for a specific state*
//! in shared data, and another thread will *notify* it when that state changes.
//!
//! ## `ConditionVariable` as a monitor
//! A [`ConditionVariable`] is bound to exactly one [`Mutex`] when it is
//! created and stays bound for its whole lifetime. Every operation takes the
//! [`MutexGuard`] of that mutex, which proves that the caller holds it. A
//! guard of any other mutex is a bug and panics.
//!
//! - [`ConditionVariable::wait`] puts the caller on the wait queue, releases
//!   the mutex and sleeps. Enqueueing and releasing happen while interrupts
//!   are disabled, so a signal can never slip in between them. The mutex is
//!   re-acquired before `wait` returns.
//! - [`ConditionVariable::signal`] wakes **one** waiting thread, the one that
//!   has waited the longest.
//! - [`ConditionVariable::broadcast`] wakes **all** waiting threads.
//!
//! Signals are not buffered: with no waiter, both `signal` and `broadcast`
//! do nothing. A woken thread must re-check its condition, which
//! [`ConditionVariable::wait_while`] does in a loop:
//!
//! ```rust,ignore
//! let guard = condvar.wait_while(mutex.lock(), |state| state.is_empty());
//! ```

use super::mutex::{Mutex, MutexGuard};
use kestrel::{
    sync::SpinLock,
    thread::{Current, ParkHandle},
};
use std::collections::VecDeque;

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a mutex. The predicate is always verified inside of the mutex before
/// determining that a thread must block.
pub struct ConditionVariable {
    lock_id: u64,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl ConditionVariable {
    /// Creates a new condition variable bound to `mutex`.
    pub fn new<T>(mutex: &Mutex<T>) -> Self {
        Self {
            lock_id: mutex.id(),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    #[track_caller]
    fn check<T>(&self, guard: &MutexGuard<'_, T>) {
        assert_eq!(
            guard.mutex().id(),
            self.lock_id,
            "ConditionVariable is used with a mutex it is not bound to."
        );
    }

    /// Atomically releases the mutex and sleeps until signaled, then
    /// re-acquires the mutex.
    #[track_caller]
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.check(&guard);
        let mutex = guard.mutex();
        let mut waiters = self.waiters.lock();
        Current::park_with(move |handle| {
            waiters.push_back(handle);
            waiters.unlock();
            guard.unlock();
        });
        mutex.lock()
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// The predicate is evaluated with the mutex held, before the first sleep
    /// and after every wakeup.
    #[track_caller]
    pub fn wait_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        while predicate(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes up one blocked thread on this condvar.
    ///
    /// If there is a blocked thread on this condition variable, then it will
    /// be woken up from its call to [`wait`]. Calls to `signal` are not
    /// buffered in any way.
    ///
    /// To wake up all threads, see [`broadcast`].
    ///
    /// [`broadcast`]: ConditionVariable::broadcast
    /// [`wait`]: ConditionVariable::wait
    #[track_caller]
    pub fn signal<T>(&self, guard: &MutexGuard<'_, T>) {
        self.check(guard);
        let mut waiters = self.waiters.lock();
        let waiter = waiters.pop_front();
        waiters.unlock();
        if let Some(waiter) = waiter {
            waiter.unpark();
        }
    }

    /// Wakes up all blocked threads on this condvar.
    ///
    /// To wake up only one thread, see [`signal`].
    ///
    /// [`signal`]: ConditionVariable::signal
    #[track_caller]
    pub fn broadcast<T>(&self, guard: &MutexGuard<'_, T>) {
        self.check(guard);
        let mut waiters = self.waiters.lock();
        let woken = std::mem::take(&mut *waiters);
        waiters.unlock();
        for waiter in woken {
            waiter.unpark();
        }
    }

    /// Number of threads sleeping on this condvar.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let len = waiters.len();
        waiters.unlock();
        len
    }
}
