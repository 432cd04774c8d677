//! # Mutex.
//!
//! Mutex is a synchronization primitive that allows **only one thread at a
//! time** to access a critical section of code, protecting shared resources
//! such as memory, files, or device state from concurrent modification.
//! Unlike the spin lock, it **blocks** threads trying to acquire it if another
//! thread already holds the lock.
//!
//! The [`Mutex`] maintains the list of threads sleeping on the mutex. A
//! thread that finds the mutex held parks itself with
//! [`Current::park_with`], leaving its [`ParkHandle`] on that list. When
//! unlocking, ownership is handed directly to the front waiter, which is then
//! woken up. Waiters therefore acquire the mutex in FIFO order, and a thread
//! that arrives later cannot overtake a sleeper.
//!
//! |                | SpinLock               | Mutex                    |
//! |----------------|-------------------------|--------------------------|
//! | Waiting thread | Spins (busy-waits)       | Sleeps                   |
//! | CPU usage      | High (wastes CPU cycles) | Low (no busy waiting)     |
//! | Overhead       | Low (fast if uncontended)| Higher (due to sleep/wake)|
//!
//! Every mutex carries a unique identifier. A
//! [`ConditionVariable`](crate::sync::ConditionVariable) remembers the
//! identifier of the mutex it is bound to and checks it on every operation.
//!
//! [`Current::park_with`]: kestrel::thread::Current::park_with

use kestrel::{
    sync::{SpinLock, WouldBlock, atomic::AtomicU64},
    thread::{Current, ParkHandle},
};
use std::{
    cell::UnsafeCell,
    collections::VecDeque,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

struct MutexState {
    holder: Option<u64>,
    waiters: VecDeque<ParkHandle>,
}

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The mutex can be created via a [`new`] constructor. Each mutex has a
/// type parameter which represents the data that it is protecting. The data can
/// only be accessed through the guards returned from [`lock`] and
/// [`try_lock`], which guarantees that the data is only ever accessed when the
/// mutex is locked.
///
/// [`new`]: Self::new
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```rust,ignore
/// let data = Arc::new(Mutex::new(0));
///
/// for _ in 0..N {
///     let data = Arc::clone(&data);
///     ThreadBuilder::new("work").spawn(move || {
///         let mut data = data.lock();
///         *data += 1;
///         data.unlock();
///     });
/// }
/// ```
pub struct Mutex<T> {
    id: u64,
    state: SpinLock<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub fn new(t: T) -> Mutex<T> {
        static ID: AtomicU64 = AtomicU64::new(0);
        Mutex {
            id: ID.fetch_add(1),
            state: SpinLock::new(MutexState {
                holder: None,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(t),
        }
    }

    /// Unique identifier of this mutex.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// Upon returning, the thread is the only thread with the lock held.
    /// The lock is released by [`MutexGuard::unlock`] or when the guard goes
    /// out of scope.
    ///
    /// # Panics
    ///
    /// Locking a mutex in the thread which already holds it panics.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let tid = Current::get_tid();
        let mut state = self.state.lock();
        let holder = state.holder;
        match holder {
            None => {
                state.holder = Some(tid);
                state.unlock();
            }
            Some(holder) => {
                assert_ne!(holder, tid, "Mutex is locked twice by the same thread.");
                Current::park_with(move |handle| {
                    state.waiters.push_back(handle);
                    state.unlock();
                });
                // The unlocker handed the mutex over before waking us up.
                debug_assert!(self.is_held_by_current_thread());
            }
        }
        MutexGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`Err`] is
    /// returned. Otherwise, an guard is returned.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        let tid = Current::get_tid();
        let mut state = self.state.lock();
        if state.holder.is_some() {
            state.unlock();
            return Err(WouldBlock);
        }
        state.holder = Some(tid);
        state.unlock();
        Ok(MutexGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Returns true if the current thread holds this mutex.
    pub fn is_held_by_current_thread(&self) -> bool {
        let tid = Current::get_tid();
        let state = self.state.lock();
        let held = state.holder == Some(tid);
        state.unlock();
        held
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(
            state.holder,
            Some(Current::get_tid()),
            "Mutex is unlocked by a thread that does not hold it."
        );
        match state.waiters.pop_front() {
            Some(next) => {
                state.holder = Some(next.tid());
                state.unlock();
                next.unpark();
            }
            None => {
                state.holder = None;
                state.unlock();
            }
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex.
///
/// The lock is released by [`unlock`] or when the guard falls out of scope.
/// The data protected by the mutex can be accessed through this guard.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: 'a> {
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    /// Releases the underlying [`Mutex`], waking up the first waiter if any.
    pub fn unlock(self) {
        drop(self)
    }

    /// The mutex this guard belongs to.
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release()
    }
}
