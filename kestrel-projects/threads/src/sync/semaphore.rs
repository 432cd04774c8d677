//! # Semaphore.
//!
//! A **semaphore** is a fundamental synchronization primitive used to regulate
//! concurrent access to a finite set of resources. It maintains an internal
//! count representing the number of available "permits." Each permit grants a
//! thread the right to access a shared resource.
//!
//! The [`Semaphore`] here is built from a [`Mutex`] protecting the permit
//! count and a [`ConditionVariable`] bound to it, on which threads sleep
//! while no permit is left.
//!
//! [`Semaphore`] is combined with a resource to protect. Threads acquire a
//! permit by calling [`Semaphore::wait`], and release it either explicitly
//! via [`Semaphore::signal`] or implicitly using the [`SemaphorePermits`]
//! RAII guard. A semaphore with a single permit is a binary semaphore and
//! behaves as a sleeping lock around its resource.
//!
//! ```rust,ignore
//! let sema = Semaphore::new(3, state); // Allows up to 3 concurrent threads to the state
//!
//! // Acquire a permit (blocks if unavailable)
//! let permit = sema.wait();
//!
//! // Critical section (up to 3 threads can enter concurrently)
//! permit.work(); // Call a method defined on the `state`.
//!
//! // Permit is automatically released when `permit` goes out of scope.
//! ```
//!
//! [`Mutex`]: crate::sync::Mutex
//! [`ConditionVariable`]: crate::sync::ConditionVariable

use super::{condition_variable::ConditionVariable, mutex::Mutex};
use std::ops::Deref;

/// Counting semaphore.
///
/// A semaphore maintains a set of permits and resource. Permits are used to
/// synchronize access to a shared resource. A semaphore differs from a mutex in
/// that it can allow more than one concurrent caller to access the shared
/// resource at a time.
pub struct Semaphore<T> {
    resource: T,
    permits: Mutex<usize>,
    available: ConditionVariable,
}

impl<T> Semaphore<T> {
    /// Creates a new semaphore initialized with a specified number of permits.
    ///
    /// # Arguments
    ///
    /// * `permits` - The initial number of available permits.
    /// * `resource` - A resource combined with this semaphore.
    pub fn new(permits: usize, resource: T) -> Self {
        let permits = Mutex::new(permits);
        let available = ConditionVariable::new(&permits);
        Self {
            resource,
            permits,
            available,
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// This method returns a [`SemaphorePermits`] RAII guard. When the guard is
    /// dropped, it will automatically release the acquired permit.
    pub fn wait(&self) -> SemaphorePermits<'_, T> {
        let mut permits = self
            .available
            .wait_while(self.permits.lock(), |permits| *permits == 0);
        *permits -= 1;
        permits.unlock();
        SemaphorePermits { sema: self }
    }

    /// Releases a permit back to the semaphore.
    ///
    /// This method increases the number of available permits by one, and if any
    /// threads are blocked in `wait()`, one will be woken up to acquire the
    /// newly released permit.
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.signal(&permits);
        permits.unlock();
    }

    /// Number of permits currently available.
    pub fn permits(&self) -> usize {
        let permits = self.permits.lock();
        let v = *permits;
        permits.unlock();
        v
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
///
/// The data protected by the semaphore can be accessed through this guard via
/// its [`Deref`] implementations.
///
/// This structure is created by the [`wait`] method on [`Semaphore`].
///
/// [`wait`]: Semaphore::wait
pub struct SemaphorePermits<'a, T> {
    sema: &'a Semaphore<T>,
}

impl<T> SemaphorePermits<'_, T> {
    /// Consumes the permit without returning it to the semaphore.
    pub fn forget(self) {
        std::mem::forget(self)
    }
}

impl<T> Deref for SemaphorePermits<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.sema.resource
    }
}

impl<T> Drop for SemaphorePermits<'_, T> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}
