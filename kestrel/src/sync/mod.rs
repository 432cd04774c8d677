//! Low-level synchronization primitives.
//!
//! Sleeping locks, monitors and semaphores are built on top of these in the
//! `kestrel-threads` crate.
pub mod atomic;
pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
