//! Uniprocessor spinlock.
//!
//! On a single processor a spinlock only has to prevent the holder from
//! being preempted: while interrupts are disabled no other context can run a
//! critical section. The machine in this kernel runs contexts on host
//! threads, so the lock additionally keeps a lock word that is set with an
//! atomic read-modify-write instruction while it is held.
//!
//! Because the holder runs with interrupts disabled, critical sections must
//! stay short and must never park. Use a sleeping lock for anything longer.
pub use machine::spinlock::{SpinLock, SpinLockGuard, WouldBlock, held_by_current};
