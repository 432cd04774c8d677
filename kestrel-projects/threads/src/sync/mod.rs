//! # Synchronization Primitives.
//!
//! A [`SpinLock`] provides mutual exclusion by masking interrupts and
//! spinning, which is fine for a handful of instructions but wastes the
//! processor under contention and forbids sleeping while held. The
//! primitives of this module put waiting threads to sleep instead.
//!
//! | Primitive             | Blocks Thread? | Fair?    | Typical Use Case                                 |
//! |-----------------------|----------------|----------|--------------------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | No       | Short, uncontended critical sections in the kernel |
//! | [`Mutex`]             | Yes            | Yes      | Exclusive access to shared data                 |
//! | [`ConditionVariable`] | Yes            | Yes      | Waiting for a condition to become true          |
//! | [`Semaphore`]         | Yes            | Yes      | Limiting access to a bounded resource            |
//!
//! [`Mutex`] and [`ConditionVariable`] together form a monitor: a condition
//! variable is bound to one mutex when it is created, and every operation on
//! it requires the caller to hold that mutex. [`Semaphore`] is built from the
//! two.
//!
//! [`SpinLock`]: kestrel::sync::SpinLock

pub mod condition_variable;
pub mod mutex;
pub mod semaphore;

pub use condition_variable::*;
pub use mutex::*;
pub use semaphore::*;
