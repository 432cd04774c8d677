//! # Thread synchronization.
//!
//! The kernel core starts with a single synchronization primitive: the
//! [`SpinLock`], which masks interrupts while held. Every primitive in this
//! crate is derived from it together with the parking interface of
//! [`kestrel::thread`]: a thread that has to wait publishes a
//! [`ParkHandle`] on a wait queue and sleeps until some other thread pops the
//! handle and unparks it.
//!
//! - [`sync`]: sleeping [`Mutex`], [`ConditionVariable`] (the monitor) and
//!   [`Semaphore`].
//! - [`alarm`]: the timer wakeup queue. Threads sleep for a number of timer
//!   ticks and the timer interrupt wakes them up.
//! - [`communicator`]: a rendezvous channel that hands one 32-bit word from a
//!   speaker to a listener.
//! - [`react_water`]: bonds hydrogen and oxygen threads into water molecules
//!   with semaphores.
//!
//! [`SpinLock`]: kestrel::sync::SpinLock
//! [`ParkHandle`]: kestrel::thread::ParkHandle
//! [`Mutex`]: sync::Mutex
//! [`ConditionVariable`]: sync::ConditionVariable
//! [`Semaphore`]: sync::Semaphore

pub mod alarm;
pub mod communicator;
pub mod react_water;
pub mod sync;
