//! Interrupt management.
//!
//! [`InterruptGuard`] disables interrupts for its lifetime. It is the only
//! primitive that makes a sequence atomic with respect to the timer tick;
//! locks protect against other contexts that run with interrupts enabled.
pub use machine::interrupt::{InterruptGuard, InterruptState, enabled_during};
