//! Interrupt masking of the simulated uniprocessor.
//!
//! Every execution context of the machine runs on its own host thread, but
//! the machine only has a single interrupt-enable flag. Disabling interrupts
//! therefore means claiming the processor: while one context holds an
//! [`InterruptGuard`], no other context can disable interrupts, and the timer
//! handler (which runs with interrupts disabled) cannot fire.
//!
//! Guards nest. Only the outermost guard re-enables interrupts when dropped.
#[cfg(doc)]
use crate::spinlock::SpinLockGuard;
use crossbeam_utils::Backoff;
use std::{
    cell::Cell,
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

/// Context that currently runs with interrupts disabled (0 if none).
static MASK_OWNER: AtomicU64 = AtomicU64::new(0);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: u64 = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
    static NESTED: Cell<usize> = const { Cell::new(0) };
}

fn context_id() -> u64 {
    CONTEXT_ID.with(|id| *id)
}

fn disable() {
    let me = context_id();
    let backoff = Backoff::new();
    while MASK_OWNER
        .compare_exchange_weak(0, me, Ordering::SeqCst, Ordering::Relaxed)
        .is_err()
    {
        backoff.snooze();
    }
}

fn enable() {
    let prev = MASK_OWNER.swap(0, Ordering::SeqCst);
    assert_eq!(prev, context_id(), "Interrupts enabled by a non-owner context.");
}

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the interrupt state of the current context.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if the current context disabled them.
    pub fn current() -> Self {
        if NESTED.with(Cell::get) == 0 {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard was
/// created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - A [`SpinLockGuard`] holds an [`InterruptGuard`] internally, so the same
///   rule applies to spinlock guards.
///
/// This structure is created using [`InterruptGuard::new`].
pub struct InterruptGuard {
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// If another context currently runs with interrupts disabled, this waits
    /// until that context enables them again.
    ///
    /// # Example
    /// ```rust,ignore
    /// let _guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        let nested = NESTED.with(Cell::get);
        if nested == 0 {
            disable();
        }
        NESTED.with(|n| n.set(nested + 1));
        Self {
            _not_send: PhantomData,
        }
    }

    /// Returns true if the current context holds at least one guard.
    pub fn is_guarded() -> bool {
        NESTED.with(Cell::get) > 0
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let prev = NESTED.with(Cell::get);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
        NESTED.with(|n| n.set(prev - 1));
        if prev == 1 {
            enable();
        }
    }
}

/// Runs `f` with interrupts enabled, then restores the nesting depth the
/// current context had before the call.
///
/// This is what a suspended context does while it waits: other contexts
/// (and the timer) must be able to run until it is resumed.
pub fn enabled_during<R>(f: impl FnOnce() -> R) -> R {
    let saved = NESTED.with(|n| n.replace(0));
    if saved > 0 {
        enable();
    }
    let r = f();
    if saved > 0 {
        disable();
    }
    NESTED.with(|n| n.set(saved));
    r
}
