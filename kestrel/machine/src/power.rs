//! Machine power control.
use std::sync::atomic::{AtomicBool, Ordering};

/// Power switch of the machine.
#[derive(Default)]
pub struct PowerControl {
    halted: AtomicBool,
}

impl PowerControl {
    /// A powered-on machine.
    pub const fn new() -> Self {
        Self {
            halted: AtomicBool::new(false),
        }
    }

    /// Powers the machine off. Subsequent calls are no-ops.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            crate::info!("Machine halting!");
        }
    }

    /// Returns true once [`PowerControl::halt`] has been called.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
