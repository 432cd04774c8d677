//! The simulated machine underneath the kernel.
//!
//! This crate plays the role of the hardware: an interrupt controller with a
//! single enable flag, an interval timer, byte-addressable main memory, the
//! user-mode register file and a power switch. It also hosts the lowest-level
//! kernel utilities that talk to it directly (the interrupt-masking spinlock
//! and the console print macros).
//!
//! Every kernel execution context runs on a host thread. The machine models
//! a uniprocessor by letting only one context at a time run with interrupts
//! disabled; see [`interrupt`].
//!
//! You are **not** required to understand every line of this crate to use
//! the kernel. Instead, see the `kestrel` crate for the interfaces the kernel
//! builds on top of it.

use std::sync::{Arc, atomic::AtomicBool};

#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod memory;
pub mod power;
pub mod processor;
pub mod spinlock;
pub mod timer;

pub use memory::PhysicalMemory;
pub use power::PowerControl;
pub use spinlock::SpinLock;
pub use timer::Timer;

/// Size of a page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 0x400;

/// Suppresses the leveled log output when set.
pub static QUITE: AtomicBool = AtomicBool::new(false);

/// The devices of one simulated machine.
pub struct Machine {
    /// Main memory.
    pub memory: Arc<PhysicalMemory>,
    /// Interval timer.
    pub timer: Arc<Timer>,
    /// Power switch.
    pub power: Arc<PowerControl>,
}

impl Machine {
    /// Builds a powered-on machine with `num_phys_pages` frames of memory.
    pub fn new(num_phys_pages: usize) -> Self {
        Self {
            memory: Arc::new(PhysicalMemory::new(num_phys_pages)),
            timer: Arc::new(Timer::new()),
            power: Arc::new(PowerControl::new()),
        }
    }
}
