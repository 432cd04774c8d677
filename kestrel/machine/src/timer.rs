//! Programmable interval timer.
//!
//! The timer keeps a monotonically increasing tick count. Each tick raises
//! the timer interrupt, which calls the registered handler with interrupts
//! disabled. Ticks are produced either by [`Timer::advance`] or by a
//! background ticker started with [`Timer::start`].
use crate::{interrupt::InterruptGuard, power::PowerControl, spinlock::SpinLock};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Handler invoked on every timer interrupt.
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;

/// The machine timer.
pub struct Timer {
    ticks: AtomicU64,
    handler: SpinLock<Option<InterruptHandler>>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Creates a stopped timer at tick 0.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            handler: SpinLock::new(None),
        }
    }

    /// Current tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Registers `handler` as the timer interrupt handler, replacing any
    /// previous one.
    pub fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut guard = self.handler.lock();
        *guard = Some(handler);
        guard.unlock();
    }

    /// Advances the clock by one tick and raises the timer interrupt.
    pub fn tick(&self) {
        let handler = {
            let _masked = InterruptGuard::new();
            self.ticks.fetch_add(1, Ordering::SeqCst);
            let guard = self.handler.lock();
            let handler = guard.clone();
            guard.unlock();
            handler
        };
        // The handler masks interrupts itself for its critical section and
        // may yield afterwards.
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Advances the clock by `n` ticks, raising one interrupt per tick.
    pub fn advance(&self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Starts a background ticker that ticks every `interval` until the
    /// machine is powered off.
    pub fn start(
        self: &Arc<Self>,
        interval: Duration,
        power: Arc<PowerControl>,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        let timer = self.clone();
        std::thread::Builder::new()
            .name("timer".into())
            .spawn(move || {
                while !power.is_halted() {
                    std::thread::sleep(interval);
                    timer.tick();
                }
            })
    }
}
