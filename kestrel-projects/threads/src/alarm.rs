//! # Timer wakeup queue.
//!
//! [`Alarm`] lets a thread sleep for a number of timer ticks without
//! spinning. A sleeping thread is recorded in a priority queue keyed by its
//! deadline, and the timer interrupt handler wakes every thread whose
//! deadline has passed.
//!
//! Records are ordered by `(deadline, seq)` where `seq` is a per-alarm
//! sequence number, so threads with the same deadline wake in the order they
//! went to sleep. Deadlines are full-width `u64` ticks and saturate instead
//! of wrapping.
//!
//! Both the insertion of a record and the scan of the queue run with
//! interrupts disabled. Since the timer interrupt cannot fire while a thread
//! is between inserting its record and going to sleep, a wakeup can never be
//! lost.
//!
//! ```rust,ignore
//! let alarm = Alarm::new(machine.timer.clone());
//! alarm.wait_until(10); // Sleeps for at least 10 ticks.
//! ```
use kestrel::{
    interrupt::InterruptGuard,
    sync::{SpinLock, atomic::AtomicU64},
    thread::{Current, ParkHandle},
};
use machine::Timer;
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::{Arc, Weak},
};

struct WaitRecord {
    deadline: u64,
    seq: u64,
    handle: ParkHandle,
}

impl PartialEq for WaitRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WaitRecord {}

impl PartialOrd for WaitRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// The timer wakeup queue.
pub struct Alarm {
    timer: Arc<Timer>,
    queue: SpinLock<BinaryHeap<Reverse<WaitRecord>>>,
    seq: AtomicU64,
}

impl Alarm {
    /// Creates an alarm over `timer` and installs it as the timer interrupt
    /// handler.
    ///
    /// The handler only holds a weak reference; once the alarm is dropped,
    /// timer interrupts are ignored.
    pub fn new(timer: Arc<Timer>) -> Arc<Self> {
        let alarm = Arc::new(Self {
            timer: timer.clone(),
            queue: SpinLock::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        });
        let weak: Weak<Self> = Arc::downgrade(&alarm);
        timer.set_interrupt_handler(Arc::new(move || {
            if let Some(alarm) = weak.upgrade() {
                alarm.timer_interrupt();
            }
        }));
        alarm
    }

    /// Puts the current thread to sleep for at least `ticks` timer ticks.
    ///
    /// The thread is woken by the first timer interrupt at which the tick
    /// count is at least the current tick count plus `ticks`. With `ticks`
    /// equal to 0 the thread only yields.
    pub fn wait_until(&self, ticks: u64) {
        if ticks == 0 {
            Current::yield_now();
            return;
        }
        let masked = InterruptGuard::new();
        let deadline = self.timer.ticks().saturating_add(ticks);
        let seq = self.seq.fetch_add(1);
        Current::park_with(|handle| {
            let mut queue = self.queue.lock();
            queue.push(Reverse(WaitRecord {
                deadline,
                seq,
                handle,
            }));
            queue.unlock();
        });
        drop(masked);
    }

    /// The timer interrupt handler.
    ///
    /// Wakes every thread whose deadline is not after the current tick, then
    /// yields the processor.
    pub fn timer_interrupt(&self) {
        let masked = InterruptGuard::new();
        let now = self.timer.ticks();
        let mut expired = Vec::new();
        let mut queue = self.queue.lock();
        while queue
            .peek()
            .is_some_and(|Reverse(record)| record.deadline <= now)
        {
            if let Some(Reverse(record)) = queue.pop() {
                expired.push(record.handle);
            }
        }
        queue.unlock();
        for handle in expired {
            handle.unpark();
        }
        drop(masked);
        Current::yield_now();
    }

    /// Number of threads sleeping on this alarm.
    pub fn sleeping(&self) -> usize {
        let queue = self.queue.lock();
        let len = queue.len();
        queue.unlock();
        len
    }
}
