//! Thread abstraction, an execution context of the kernel.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Every kernel thread is backed by a host thread,
//! and the host scheduler decides which runnable thread makes progress.
//!
//! A thread leaves the runnable set only by parking itself:
//! [`Current::park_with`] hands a [`ParkHandle`] to a closure (which usually
//! pushes it onto some wait queue) and then suspends the thread until another
//! thread calls [`ParkHandle::unpark`]. Interrupts are disabled from the
//! moment the handle is created until the thread actually sleeps, so a waker
//! that runs with interrupts disabled can never observe a half-parked thread.
//!
//! A host thread that was not spawned through [`ThreadBuilder`] (for
//! example the thread running a test) is adopted as a kernel thread the first
//! time it asks for [`with_current`].
use crate::{KernelError, sync::atomic::AtomicU64, teletype::Teletype};
use crossbeam_utils::sync::{Parker, Unparker};
use machine::{
    interrupt::{self, InterruptGuard, InterruptState},
    spinlock::{self, SpinLock},
};
use std::{
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

pub(crate) struct TtyState {
    input: &'static [u8],
    idx: usize,
    output: Vec<u8>,
}

impl Teletype for SpinLock<TtyState> {
    fn write(&self, data: &[u8]) -> Result<usize, KernelError> {
        let mut guard = self.lock();
        guard.output.extend_from_slice(data);
        guard.unlock();
        Ok(data.len())
    }

    fn read(&self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut guard = self.lock();
        let TtyState { input, idx, .. } = &mut *guard;
        let read_bytes = input.len().saturating_sub(*idx).min(data.len());
        data[..read_bytes].copy_from_slice(&input[*idx..*idx + read_bytes]);
        *idx += read_bytes;
        guard.unlock();
        Ok(read_bytes)
    }
}

const EXITED: u64 = 0x8000_0000_0000_0000;

/// Payload that unwinds a thread out of [`Current::exit`].
struct ThreadExit(i32);

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: u64,
    /// Thread name
    pub name: String,
    state: SpinLock<ThreadState>,
    /// Mixture of exit state (63th bit) and exit code (lower 32 bits).
    exit_status: AtomicU64,
    unparker: Unparker,
    // Grading utils.
    pub(crate) tty_hook: SpinLock<Option<Arc<SpinLock<TtyState>>>>,
}

impl Thread {
    fn new(name: String, unparker: Unparker, tty_hook: Option<Arc<SpinLock<TtyState>>>) -> Self {
        static TID: AtomicU64 = AtomicU64::new(0);
        Self {
            tid: TID.fetch_add(1),
            name,
            state: SpinLock::new(ThreadState::Runnable),
            exit_status: AtomicU64::new(0),
            unparker,
            tty_hook: SpinLock::new(tty_hook),
        }
    }

    /// Current state of the thread.
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    fn finish(&self, exit_code: i32) {
        self.exit_status.store(EXITED | exit_code as u32 as u64);
        self.set_state(ThreadState::Exited(exit_code));
    }

    pub(crate) fn tty(&self) -> Option<Arc<SpinLock<TtyState>>> {
        let guard = self.tty_hook.lock();
        let val = guard.clone();
        guard.unlock();
        val
    }

    #[doc(hidden)]
    pub fn hook_stdin(&self, b: &'static [u8]) {
        let mut guard = self.tty_hook.lock();
        if guard.is_some() {
            guard.unlock();
            panic!("Fail to hook stdin: already hook.");
        }
        *guard = Some(Arc::new(SpinLock::new(TtyState {
            input: b,
            idx: 0,
            output: Vec::new(),
        })));
        guard.unlock();
    }

    #[doc(hidden)]
    pub fn finish_hook(&self) -> Option<String> {
        let mut guard = self.tty_hook.lock();
        let val = guard.take().map(|n| {
            let guard = n.lock();
            let val = String::from_utf8_lossy(&guard.output).into_owned();
            guard.unlock();
            val
        });
        guard.unlock();
        val
    }
}

struct Running {
    th: Arc<Thread>,
    parker: Parker,
    spawned: bool,
}

thread_local! {
    static CURRENT: RefCell<Option<Running>> = const { RefCell::new(None) };
}

fn current() -> Arc<Thread> {
    CURRENT.with(|c| {
        let mut c = c.borrow_mut();
        let running = c.get_or_insert_with(|| {
            let parker = Parker::new();
            let name = std::thread::current()
                .name()
                .unwrap_or("main")
                .to_string();
            let th = Arc::new(Thread::new(name, parker.unparker().clone(), None));
            th.set_state(ThreadState::Running);
            Running {
                th,
                parker,
                spawned: false,
            }
        });
        running.th.clone()
    })
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    th: Arc<Thread>,
    inner: std::thread::JoinHandle<()>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    ///
    /// If the thread panicked, the panic is propagated to the joiner.
    pub fn join(self) -> i32 {
        assert!(
            spinlock::held_by_current() == 0,
            "Try to join a thread while holding a lock."
        );
        let Self { th, inner, .. } = self;
        if let Err(payload) = interrupt::enabled_during(|| inner.join()) {
            panic::resume_unwind(payload);
        }
        let v = th.exit_status.load();
        debug_assert!(v & EXITED != 0);
        v as u32 as i32
    }

    /// Returns true if the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    th: Arc<Thread>,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        let mut state = self.th.state.lock();
        debug_assert_eq!(*state, ThreadState::Parked);
        *state = ThreadState::Runnable;
        state.unlock();
        self.th.unparker.unpark();
    }
}

/// The opaque structure indicating the running thread.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// Interrupts stay disabled from before `f` runs until the thread sleeps,
    /// and the interrupt state of the caller is restored once it is resumed.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let th = current();
        let _masked = InterruptGuard::new();
        th.set_state(ThreadState::Parked);
        f(ParkHandle { th: th.clone() });
        assert!(
            spinlock::held_by_current() == 0,
            "Try to park a thread while holding a lock."
        );
        interrupt::enabled_during(|| {
            CURRENT.with(|c| {
                if let Some(running) = c.borrow().as_ref() {
                    while th.state() == ThreadState::Parked {
                        running.parker.park();
                    }
                }
            })
        });
        th.set_state(ThreadState::Running);
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// Only threads spawned by [`ThreadBuilder`] can exit.
    pub fn exit(exit_code: i32) -> ! {
        assert!(
            InterruptState::current() == InterruptState::On,
            "Try to exit a thread while holding a lock."
        );
        let spawned = CURRENT.with(|c| c.borrow().as_ref().is_some_and(|r| r.spawned));
        assert!(spawned, "Try to exit a thread not spawned by the kernel.");
        panic::resume_unwind(Box::new(ThreadExit(exit_code)))
    }

    /// Give up the processor to another runnable thread.
    pub fn yield_now() {
        std::thread::yield_now()
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }
}

/// Run a function `f` with current thread as an argument.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&Thread) -> R) -> R {
    let th = current();
    f(&th)
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    th: Arc<Thread>,
    parker: Parker,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    ///
    /// The new thread inherits the console hook of the creating thread.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        let parker = Parker::new();
        let hook = with_current(|th| th.tty());
        Self {
            th: Arc::new(Thread::new(
                String::from(name),
                parker.unparker().clone(),
                hook,
            )),
            parker,
        }
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> u64 {
        self.th.tid
    }

    /// Spawn the thread.
    ///
    /// Returning from `thread_fn` exits the thread with code 0.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> Result<JoinHandle, KernelError> {
        let Self { th, parker } = self;
        let handle_th = th.clone();
        let inner = std::thread::Builder::new()
            .name(th.name.clone())
            .spawn(move || {
                th.set_state(ThreadState::Running);
                CURRENT.with(|c| {
                    *c.borrow_mut() = Some(Running {
                        th: th.clone(),
                        parker,
                        spawned: true,
                    })
                });
                let exit_code = match panic::catch_unwind(AssertUnwindSafe(thread_fn)) {
                    Ok(()) => 0,
                    Err(payload) => match payload.downcast::<ThreadExit>() {
                        Ok(exit) => exit.0,
                        Err(payload) => {
                            th.finish(-1);
                            panic::resume_unwind(payload)
                        }
                    },
                };
                th.finish(exit_code);
            })
            .map_err(|_| KernelError::NoMemory)?;
        Ok(JoinHandle {
            tid: handle_th.tid,
            th: handle_th,
            inner,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn join_returns_exit_code() {
        let h = ThreadBuilder::new("exit").spawn(|| Current::exit(7)).unwrap();
        assert_eq!(h.join(), 7);
        let h = ThreadBuilder::new("return").spawn(|| {}).unwrap();
        assert_eq!(h.join(), 0);
    }

    #[test]
    fn park_and_unpark() {
        let slot: Arc<Mutex<Option<ParkHandle>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let h = ThreadBuilder::new("sleeper")
            .spawn(move || {
                Current::park_with(|handle| *s.lock().unwrap() = Some(handle));
            })
            .unwrap();
        let handle = loop {
            if let Some(handle) = slot.lock().unwrap().take() {
                break handle;
            }
            Current::yield_now();
        };
        handle.unpark();
        assert_eq!(h.join(), 0);
    }

    #[test]
    fn unpark_before_sleep_is_not_lost() {
        // The handle is unparked from inside the closure, before the thread
        // actually sleeps.
        Current::park_with(|handle| handle.unpark());
        assert_eq!(with_current(|th| th.state()), ThreadState::Running);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn join_propagates_panic() {
        let h = ThreadBuilder::new("panic")
            .spawn(|| panic!("boom"))
            .unwrap();
        h.join();
    }

    #[test]
    fn hook_is_inherited() {
        with_current(|th| th.hook_stdin(b"abc"));
        ThreadBuilder::new("child")
            .spawn(|| {
                let hook = with_current(|th| th.tty()).unwrap();
                hook.write(b"hi").unwrap();
            })
            .unwrap()
            .join();
        assert_eq!(with_current(|th| th.finish_hook()).as_deref(), Some("hi"));
    }
}
