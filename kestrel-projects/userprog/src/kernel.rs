//! # The user-program kernel.
//!
//! [`UserKernel`] ties the pieces together: one simulated [`Machine`], the
//! [`FrameAllocator`] over its memory, the file system, the console, the
//! program [`Loader`], and the table of live processes.
//!
//! ```rust,ignore
//! let programs = Arc::new(ProgramRegistry::new());
//! programs.register_fn("hello", |ctx| {
//!     let msg = ctx.push_bytes(b"hello");
//!     ctx.syscall(SyscallNumber::Write as i32, 1, msg as i32, 5, 0);
//!     0
//! });
//! let kernel = UserKernel::new(SystemConfiguration::default(), Arc::new(MemFs::new()), programs);
//! assert_eq!(kernel.run("hello", &[] as &[&str]), Ok(0));
//! ```
//!
//! The first process started is the **root** process; only it may halt the
//! machine. Every process runs on its own kernel thread, so a parent and its
//! children run concurrently.
//!
//! The kernel counts live processes. Once the last one exits,
//! [`UserKernel::wait_idle`] returns, and the machine powers off if the
//! configuration asks for it.
use crate::{
    file_struct::FileStruct,
    frame_allocator::FrameAllocator,
    loader::{LoadContext, Loader},
    process::{Pid, Process, ProcessHandle, ProcessState, UserContext},
    syscall::SyscallTable,
};
use kestrel::{
    KernelError, SystemConfiguration,
    fs::traits::FileSystem,
    sync::{SpinLock, atomic::AtomicI32},
    teletype::Console,
    thread::{JoinHandle, ThreadBuilder},
};
use kestrel_threads::sync::{ConditionVariable, Mutex};
use machine::Machine;
use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

/// The kernel of user programs.
pub struct UserKernel {
    config: SystemConfiguration,
    machine: Machine,
    frames: Arc<FrameAllocator>,
    fs: Arc<dyn FileSystem>,
    loader: Arc<dyn Loader>,
    console: Arc<Console>,
    tables: SpinLock<Vec<Arc<dyn SyscallTable>>>,
    processes: SpinLock<BTreeMap<Pid, Weak<ProcessHandle>>>,
    next_pid: AtomicI32,
    root: SpinLock<Option<Pid>>,
    live: Mutex<usize>,
    idle: ConditionVariable,
    threads: SpinLock<Vec<JoinHandle>>,
}

impl UserKernel {
    /// Boots a kernel on a fresh machine described by `config`.
    pub fn new(
        config: SystemConfiguration,
        fs: Arc<dyn FileSystem>,
        loader: Arc<dyn Loader>,
    ) -> Arc<Self> {
        config.install_logger();
        let machine = Machine::new(config.num_phys_pages);
        if let Some(interval) = config.timer_interval
            && let Err(e) = machine.timer.start(interval, machine.power.clone())
        {
            kestrel::warning!("Failed to start the timer: {e}");
        }
        let live = Mutex::new(0);
        let idle = ConditionVariable::new(&live);
        kestrel::info!(
            "Booting with {} physical pages of {} bytes.",
            config.num_phys_pages,
            machine::PAGE_SIZE
        );
        Arc::new(Self {
            frames: Arc::new(FrameAllocator::new(config.num_phys_pages)),
            config,
            machine,
            fs,
            loader,
            console: Arc::new(Console::new()),
            tables: SpinLock::new(Vec::new()),
            processes: SpinLock::new(BTreeMap::new()),
            next_pid: AtomicI32::new(0),
            root: SpinLock::new(None),
            live,
            idle,
            threads: SpinLock::new(Vec::new()),
        })
    }

    /// The configuration the kernel was booted with.
    pub fn config(&self) -> &SystemConfiguration {
        &self.config
    }

    /// The simulated machine.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// The allocator of physical frames.
    pub fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    /// The file system.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// The console backing stdin and stdout.
    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    /// Registers an additional table of system calls.
    pub fn add_syscall_table(&self, table: Arc<dyn SyscallTable>) {
        let mut guard = self.tables.lock();
        guard.push(table);
        guard.unlock();
    }

    pub(crate) fn syscall_tables(&self) -> Vec<Arc<dyn SyscallTable>> {
        let guard = self.tables.lock();
        let tables = guard.clone();
        guard.unlock();
        tables
    }

    /// Returns true if `pid` is the root process.
    pub fn is_root(&self, pid: Pid) -> bool {
        let guard = self.root.lock();
        let is_root = *guard == Some(pid);
        guard.unlock();
        is_root
    }

    /// Finds the live process `pid`.
    pub fn lookup(&self, pid: Pid) -> Option<Arc<ProcessHandle>> {
        let guard = self.processes.lock();
        let handle = guard.get(&pid).and_then(Weak::upgrade);
        guard.unlock();
        handle
    }

    /// Number of processes that have started and not exited yet.
    pub fn live_processes(&self) -> usize {
        let guard = self.live.lock();
        let live = *guard;
        guard.unlock();
        live
    }

    /// Blocks until no process is live.
    pub fn wait_idle(&self) {
        let guard = self.idle.wait_while(self.live.lock(), |live| *live > 0);
        guard.unlock();
    }

    /// Starts `name` as the root process and waits for it to exit.
    ///
    /// Returns the exit status of the root process. A fatal error in the
    /// root process, or in a child it joins, is propagated to the caller as
    /// a panic.
    pub fn run<S: AsRef<str>>(self: &Arc<Self>, name: &str, args: &[S]) -> Result<i32, KernelError> {
        let (handle, thread) = self.start(name, args, None)?;
        kestrel::info!("Running {} as process {}.", name, handle.pid().0);
        Ok(thread.join())
    }

    /// Starts `name` as a new process and returns its handle.
    pub fn spawn<S: AsRef<str>>(
        self: &Arc<Self>,
        name: &str,
        args: &[S],
        parent: Option<Pid>,
    ) -> Result<Arc<ProcessHandle>, KernelError> {
        let (handle, thread) = self.start(name, args, parent)?;
        let mut guard = self.threads.lock();
        guard.push(thread);
        guard.unlock();
        Ok(handle)
    }

    /// Waits for the thread of every process started by [`UserKernel::spawn`]
    /// and returns their exit codes.
    pub fn join_all(&self) -> Vec<i32> {
        let mut guard = self.threads.lock();
        let threads = std::mem::take(&mut *guard);
        guard.unlock();
        threads.into_iter().map(JoinHandle::join).collect()
    }

    fn start<S: AsRef<str>>(
        self: &Arc<Self>,
        name: &str,
        args: &[S],
        parent: Option<Pid>,
    ) -> Result<(Arc<ProcessHandle>, JoinHandle), KernelError> {
        let exe = self.loader.lookup(name)?;
        let pid = Pid(self.next_pid.fetch_add(1));
        let handle = Arc::new(ProcessHandle::new(pid, parent));
        let LoadContext { aspace, regs } =
            match LoadContext::load(&exe, args, &self.machine.memory, &self.frames) {
                Ok(ctx) => ctx,
                Err(e) => {
                    handle.set_state(ProcessState::LoadFailed);
                    kestrel::warning!("Failed to load {} as process {}: {}", name, pid.0, e);
                    return Err(e);
                }
            };

        if parent.is_none() {
            let mut root = self.root.lock();
            root.get_or_insert(pid);
            root.unlock();
        }
        let mut processes = self.processes.lock();
        processes.insert(pid, Arc::downgrade(&handle));
        processes.unlock();
        let mut live = self.live.lock();
        *live += 1;
        live.unlock();
        handle.set_state(ProcessState::Running);

        let process = Process {
            pid,
            kernel: self.clone(),
            handle: handle.clone(),
            aspace,
            files: FileStruct::new(),
            children: BTreeMap::new(),
        };
        let watchdog = Watchdog {
            handle: handle.clone(),
            kernel: self.clone(),
        };
        let program = exe.program.clone();
        let thread = ThreadBuilder::new(format!("{}[{}]", name, pid.0)).spawn(move || {
            let _watchdog = watchdog;
            let mut ctx = UserContext::new(process, regs);
            let status = program(&mut ctx);
            ctx.process().exit(status)
        });
        match thread {
            Ok(thread) => Ok((handle, thread)),
            Err(e) => {
                handle.set_state(ProcessState::LoadFailed);
                self.retire(pid);
                Err(e)
            }
        }
    }

    /// Removes `pid` from the process table and the live count.
    pub(crate) fn retire(&self, pid: Pid) {
        let mut processes = self.processes.lock();
        processes.remove(&pid);
        processes.unlock();

        let mut live = self.live.lock();
        *live -= 1;
        if *live == 0 {
            self.idle.broadcast(&live);
            if self.config.halt_when_idle {
                self.machine.power.halt();
            }
        }
        live.unlock();
    }
}

/// Powers the machine off if a process dies of anything but an exit.
///
/// The dying process is retired and its parent is woken, so a parent joining
/// it dies in turn and the error reaches the root.
struct Watchdog {
    handle: Arc<ProcessHandle>,
    kernel: Arc<UserKernel>,
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if std::thread::panicking() && !matches!(self.handle.state(), ProcessState::Exited(_)) {
            kestrel::warning!(
                "Process {} died of a fatal error; halting the machine.",
                self.handle.pid().0
            );
            self.kernel.machine.power.halt();
            self.handle.fault(&self.kernel);
            self.kernel.retire(self.handle.pid());
        }
    }
}
