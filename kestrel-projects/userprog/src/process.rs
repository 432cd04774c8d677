//! # Process lifecycle.
//!
//! A process is an instance of a program being executed. It is split in two
//! parts:
//!
//! - [`Process`]: the state only the process's own context touches: its
//!   [`AddressSpace`], its [`FileStruct`] and the map of its children. It is
//!   owned by the kernel thread that runs the program and needs no lock.
//! - [`ProcessHandle`]: the state shared with other processes: the pid, the
//!   link to the parent, the [`ProcessState`], and the status lock and join
//!   condition. A parent keeps a strong reference to the handle of every
//!   child it has not joined yet; the kernel's process table keeps a weak
//!   one.
//!
//! ## State machine
//!
//! ```text
//! Loading ──> Running ──> Exited(status)
//!    │           │
//!    │           └──> Faulted
//!    └──> LoadFailed
//! ```
//!
//! A process that fails to load never runs and is never registered as
//! anyone's child. A process that dies of a fatal error halts the machine
//! and becomes `Faulted`; a parent joining it dies of the same error.
//!
//! ## Exit
//!
//! [`Process::exit`] never returns. In order, it
//!
//! 1. releases every frame of the address space,
//! 2. closes every descriptor from 2 upwards,
//! 3. records the exit status under its own status lock,
//! 4. while holding its parent link, takes the **parent's** status lock and
//!    broadcasts the parent's join condition,
//! 5. severs the parent link of every child it has not joined (they become
//!    orphans and keep running),
//! 6. leaves the process table.
//!
//! No process ever holds the status locks of two processes at once, so exit
//! and join cannot deadlock.
//!
//! ## Join
//!
//! A parent waits for a child on its **own** join condition. Every exiting
//! child wakes all of its parent's waiters, so a joiner re-checks the status
//! of the child it is interested in after every wakeup.
//!
//! | No. | Call                       | Result                                   |
//! | --- | -------------------------- | ---------------------------------------- |
//! | 0   | `halt()`                   | powers off if called by the root process |
//! | 1   | `exit(status)`             | does not return                          |
//! | 2   | `exec(path, argc, argv)`   | pid of the child                         |
//! | 3   | `join(pid, status_addr)`   | 1 if the child exited with 0, else 0     |
use crate::{
    SyscallNumber,
    file_struct::FileStruct,
    kernel::UserKernel,
    loader::{MAX_ARGS, stack_builder::StackBuilder},
    mm_struct::AddressSpace,
    syscall::SyscallAbi,
};
use arrayvec::ArrayVec;
use kestrel::{KernelError, sync::SpinLock, task::Task, thread::Current};
use kestrel_threads::sync::{ConditionVariable, Mutex};
use machine::processor::{
    ExceptionCause, REG_A0, REG_A1, REG_A2, REG_A3, REG_SP, REG_V0, Registers,
};
use std::{collections::BTreeMap, sync::Arc};

/// A process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

/// A possible state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The image is being loaded.
    Loading,
    /// The program is running.
    Running,
    /// The program exited with the status.
    Exited(i32),
    /// The image could not be loaded. The process never ran.
    LoadFailed,
    /// The program died of a fatal error.
    Faulted,
}

/// The part of a process shared with its parent and the kernel.
pub struct ProcessHandle {
    pid: Pid,
    parent: Mutex<Option<Pid>>,
    state: SpinLock<ProcessState>,
    status_lock: Mutex<()>,
    join_cond: ConditionVariable,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid, parent: Option<Pid>) -> Self {
        let status_lock = Mutex::new(());
        let join_cond = ConditionVariable::new(&status_lock);
        Self {
            pid,
            parent: Mutex::new(parent),
            state: SpinLock::new(ProcessState::Loading),
            status_lock,
            join_cond,
        }
    }

    /// The pid of the process.
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The parent of the process, if it is still alive.
    pub fn parent(&self) -> Option<Pid> {
        let guard = self.parent.lock();
        let parent = *guard;
        guard.unlock();
        parent
    }

    /// Current state of the process.
    pub fn state(&self) -> ProcessState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    /// Wakes every joiner of the parent, if the parent is still alive.
    pub(crate) fn wake_parent(&self, kernel: &UserKernel) {
        let link = self.parent.lock();
        if let Some(parent) = (*link).and_then(|pid| kernel.lookup(pid)) {
            let guard = parent.status_lock.lock();
            parent.join_cond.broadcast(&guard);
            guard.unlock();
        }
        link.unlock();
    }

    /// Marks the process as dead of a fatal error and wakes the parent.
    pub(crate) fn fault(&self, kernel: &UserKernel) {
        let guard = self.status_lock.lock();
        self.set_state(ProcessState::Faulted);
        guard.unlock();
        self.wake_parent(kernel);
    }

    /// The exit status, once the process has exited.
    pub fn exit_status(&self) -> Option<i32> {
        match self.state() {
            ProcessState::Exited(status) => Some(status),
            _ => None,
        }
    }
}

/// The part of a process owned by its own context.
pub struct Process {
    /// The pid of the process.
    pub pid: Pid,
    pub(crate) kernel: Arc<UserKernel>,
    /// The shared part of the process.
    pub handle: Arc<ProcessHandle>,
    /// Virtual memory of the process.
    pub aspace: AddressSpace,
    /// Descriptor table of the process.
    pub files: FileStruct,
    /// Children that have not been joined yet.
    pub children: BTreeMap<Pid, Arc<ProcessHandle>>,
}

impl Process {
    /// The kernel this process runs on.
    pub fn kernel(&self) -> &Arc<UserKernel> {
        &self.kernel
    }

    /// Powers off the machine.
    ///
    /// # Syscall API
    /// ```c
    /// void halt(void);
    /// ```
    ///
    /// Only the root process may halt the machine; it exits with status 0
    /// right after. Any other caller gets 0 back and nothing happens.
    pub fn halt(&mut self) -> Result<i32, KernelError> {
        if !self.kernel.is_root(self.pid) {
            kestrel::debug!("halt() from non-root process {} ignored.", self.pid.0);
            return Ok(0);
        }
        self.kernel.machine().power.halt();
        self.exit(0)
    }

    /// Terminates the process with `status`.
    ///
    /// # Syscall API
    /// ```c
    /// void exit(int status);
    /// ```
    pub fn exit(&mut self, status: i32) -> ! {
        self.aspace.teardown();
        self.files.close_all();

        let guard = self.handle.status_lock.lock();
        self.handle.set_state(ProcessState::Exited(status));
        guard.unlock();

        self.handle.wake_parent(&self.kernel);

        for child in std::mem::take(&mut self.children).into_values() {
            let mut link = child.parent.lock();
            *link = None;
            link.unlock();
        }

        kestrel::debug!("Process {} exited with {}.", self.pid.0, status);
        self.kernel.retire(self.pid);
        Current::exit(status)
    }

    /// Starts the program `path` as a child of this process.
    ///
    /// # Syscall API
    /// ```c
    /// int exec(const char *path, int argc, char **argv);
    /// ```
    ///
    /// `argv` holds `argc` pointers to NUL-terminated strings. Returns the
    /// pid of the child.
    pub fn exec(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        let max_len = self.kernel.config().max_string_length;
        let name = self
            .aspace
            .read_cstring(abi.arg1 as u32, max_len)
            .ok_or(KernelError::BadAddress)?;
        let argc = usize::try_from(abi.arg2).map_err(|_| KernelError::InvalidArgument)?;
        if argc > MAX_ARGS {
            return Err(KernelError::ArgumentListTooLong);
        }

        let mut args = ArrayVec::<String, MAX_ARGS>::new();
        for i in 0..argc {
            let slot = (abi.arg3 as u32)
                .checked_add(4 * i as u32)
                .ok_or(KernelError::BadAddress)?;
            let ptr = self.aspace.read_word(slot)?;
            let arg = self
                .aspace
                .read_cstring(ptr as u32, max_len)
                .ok_or(KernelError::BadAddress)?;
            args.push(arg);
        }

        let child = self.kernel.spawn(&name, args.as_slice(), Some(self.pid))?;
        self.children.insert(child.pid(), child.clone());
        Ok(child.pid().0)
    }

    /// Waits for the child `pid` to exit.
    ///
    /// # Syscall API
    /// ```c
    /// int join(int pid, int *status);
    /// ```
    ///
    /// Writes the exit status of the child to `status` and forgets the child.
    /// Returns 1 if the child exited with 0, and 0 otherwise.
    ///
    /// # Errors
    /// - [`KernelError::NoChild`] if `pid` is not a child of this process or
    ///   was already joined.
    ///
    /// # Panics
    /// If the child died of a fatal error.
    pub fn join(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        let pid = Pid(abi.arg1);
        let child = self
            .children
            .get(&pid)
            .cloned()
            .ok_or(KernelError::NoChild)?;

        let mut guard = self.handle.status_lock.lock();
        let status = loop {
            match child.state() {
                ProcessState::Exited(status) => break status,
                ProcessState::Faulted => {
                    guard.unlock();
                    panic!("Child process {} died of a fatal error.", pid.0);
                }
                _ => guard = self.handle.join_cond.wait(guard),
            }
        };
        guard.unlock();

        self.children.remove(&pid);
        if let Err(e) = self.aspace.write_word(abi.arg2 as u32, status) {
            kestrel::debug!("join({}): status not written: {}", pid.0, e);
        }
        Ok(if status == 0 { 1 } else { 0 })
    }
}

impl Task for Process {
    /// Handles a system call request from the user program.
    ///
    /// The system call number is matched against [`SyscallNumber`]. Numbers
    /// outside the base set are offered to the registered
    /// [`SyscallTable`]s; a number nobody serves is a fatal error.
    ///
    /// [`SyscallTable`]: crate::syscall::SyscallTable
    fn syscall(&mut self, regs: &mut Registers) {
        let abi = SyscallAbi::from_registers(regs);
        let return_val = match SyscallNumber::try_from(abi.sysno) {
            Ok(no) => match no {
                SyscallNumber::Halt => self.halt(),
                SyscallNumber::Exit => self.exit(abi.arg1),
                SyscallNumber::Exec => self.exec(&abi),
                SyscallNumber::Join => self.join(&abi),
                SyscallNumber::Create => self.create(&abi),
                SyscallNumber::Open => self.open(&abi),
                SyscallNumber::Read => self.read(&abi),
                SyscallNumber::Write => self.write(&abi),
                SyscallNumber::Close => self.close(&abi),
                SyscallNumber::Unlink => self.unlink(&abi),
            },
            Err(_) => {
                let tables = self.kernel.syscall_tables();
                match tables.iter().find_map(|table| table.handle(self, &abi)) {
                    Some(return_val) => return_val,
                    None => panic!(
                        "Unknown system call {} from process {} at pc {:#x}",
                        abi.sysno,
                        self.pid.0,
                        abi.regs.pc()
                    ),
                }
            }
        };
        abi.set_return_value(return_val);
    }
}

/// The execution context of a user program.
///
/// The program closure of an executable receives a [`UserContext`]. It is
/// the only way for the program to reach the kernel: system calls, loads and
/// stores through the process's address translation, and its stack.
///
/// A load or store to an address without a valid translation raises an
/// address-error exception, and a store to a read-only page raises a
/// read-only exception. Neither is a syscall, so both are fatal.
pub struct UserContext {
    process: Process,
    regs: Registers,
    argc: i32,
    argv: u32,
}

impl UserContext {
    pub(crate) fn new(process: Process, regs: Registers) -> Self {
        let argc = regs.read(REG_A0);
        let argv = regs.read(REG_A1) as u32;
        Self {
            process,
            regs,
            argc,
            argv,
        }
    }

    /// The pid of the running process.
    pub fn pid(&self) -> Pid {
        self.process.pid
    }

    /// The process this context runs.
    pub fn process(&mut self) -> &mut Process {
        &mut self.process
    }

    /// The register file.
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Number of arguments the program was started with.
    pub fn argc(&self) -> i32 {
        self.argc
    }

    /// Address of the argument vector.
    pub fn argv(&self) -> u32 {
        self.argv
    }

    /// Reads the arguments the program was started with.
    pub fn args(&mut self) -> Vec<String> {
        let max_len = self.process.kernel.config().max_string_length;
        (0..self.argc as u32)
            .map(|i| {
                let ptr = self.load_word(self.argv.wrapping_add(4 * i));
                self.process
                    .aspace
                    .read_cstring(ptr as u32, max_len)
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Invokes system call `op` with the given arguments and returns `V0`.
    pub fn syscall(&mut self, op: i32, a0: i32, a1: i32, a2: i32, a3: i32) -> i32 {
        self.regs.write(REG_V0, op);
        self.regs.write(REG_A0, a0);
        self.regs.write(REG_A1, a1);
        self.regs.write(REG_A2, a2);
        self.regs.write(REG_A3, a3);
        self.regs.raise(ExceptionCause::Syscall, None);
        self.process.handle_exception(&mut self.regs);
        self.regs.read(REG_V0)
    }

    fn fault(&mut self, vaddr: u32) -> ! {
        let cause = if self.process.aspace.translate(vaddr).is_ok() {
            ExceptionCause::ReadOnly
        } else {
            ExceptionCause::AddressError
        };
        self.regs.raise(cause, Some(vaddr));
        self.process.handle_exception(&mut self.regs);
        unreachable!("Exception {:?} returned to the user program.", cause)
    }

    /// Loads the 32-bit word at `vaddr`.
    pub fn load_word(&mut self, vaddr: u32) -> i32 {
        match self.process.aspace.read_word(vaddr) {
            Ok(v) => v,
            Err(_) => self.fault(vaddr),
        }
    }

    /// Stores the 32-bit word `value` at `vaddr`.
    pub fn store_word(&mut self, vaddr: u32, value: i32) {
        if self.process.aspace.write_word(vaddr, value).is_err() {
            self.fault(vaddr)
        }
    }

    /// Loads the byte at `vaddr`.
    pub fn load_byte(&mut self, vaddr: u32) -> u8 {
        match self.process.aspace.copy_in(vaddr, 1).first() {
            Some(b) => *b,
            None => self.fault(vaddr),
        }
    }

    /// Stores the byte `value` at `vaddr`.
    pub fn store_byte(&mut self, vaddr: u32, value: u8) {
        if self.process.aspace.copy_out(vaddr, &[value]) != 1 {
            self.fault(vaddr)
        }
    }

    /// Current stack pointer.
    pub fn sp(&self) -> u32 {
        self.regs.read(REG_SP) as u32
    }

    fn with_stack<R>(&mut self, f: impl FnOnce(&mut StackBuilder) -> Result<R, KernelError>) -> R {
        let sp = self.sp();
        let mut builder = StackBuilder::new(&mut self.process.aspace, sp);
        match f(&mut builder) {
            Ok(r) => {
                let sp = builder.finish();
                self.regs.write(REG_SP, sp as i32);
                r
            }
            Err(_) => {
                let sp = builder.sp();
                self.fault(sp.wrapping_sub(1))
            }
        }
    }

    /// Pushes `bytes` onto the stack and returns their address.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> u32 {
        self.with_stack(|stack| stack.push_bytes(bytes))
    }

    /// Pushes a NUL-terminated copy of `s` onto the stack and returns its
    /// address.
    pub fn push_str(&mut self, s: &str) -> u32 {
        self.with_stack(|stack| stack.push_str(s))
    }

    /// Pushes `args` and a pointer array referring to them onto the stack.
    ///
    /// Returns the address of the pointer array, ready to be passed to
    /// `exec` together with `args.len()`.
    pub fn push_argv(&mut self, args: &[&str]) -> u32 {
        self.with_stack(|stack| {
            let mut pointers = ArrayVec::<u32, MAX_ARGS>::new();
            for arg in args {
                let ptr = stack.push_str(arg)?;
                pointers
                    .try_push(ptr)
                    .map_err(|_| KernelError::ArgumentListTooLong)?;
            }
            stack.align(4);
            for ptr in pointers.iter().rev() {
                stack.push_word(*ptr as i32)?;
            }
            Ok(stack.sp())
        })
    }
}
