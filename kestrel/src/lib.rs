//! # Kestrel: an educational kernel core
//!
//! Kestrel is a small kernel that runs atop a simulated machine (see the
//! `machine` crate). It is organized in layers, each of which only relies on
//! the layers below it:
//!
//! 1. **Execution contexts** ([`thread`]): kernel threads that can be parked
//!    on a wait list and later resumed through a [`thread::ParkHandle`].
//! 2. **Synchronization** (`kestrel-threads`): sleeping locks, monitors,
//!    semaphores, a timer wakeup queue, and a rendezvous channel, all derived
//!    from interrupt masking and explicit wait queues.
//! 3. **User programs** (`kestrel-userprog`): physical page allocation,
//!    per-process address translation, syscall dispatch, and the process
//!    lifecycle.
//!
//! This crate hosts the first layer together with the collaborators every
//! layer shares: the [`KernelError`] type, the [`SystemConfiguration`], the
//! file system interface ([`fs`]), and the console ([`teletype`]).
//!
//! ## Execution model
//!
//! Each kernel thread runs on a host thread. The machine models a single
//! processor: only one context may run with interrupts disabled at a time,
//! and [`interrupt::InterruptGuard`] is the primitive that makes a short
//! sequence atomic with respect to the timer tick and other contexts.
//! A context suspends itself with [`thread::Current::park_with`], which runs
//! a closure that publishes a [`thread::ParkHandle`] (typically by pushing it
//! onto a wait queue) and then sleeps until someone calls
//! [`thread::ParkHandle::unpark`].
//!
//! ## Error handling
//!
//! Fallible kernel operations return `Result<_, KernelError>`. Violations of
//! kernel invariants (for example acting on a monitor without holding its
//! lock) are bugs in the kernel itself and `panic!`.
pub use machine::{debug, info, print, println, warning};

pub mod fs;
pub mod interrupt;
pub mod sync;
pub mod task;
pub mod teletype;
pub mod thread;

use std::time::Duration;

/// Represents errors that can occur in the kernel.
///
/// Each variant corresponds to a specific error condition, and the value in
/// parentheses is the errno code the variant is reported as by
/// [`KernelError::into_usize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// IO Error. (EIO)
    IOError,
    /// Exec format error. (ENOEXEC)
    NoExec,
    /// BAD file descriptor. (EBADF)
    BadFileDescriptor,
    /// No child process. (ECHILD)
    NoChild,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// File exists. (EEXIST)
    FileExist,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// Argument list too long. (E2BIG)
    ArgumentListTooLong,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::ArgumentListTooLong => -7,
            KernelError::NoExec => -8,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoChild => -10,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::Busy => -16,
            KernelError::FileExist => -17,
            KernelError::InvalidArgument => -22,
            KernelError::TooManyOpenFile => -24,
            KernelError::NameTooLong => -36,
            KernelError::NoSuchSyscall => -38,
            KernelError::NotSupportedOperation => -524,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -5 => Ok(Self::IOError),
            -7 => Ok(Self::ArgumentListTooLong),
            -8 => Ok(Self::NoExec),
            -9 => Ok(Self::BadFileDescriptor),
            -10 => Ok(Self::NoChild),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -16 => Ok(Self::Busy),
            -17 => Ok(Self::FileExist),
            -22 => Ok(Self::InvalidArgument),
            -24 => Ok(Self::TooManyOpenFile),
            -36 => Ok(Self::NameTooLong),
            -38 => Ok(Self::NoSuchSyscall),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { e }),
        }
    }
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, self.into_usize() as isize)
    }
}

impl std::error::Error for KernelError {}

/// Runtime configuration of a kernel instance.
///
/// Built with [`SystemConfiguration::builder`] or parsed from a kernel
/// command line with [`SystemConfiguration::from_cmdline`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemConfiguration {
    /// Number of physical frames of the machine.
    pub num_phys_pages: usize,
    /// Period of the background timer. `None` means ticks are only produced
    /// explicitly.
    pub timer_interval: Option<Duration>,
    /// Longest string a syscall accepts, excluding the terminator.
    pub max_string_length: usize,
    /// Power off once the last user process exits.
    pub halt_when_idle: bool,
    /// Suppress leveled log output.
    pub quiet: bool,
    /// Render debug-level log output.
    pub debug: bool,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            num_phys_pages: 64,
            timer_interval: None,
            max_string_length: 256,
            halt_when_idle: false,
            quiet: false,
            debug: false,
        }
    }
}

impl SystemConfiguration {
    /// Starts a builder from the default configuration.
    pub fn builder() -> SystemConfigurationBuilder {
        SystemConfigurationBuilder {
            conf: Self::default(),
        }
    }

    /// Parses a kernel command line.
    ///
    /// Recognized flags:
    /// - `-p <pages>`: number of physical pages
    /// - `-t <usec>`: background timer period in microseconds; 0 keeps the
    ///   ticks manual
    /// - `-s <len>`: maximum syscall string length
    /// - `-i`: halt when idle
    /// - `-q`: quiet
    /// - `-d`: debug output
    pub fn from_cmdline(cmdline: &str) -> Result<Self, KernelError> {
        fn number(arg: Option<&str>) -> Result<usize, KernelError> {
            arg.and_then(|s| s.parse().ok())
                .ok_or(KernelError::InvalidArgument)
        }

        let mut builder = Self::builder();
        let mut args = cmdline.split_whitespace();
        while let Some(flag) = args.next() {
            builder = match flag {
                "-p" => builder.num_phys_pages(number(args.next())?),
                "-t" => match number(args.next())? {
                    0 => builder,
                    usec => builder.timer_interval(Duration::from_micros(usec as u64)),
                },
                "-s" => builder.max_string_length(number(args.next())?),
                "-i" => builder.halt_when_idle(true),
                "-q" => builder.quiet(true),
                "-d" => builder.debug(true),
                _ => {
                    warning!("Unknown kernel command line option: {flag}");
                    return Err(KernelError::InvalidArgument);
                }
            };
        }
        Ok(builder.build())
    }

    /// Applies the logging part of the configuration to the kernel logger.
    pub fn install_logger(&self) {
        machine::QUITE.store(self.quiet, std::sync::atomic::Ordering::SeqCst);
        machine::kprint::init_logger(if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }
}

/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring a kernel instance before it boots.
pub struct SystemConfigurationBuilder {
    conf: SystemConfiguration,
}

impl SystemConfigurationBuilder {
    /// Sets the number of physical pages.
    pub fn num_phys_pages(mut self, pages: usize) -> Self {
        self.conf.num_phys_pages = pages;
        self
    }

    /// Starts a background timer with the given period.
    pub fn timer_interval(mut self, interval: Duration) -> Self {
        self.conf.timer_interval = Some(interval);
        self
    }

    /// Sets the longest string a syscall accepts.
    pub fn max_string_length(mut self, len: usize) -> Self {
        self.conf.max_string_length = len;
        self
    }

    /// Power off once the last user process exits.
    pub fn halt_when_idle(mut self, halt: bool) -> Self {
        self.conf.halt_when_idle = halt;
        self
    }

    /// Suppress leveled log output.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.conf.quiet = quiet;
        self
    }

    /// Render debug-level log output.
    pub fn debug(mut self, debug: bool) -> Self {
        self.conf.debug = debug;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> SystemConfiguration {
        self.conf
    }
}
