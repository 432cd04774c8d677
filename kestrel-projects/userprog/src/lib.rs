//! # User programs.
//!
//! This crate runs user programs on top of the kernel core. Each program
//! executes in a **process**: a private virtual address space translated by
//! a per-process page table, a table of open files, and a kernel thread that
//! runs the program until it exits.
//!
//! User programs reach the kernel only through the **system call**
//! interface. A program stores a call number and up to four arguments in its
//! registers and raises a syscall exception; the kernel decodes the request,
//! serves it, and stores the result back into `V0`.
//!
//! ## Outline
//! - [`Physical Pages`]: a free list of frames shared by every process.
//! - [`Address Translation`]: page tables and copies between user memory and
//!   the kernel.
//! - [`Program Loading`]: building the initial address space and registers.
//! - [`System Call Infrastructure`]: extracting arguments from system call
//!   requests in a structured manner.
//! - [`File System Calls`]: file descriptors and the file system calls.
//! - [`Process Lifecycle`]: `exec`, `join`, `exit` and `halt`.
//! - [`Kernel`]: the machine, the process table and the console.
//!
//! [`Physical Pages`]: frame_allocator
//! [`Address Translation`]: mm_struct
//! [`Program Loading`]: loader
//! [`System Call Infrastructure`]: syscall
//! [`File System Calls`]: file_struct
//! [`Process Lifecycle`]: process
//! [`Kernel`]: kernel

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod file_struct;
pub mod frame_allocator;
pub mod kernel;
pub mod loader;
pub mod mm_struct;
pub mod page_table;
pub mod process;
pub mod syscall;

use num_enum::TryFromPrimitive;

pub use kernel::UserKernel;
pub use loader::{Executable, Loader, ProgramRegistry, Section};
pub use process::{Pid, Process, ProcessHandle, ProcessState, UserContext};

/// Represents system call numbers.
///
/// Each variant corresponds to a specific system call that can be invoked
/// using the system call interface. The numeric values are the values a user
/// program stores in `V0`.
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SyscallNumber {
    /// Powers off the machine.
    Halt = 0,
    /// Terminates the current process.
    Exit = 1,
    /// Starts a program as a child process.
    Exec = 2,
    /// Waits for a child process to exit.
    Join = 3,
    /// Creates a file, or opens it if it exists.
    Create = 4,
    /// Opens an existing file.
    Open = 5,
    /// Reads data from a file descriptor.
    Read = 6,
    /// Writes data to a file descriptor.
    Write = 7,
    /// Closes an open file descriptor.
    Close = 8,
    /// Removes a file.
    Unlink = 9,
}
