//! # System call ABI.
//!
//! A user program requests a kernel service by raising a syscall exception.
//! The exception boundary hands the register file to [`Task::syscall`]:
//!
//! 1. The **system call number** is passed in `V0`.
//! 2. Up to four **arguments** are passed in `A0`, `A1`, `A2` and `A3`.
//! 3. The **return value** is stored to `V0`.
//!
//! The program counter is advanced past the syscall instruction by
//! [`Task::handle_exception`] once the handler returns, never by the handler
//! itself.
//!
//! ## Error handling via `Result` type
//!
//! Errors incurred by user input **must not** stop the kernel. Every handler
//! returns `Result<i32, KernelError>` and propagates failures with `?`;
//! [`SyscallAbi::set_return_value`] converts any `Err` into `-1` for the
//! user program. Panics are reserved for bugs in the kernel itself.
//!
//! ## Extension tables
//!
//! The base system calls are dispatched by [`SyscallNumber`]. A kernel may
//! add more services by registering a [`SyscallTable`]; tables are consulted
//! in registration order for numbers outside the base set, before the
//! unknown-syscall fatal default.
//!
//! [`Task::syscall`]: kestrel::task::Task::syscall
//! [`Task::handle_exception`]: kestrel::task::Task::handle_exception
//! [`SyscallNumber`]: crate::SyscallNumber
use crate::process::Process;
use kestrel::KernelError;
use machine::processor::{REG_A0, REG_A1, REG_A2, REG_A3, REG_V0, Registers};

/// A struct representing the system call ABI.
///
/// It holds the system call number and the four arguments of a system call,
/// together with the register file the return value is written to.
pub struct SyscallAbi<'a> {
    /// The system call number that identifies the requested system service.
    pub sysno: i32,
    /// First argument for the system call.
    pub arg1: i32,
    /// Second argument for the system call.
    pub arg2: i32,
    /// Third argument for the system call.
    pub arg3: i32,
    /// Fourth argument for the system call.
    pub arg4: i32,
    /// The register file of the calling program.
    pub regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// Extracts the system call number and arguments from `regs`.
    pub fn from_registers(regs: &'a mut Registers) -> Self {
        Self {
            sysno: regs.read(REG_V0),
            arg1: regs.read(REG_A0),
            arg2: regs.read(REG_A1),
            arg3: regs.read(REG_A2),
            arg4: regs.read(REG_A3),
            regs,
        }
    }

    /// Sets the return value for the system call.
    ///
    /// `Ok(value)` is stored to `V0` as is; any error is stored as `-1`.
    pub fn set_return_value(self, return_val: Result<i32, KernelError>) {
        let value = match return_val {
            Ok(value) => value,
            Err(e) => {
                kestrel::debug!("System call {} failed: {}", self.sysno, e);
                -1
            }
        };
        self.regs.write(REG_V0, value);
    }
}

/// A table of additional system calls.
pub trait SyscallTable
where
    Self: Send + Sync,
{
    /// Handles the system call described by `abi` on behalf of `process`.
    ///
    /// # Returns
    /// - `Some(result)`: the table serves this system call number.
    /// - `None`: the number is unknown to this table.
    fn handle(&self, process: &mut Process, abi: &SyscallAbi) -> Option<Result<i32, KernelError>>;
}
