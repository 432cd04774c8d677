//! Task trait for interact with user process.

use machine::processor::{ExceptionCause, REG_BAD_VADDR, REG_CAUSE, Registers};

/// Represents a **task** executed by a thread.
///
/// This trait defines core functionalities required for handling event
/// triggered by user process, such as **system calls** and processor
/// exceptions.
pub trait Task {
    /// Handles a **system call** triggered by the user program.
    ///
    /// - The `registers` parameter contains the state of the CPU registers at
    ///   the time of the system call.
    /// - Implementations of this function should parse the system call
    ///   arguments, execute the corresponding operation, and store the result
    ///   back in `registers`. The program counter is advanced by
    ///   [`Task::handle_exception`], never by the handler itself.
    fn syscall(&mut self, registers: &mut Registers);

    /// Entry point of the exception boundary.
    ///
    /// Dispatches syscalls to [`Task::syscall`] and advances the program
    /// counter afterwards. Any other cause is a bug in the kernel and is
    /// fatal.
    fn handle_exception(&mut self, registers: &mut Registers) {
        match ExceptionCause::try_from(registers.read(REG_CAUSE)) {
            Ok(ExceptionCause::Syscall) => {
                self.syscall(registers);
                registers.advance_pc();
            }
            Ok(cause) => panic!(
                "Unexpected exception {:?} at pc {:#x} (bad vaddr {:#x})",
                cause,
                registers.pc(),
                registers.read(REG_BAD_VADDR)
            ),
            Err(_) => panic!("Unknown exception cause {}", registers.read(REG_CAUSE)),
        }
    }
}
