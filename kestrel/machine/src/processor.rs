//! The user-mode register file and exception causes.
//!
//! The simulated processor follows a MIPS-like convention: the syscall
//! number travels in `V0`, up to four arguments in `A0..A3`, and the result
//! is written back to `V0`.
use num_enum::TryFromPrimitive;

/// Number of user registers.
pub const NUM_USER_REGISTERS: usize = 38;

/// Function result / syscall number.
pub const REG_V0: usize = 2;
/// Second function result.
pub const REG_V1: usize = 3;
/// First argument.
pub const REG_A0: usize = 4;
/// Second argument.
pub const REG_A1: usize = 5;
/// Third argument.
pub const REG_A2: usize = 6;
/// Fourth argument.
pub const REG_A3: usize = 7;
/// Stack pointer.
pub const REG_SP: usize = 29;
/// Return address.
pub const REG_RA: usize = 31;
/// Program counter.
pub const REG_PC: usize = 34;
/// Next program counter.
pub const REG_NEXT_PC: usize = 35;
/// Exception cause.
pub const REG_CAUSE: usize = 36;
/// Faulting virtual address.
pub const REG_BAD_VADDR: usize = 37;

/// Size of one instruction in bytes.
pub const INSTRUCTION_SIZE: i32 = 4;

/// Cause of a processor exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum ExceptionCause {
    /// A syscall instruction.
    Syscall = 0,
    /// No valid translation found.
    PageFault = 1,
    /// TLB miss.
    TlbMiss = 2,
    /// Write to a read-only page.
    ReadOnly = 3,
    /// Physical address out of range.
    BusError = 4,
    /// Misaligned or negative virtual address.
    AddressError = 5,
    /// Integer overflow.
    Overflow = 6,
    /// Undecodable instruction.
    IllegalInstruction = 7,
}

/// The register file of one user context.
#[derive(Clone, Debug)]
pub struct Registers {
    regs: [i32; NUM_USER_REGISTERS],
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Zeroed registers with `NEXT_PC` one instruction past `PC`.
    pub fn new() -> Self {
        let mut regs = [0; NUM_USER_REGISTERS];
        regs[REG_NEXT_PC] = INSTRUCTION_SIZE;
        Self { regs }
    }

    /// Reads register `idx`.
    #[inline]
    pub fn read(&self, idx: usize) -> i32 {
        self.regs[idx]
    }

    /// Writes `value` to register `idx`.
    #[inline]
    pub fn write(&mut self, idx: usize, value: i32) {
        self.regs[idx] = value;
    }

    /// Current program counter.
    pub fn pc(&self) -> i32 {
        self.regs[REG_PC]
    }

    /// Sets the program counter, keeping `NEXT_PC` one instruction ahead.
    pub fn set_pc(&mut self, pc: i32) {
        self.regs[REG_PC] = pc;
        self.regs[REG_NEXT_PC] = pc.wrapping_add(INSTRUCTION_SIZE);
    }

    /// Moves past the current instruction.
    pub fn advance_pc(&mut self) {
        self.regs[REG_PC] = self.regs[REG_NEXT_PC];
        self.regs[REG_NEXT_PC] = self.regs[REG_NEXT_PC].wrapping_add(INSTRUCTION_SIZE);
    }

    /// Records an exception of `cause`, with `bad_vaddr` for memory faults.
    pub fn raise(&mut self, cause: ExceptionCause, bad_vaddr: Option<u32>) {
        self.regs[REG_CAUSE] = cause as i32;
        if let Some(vaddr) = bad_vaddr {
            self.regs[REG_BAD_VADDR] = vaddr as i32;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advance_pc() {
        let mut regs = Registers::new();
        regs.set_pc(0x100);
        regs.advance_pc();
        assert_eq!(regs.pc(), 0x104);
        assert_eq!(regs.read(REG_NEXT_PC), 0x108);
    }

    #[test]
    fn cause_roundtrip() {
        let mut regs = Registers::new();
        regs.raise(ExceptionCause::AddressError, Some(0xdead));
        assert!(matches!(
            ExceptionCause::try_from(regs.read(REG_CAUSE)),
            Ok(ExceptionCause::AddressError)
        ));
        assert_eq!(regs.read(REG_BAD_VADDR), 0xdead);
        assert!(ExceptionCause::try_from(42).is_err());
    }
}
