//! [`StackBuilder`], a utility for laying out data on a user stack.
use crate::mm_struct::AddressSpace;
use kestrel::KernelError;

/// A utility for pushing data onto a user-space stack.
///
/// The stack grows downward from the initial stack pointer. Every push
/// lowers the stack pointer by the size of the value and stores the value at
/// the new top of the stack, through the translation of the address space.
/// A push that would leave the writable part of the address space fails with
/// [`KernelError::BadAddress`].
pub struct StackBuilder<'a> {
    sp: u32,
    aspace: &'a mut AddressSpace,
}

impl<'a> StackBuilder<'a> {
    /// Creates a new [`StackBuilder`] whose top of stack is `sp`.
    pub fn new(aspace: &'a mut AddressSpace, sp: u32) -> Self {
        Self { sp, aspace }
    }

    /// Consume the [`StackBuilder`] and return the stack pointer.
    pub fn finish(self) -> u32 {
        self.sp
    }

    /// Returns the current stack pointer.
    #[inline]
    pub fn sp(&self) -> u32 {
        self.sp
    }

    /// Aligns the stack pointer downward to `align` bytes.
    #[inline]
    pub fn align(&mut self, align: u32) {
        self.sp -= self.sp % align;
    }

    /// Pushes a byte array onto the stack.
    ///
    /// # Returns
    /// - The updated stack pointer, which is the address of the first byte.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<u32, KernelError> {
        let len = u32::try_from(bytes.len()).map_err(|_| KernelError::BadAddress)?;
        let sp = self.sp.checked_sub(len).ok_or(KernelError::BadAddress)?;
        if self.aspace.copy_out(sp, bytes) != bytes.len() {
            return Err(KernelError::BadAddress);
        }
        self.sp = sp;
        Ok(sp)
    }

    /// Pushes a 32-bit word onto the stack.
    pub fn push_word(&mut self, v: i32) -> Result<u32, KernelError> {
        self.push_bytes(&v.to_le_bytes())
    }

    /// Pushes a string onto the stack as a NUL-terminated string and returns
    /// its address.
    #[inline]
    pub fn push_str(&mut self, s: &str) -> Result<u32, KernelError> {
        self.push_bytes(&[0])?;
        self.push_bytes(s.as_bytes())
    }
}
