//! # Memory state of a process.
//!
//! Every process owns an [`AddressSpace`]: a [`PageTable`] together with the
//! physical memory and the [`FrameAllocator`] its frames came from. User
//! programs refer to memory by virtual address only; the kernel reaches that
//! memory through the address space whenever a system call carries a user
//! pointer.
//!
//! ## Validating user input
//!
//! The kernel must never crash because of user input. Any address a user
//! program hands to a system call may be unmapped, may point into a
//! read-only page, or may describe a buffer that runs off the end of the
//! address space. The copy routines therefore never fail: they walk the
//! buffer one page at a time and stop at the first page that cannot be
//! accessed, reporting how many bytes were actually moved.
//!
//! - [`AddressSpace::copy_in`]: user memory to a kernel buffer.
//! - [`AddressSpace::copy_out`]: kernel buffer to user memory. Read-only
//!   pages stop the copy.
//! - [`AddressSpace::read_cstring`]: a NUL-terminated string of bounded
//!   length.
//!
//! A short count is informative, not fatal; it is up to the caller whether a
//! partial transfer is an error.
//!
//! While a chunk is being copied, the entry it goes through carries
//! [`PteFlags::USED`]. Pages written by [`AddressSpace::copy_out`] are marked
//! [`PteFlags::DIRTY`].
//!
//! ## Teardown
//!
//! [`AddressSpace::teardown`] returns every mapped frame to the allocator and
//! invalidates the entries. It runs on exit and again when the address space
//! is dropped; the second run finds nothing to release.
use crate::{
    frame_allocator::FrameAllocator,
    page_table::{PageTable, PteFlags},
};
use kestrel::KernelError;
use machine::{PAGE_SIZE, PhysicalMemory};
use std::sync::Arc;

/// The virtual memory of a process.
pub struct AddressSpace {
    page_table: PageTable,
    memory: Arc<PhysicalMemory>,
    frames: Arc<FrameAllocator>,
}

impl AddressSpace {
    /// Creates an address space of `num_pages` unmapped pages.
    pub fn new(num_pages: usize, memory: Arc<PhysicalMemory>, frames: Arc<FrameAllocator>) -> Self {
        Self {
            page_table: PageTable::new(num_pages),
            memory,
            frames,
        }
    }

    /// The page table of this address space.
    #[inline]
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Number of virtual pages.
    #[inline]
    pub fn num_pages(&self) -> usize {
        self.page_table.num_pages()
    }

    /// Maps `vpn` to the frame `ppn`, which the address space now owns.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if `vpn` is outside the address space or
    ///   already mapped. The frame is not taken in that case.
    pub fn map(&mut self, vpn: usize, ppn: u32, read_only: bool) -> Result<(), KernelError> {
        let flags = if read_only {
            PteFlags::READ_ONLY
        } else {
            PteFlags::empty()
        };
        Ok(self.page_table.map(vpn, ppn, flags)?)
    }

    /// Writes `data` at `offset` of page `vpn`, ignoring `READ_ONLY`.
    ///
    /// Used by the loader to place the initial image.
    pub(crate) fn fill_page(&mut self, vpn: usize, offset: usize, data: &[u8]) -> Result<(), KernelError> {
        if offset + data.len() > PAGE_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let entry = self.page_table.walk(vpn)?;
        self.memory
            .write(entry.ppn as usize * PAGE_SIZE + offset, data);
        Ok(())
    }

    /// Translates `vaddr` into its physical page number and page offset.
    pub fn translate(&self, vaddr: u32) -> Result<(u32, usize), KernelError> {
        self.page_table.translate(vaddr)
    }

    /// Copies up to `len` bytes starting at `vaddr` out of user memory.
    ///
    /// The returned buffer is shorter than `len` if the range reaches a page
    /// that is not mapped.
    pub fn copy_in(&mut self, vaddr: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len.min(self.num_pages() * PAGE_SIZE));
        let mut chunk = [0u8; PAGE_SIZE];
        while out.len() < len {
            let Some(addr) = u32::try_from(out.len())
                .ok()
                .and_then(|done| vaddr.checked_add(done))
            else {
                break;
            };
            let vpn = addr as usize / PAGE_SIZE;
            let offset = addr as usize % PAGE_SIZE;
            let Ok(entry) = self.page_table.walk_mut(vpn) else {
                break;
            };
            let amount = (PAGE_SIZE - offset).min(len - out.len());
            entry.flags.insert(PteFlags::USED);
            self.memory
                .read(entry.ppn as usize * PAGE_SIZE + offset, &mut chunk[..amount]);
            entry.flags.remove(PteFlags::USED);
            out.extend_from_slice(&chunk[..amount]);
        }
        out
    }

    /// Copies `data` into user memory starting at `vaddr`.
    ///
    /// Returns the number of bytes copied. The copy stops at the first page
    /// that is not mapped or is read-only.
    pub fn copy_out(&mut self, vaddr: u32, data: &[u8]) -> usize {
        let mut done = 0;
        while done < data.len() {
            let Some(addr) = u32::try_from(done)
                .ok()
                .and_then(|done| vaddr.checked_add(done))
            else {
                break;
            };
            let vpn = addr as usize / PAGE_SIZE;
            let offset = addr as usize % PAGE_SIZE;
            let entry = match self.page_table.walk_mut(vpn) {
                Ok(entry) if !entry.is_read_only() => entry,
                _ => break,
            };
            let amount = (PAGE_SIZE - offset).min(data.len() - done);
            entry.flags.insert(PteFlags::USED);
            self.memory.write(
                entry.ppn as usize * PAGE_SIZE + offset,
                &data[done..done + amount],
            );
            entry.flags.remove(PteFlags::USED);
            entry.flags.insert(PteFlags::DIRTY);
            done += amount;
        }
        done
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes.
    ///
    /// Returns `None` if no terminator is found within `max_len + 1` bytes,
    /// or if the bytes are not valid UTF-8.
    pub fn read_cstring(&mut self, vaddr: u32, max_len: usize) -> Option<String> {
        let bytes = self.copy_in(vaddr, max_len + 1);
        let end = bytes.iter().position(|b| *b == 0)?;
        String::from_utf8(bytes[..end].to_vec()).ok()
    }

    /// Reads the little-endian 32-bit word at `vaddr`.
    pub fn read_word(&mut self, vaddr: u32) -> Result<i32, KernelError> {
        let bytes: [u8; 4] = self
            .copy_in(vaddr, 4)
            .try_into()
            .map_err(|_| KernelError::BadAddress)?;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Writes `value` as a little-endian 32-bit word at `vaddr`.
    ///
    /// Nothing is written unless every byte of the word lands on a writable
    /// page.
    pub fn write_word(&mut self, vaddr: u32, value: i32) -> Result<(), KernelError> {
        let last = vaddr.checked_add(3).ok_or(KernelError::BadAddress)?;
        for addr in [vaddr, last] {
            match self.page_table.walk(addr as usize / PAGE_SIZE) {
                Ok(entry) if !entry.is_read_only() => (),
                _ => return Err(KernelError::BadAddress),
            }
        }
        let written = self.copy_out(vaddr, &value.to_le_bytes());
        debug_assert_eq!(written, 4);
        Ok(())
    }

    /// Releases every mapped frame and invalidates its entry.
    pub fn teardown(&mut self) {
        let vpns: Vec<usize> = self.page_table.iter().map(|(vpn, _)| vpn).collect();
        for vpn in vpns {
            if let Ok(ppn) = self.page_table.unmap(vpn) {
                self.frames.release_frame(ppn);
            }
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.teardown();
    }
}
