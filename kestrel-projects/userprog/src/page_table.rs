//! # Page table.
//!
//! A process sees its memory as a contiguous range of virtual pages starting
//! at virtual page number (vpn) 0. The [`PageTable`] translates each virtual
//! page to the physical frame backing it. It is a linear table indexed by
//! vpn: the size of the table is the size of the address space, and an
//! address whose vpn lies outside the table is never valid.
//!
//! Each [`PageTableEntry`] records the physical page number (ppn) and
//! [`PteFlags`]:
//!
//! - `VALID`: the entry maps a frame. Entries are invalid until the loader
//!   assigns a frame, and become invalid again when the process tears down
//!   its address space.
//! - `READ_ONLY`: user writes through this entry are refused.
//! - `USED`: set while the kernel is copying through the entry.
//! - `DIRTY`: written since mapped.
//!
//! A virtual address is split as `vpn = vaddr / PAGE_SIZE` and
//! `offset = vaddr % PAGE_SIZE`.
use kestrel::KernelError;
use machine::PAGE_SIZE;

bitflags::bitflags! {
    /// Flags for page table entries.
    pub struct PteFlags: u32 {
        /// The entry maps a frame.
        const VALID = 1 << 0;
        /// Writes through this entry are refused.
        const READ_ONLY = 1 << 1;
        /// The page is being accessed by the kernel.
        const USED = 1 << 2;
        /// The page has been written.
        const DIRTY = 1 << 3;
    }
}

/// A page table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Physical page number of the frame.
    pub ppn: u32,
    /// State of the entry.
    pub flags: PteFlags,
}

impl PageTableEntry {
    /// An entry that maps nothing.
    pub const INVALID: Self = Self {
        ppn: 0,
        flags: PteFlags::empty(),
    };

    /// Returns true if the entry maps a frame.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    /// Returns true if user writes through this entry are refused.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PteFlags::READ_ONLY)
    }
}

/// Errors for the page table operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PageTableMappingError {
    /// The virtual page number is outside the table.
    OutOfRange,
    /// The entry is not valid.
    NotExist,
    /// The entry already maps a frame.
    Duplicated,
}

impl From<PageTableMappingError> for KernelError {
    fn from(_: PageTableMappingError) -> Self {
        KernelError::BadAddress
    }
}

/// A linear page table.
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    /// Creates a table of `num_pages` invalid entries.
    pub fn new(num_pages: usize) -> Self {
        Self {
            entries: vec![PageTableEntry::INVALID; num_pages],
        }
    }

    /// Number of virtual pages covered by the table.
    #[inline]
    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    /// Maps `vpn` to `ppn`. `VALID` is always added to `flags`.
    pub fn map(&mut self, vpn: usize, ppn: u32, flags: PteFlags) -> Result<(), PageTableMappingError> {
        let entry = self
            .entries
            .get_mut(vpn)
            .ok_or(PageTableMappingError::OutOfRange)?;
        if entry.is_valid() {
            return Err(PageTableMappingError::Duplicated);
        }
        *entry = PageTableEntry {
            ppn,
            flags: flags | PteFlags::VALID,
        };
        Ok(())
    }

    /// Invalidates the entry of `vpn` and returns the frame it mapped.
    pub fn unmap(&mut self, vpn: usize) -> Result<u32, PageTableMappingError> {
        let entry = self.walk_mut(vpn)?;
        let ppn = entry.ppn;
        *entry = PageTableEntry::INVALID;
        Ok(ppn)
    }

    /// Finds the valid entry of `vpn`.
    pub fn walk(&self, vpn: usize) -> Result<&PageTableEntry, PageTableMappingError> {
        match self.entries.get(vpn) {
            Some(entry) if entry.is_valid() => Ok(entry),
            Some(_) => Err(PageTableMappingError::NotExist),
            None => Err(PageTableMappingError::OutOfRange),
        }
    }

    /// Finds the valid entry of `vpn` for modification.
    pub fn walk_mut(&mut self, vpn: usize) -> Result<&mut PageTableEntry, PageTableMappingError> {
        match self.entries.get_mut(vpn) {
            Some(entry) if entry.is_valid() => Ok(entry),
            Some(_) => Err(PageTableMappingError::NotExist),
            None => Err(PageTableMappingError::OutOfRange),
        }
    }

    /// Translates `vaddr` into its physical page number and page offset.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if the page is outside the table or not
    ///   valid.
    pub fn translate(&self, vaddr: u32) -> Result<(u32, usize), KernelError> {
        let vaddr = vaddr as usize;
        let entry = self.walk(vaddr / PAGE_SIZE)?;
        Ok((entry.ppn, vaddr % PAGE_SIZE))
    }

    /// Iterates over the virtual page numbers and entries of valid mappings.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_valid())
    }
}
