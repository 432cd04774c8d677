//! Byte-addressable physical memory.
use crate::{PAGE_SIZE, spinlock::SpinLock};

/// The main memory of the machine, `num_pages` frames of [`PAGE_SIZE`]
/// bytes each.
///
/// Physical addresses are produced by the kernel itself, so an access past
/// the end of memory is a kernel bug and panics.
pub struct PhysicalMemory {
    bytes: SpinLock<Box<[u8]>>,
    num_pages: usize,
}

impl PhysicalMemory {
    /// Creates zero-filled memory of `num_pages` frames.
    pub fn new(num_pages: usize) -> Self {
        Self {
            bytes: SpinLock::new(vec![0; num_pages * PAGE_SIZE].into_boxed_slice()),
            num_pages,
        }
    }

    /// Number of physical frames.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Size of memory in bytes.
    pub fn size(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    fn check(&self, paddr: usize, len: usize) {
        assert!(
            paddr.checked_add(len).is_some_and(|end| end <= self.size()),
            "physical access {paddr:#x}+{len:#x} out of range"
        );
    }

    /// Copies `buf.len()` bytes starting at `paddr` into `buf`.
    pub fn read(&self, paddr: usize, buf: &mut [u8]) {
        self.check(paddr, buf.len());
        let guard = self.bytes.lock();
        buf.copy_from_slice(&guard[paddr..paddr + buf.len()]);
        guard.unlock();
    }

    /// Copies `data` into memory starting at `paddr`.
    pub fn write(&self, paddr: usize, data: &[u8]) {
        self.check(paddr, data.len());
        let mut guard = self.bytes.lock();
        guard[paddr..paddr + data.len()].copy_from_slice(data);
        guard.unlock();
    }

    /// Fills frame `ppn` with zeros.
    pub fn zero_frame(&self, ppn: usize) {
        self.check(ppn * PAGE_SIZE, PAGE_SIZE);
        let mut guard = self.bytes.lock();
        guard[ppn * PAGE_SIZE..(ppn + 1) * PAGE_SIZE].fill(0);
        guard.unlock();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_back() {
        let mem = PhysicalMemory::new(2);
        mem.write(PAGE_SIZE - 2, b"abcd");
        let mut buf = [0; 4];
        mem.read(PAGE_SIZE - 2, &mut buf);
        assert_eq!(&buf, b"abcd");
        mem.zero_frame(1);
        mem.read(PAGE_SIZE - 2, &mut buf);
        assert_eq!(&buf, b"ab\0\0");
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        let mem = PhysicalMemory::new(1);
        mem.write(PAGE_SIZE - 1, b"xy");
    }
}
