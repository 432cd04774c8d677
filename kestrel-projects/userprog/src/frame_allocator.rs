//! # Physical page allocator.
//!
//! Main memory is split into frames of [`PAGE_SIZE`] bytes, numbered from 0.
//! The [`FrameAllocator`] keeps the numbers of the free frames in a list and
//! hands them out to processes when their images are loaded. A frame is
//! either on the free list or mapped by exactly one valid page table entry.
//!
//! The free list is shared by every process of the kernel, so every access
//! goes through a binary [`Semaphore`]. Released frames go back to the front
//! of the list, so releasing the frame just acquired restores the list as it
//! was. There is a single allocator per
//! kernel; it is shared through an [`Arc`] with every process instead of
//! being global state.
//!
//! Running out of frames is not fatal: [`FrameAllocator::acquire_frame`]
//! reports [`KernelError::NoMemory`] and leaves the free list untouched, and
//! the loader turns the error into a failed `exec`.
//!
//! [`PAGE_SIZE`]: machine::PAGE_SIZE
//! [`Arc`]: std::sync::Arc
use kestrel::{KernelError, sync::SpinLock};
use kestrel_threads::sync::Semaphore;
use std::collections::VecDeque;

/// The allocator of physical frames.
pub struct FrameAllocator {
    // The permit serializes every access. A permit only derefs to a shared
    // reference, so the list sits in a spinlock that is never contended.
    free: Semaphore<SpinLock<VecDeque<u32>>>,
    total: usize,
}

impl FrameAllocator {
    /// Creates an allocator that owns frames `0..num_frames`.
    pub fn new(num_frames: usize) -> Self {
        Self {
            free: Semaphore::new(1, SpinLock::new((0..num_frames as u32).collect())),
            total: num_frames,
        }
    }

    /// Number of frames managed by this allocator.
    pub fn total_frames(&self) -> usize {
        self.total
    }

    /// Number of frames currently free.
    pub fn free_frames(&self) -> usize {
        let list = self.free.wait();
        let guard = list.lock();
        let len = guard.len();
        guard.unlock();
        len
    }

    /// Takes one frame off the free list.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if every frame is in use.
    pub fn acquire_frame(&self) -> Result<u32, KernelError> {
        let list = self.free.wait();
        let mut guard = list.lock();
        let frame = guard.pop_front();
        guard.unlock();
        frame.ok_or(KernelError::NoMemory)
    }

    /// Takes `n` frames off the free list, or none at all.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if fewer than `n` frames are free. The free
    ///   list is left unchanged.
    pub fn acquire_frames(&self, n: usize) -> Result<Vec<u32>, KernelError> {
        let list = self.free.wait();
        let mut guard = list.lock();
        let frames = if guard.len() >= n {
            Ok(guard.drain(..n).collect())
        } else {
            Err(KernelError::NoMemory)
        };
        guard.unlock();
        frames
    }

    /// Returns `frame` to the free list.
    pub fn release_frame(&self, frame: u32) {
        let list = self.free.wait();
        let mut guard = list.lock();
        debug_assert!(
            (frame as usize) < self.total && !guard.contains(&frame),
            "Frame {frame} is released twice."
        );
        guard.push_front(frame);
        guard.unlock();
    }
}

