//! ## Program loading.
//!
//! Executables are not parsed by the kernel. A [`Loader`] hands out
//! pre-parsed [`Executable`] images by name; [`ProgramRegistry`] is the
//! in-memory implementation used by the kernel and its tests.
//!
//! An image is a list of [`Section`]s, an entry point, and a [`Program`]: a
//! host closure that stands in for the instruction stream and talks to the
//! kernel only through a [`UserContext`].
//!
//! ## Address space layout
//!
//! Loading builds the following layout, from virtual page 0 upwards:
//!
//! | Pages                 | Contents                                   |
//! | --------------------- | ------------------------------------------ |
//! | `0..code`             | the sections of the image, back to back    |
//! | `code..code + 8`      | the user stack, growing downward           |
//! | `code + 8`            | the argument vector                        |
//!
//! Sections must start at page 0 and follow each other without holes;
//! anything else is refused with [`KernelError::NoExec`]. Pages of read-only
//! sections are mapped read-only.
//!
//! The argument page holds the `argv` pointer array followed by the packed
//! NUL-terminated argument strings. Each argument costs its pointer (4
//! bytes), its bytes and its terminator; arguments that do not fit in one
//! page fail the load with [`KernelError::ArgumentListTooLong`].
//!
//! ## State on program startup
//!
//! | Register | Value                                 |
//! | -------- | ------------------------------------- |
//! | `PC`     | entry point                           |
//! | `SP`     | `(pages - 1) * PAGE_SIZE`, top of stack |
//! | `A0`     | `argc`                                |
//! | `A1`     | address of `argv`                     |
//!
//! Every frame is taken from the allocator before anything is written. If
//! the allocator cannot supply all of them, the load fails with
//! [`KernelError::NoMemory`] and the free list is left as it was; if a later
//! step fails, the partially built address space is dropped and its frames
//! go back to the allocator.
//!
//! [`UserContext`]: crate::process::UserContext
pub mod stack_builder;

use crate::{frame_allocator::FrameAllocator, mm_struct::AddressSpace, process::UserContext};
use arrayvec::ArrayVec;
use kestrel::{KernelError, sync::SpinLock};
use machine::{
    PAGE_SIZE, PhysicalMemory,
    processor::{REG_A0, REG_A1, REG_SP, Registers},
};
use std::{collections::BTreeMap, sync::Arc};

/// Number of pages of the user stack.
pub const STACK_PAGES: usize = 8;

/// Upper bound of the argument count: every argument takes at least a
/// pointer and a terminator in the argument page.
pub const MAX_ARGS: usize = PAGE_SIZE / 5;

/// The instruction stream of an executable.
///
/// The return value of the closure is the exit status of the process.
pub type Program = Arc<dyn Fn(&mut UserContext) -> i32 + Send + Sync>;

/// A contiguous run of pages of an executable image.
#[derive(Clone, Debug)]
pub struct Section {
    /// First virtual page of the section.
    pub first_vpn: usize,
    /// Number of pages of the section.
    pub num_pages: usize,
    /// Map the pages read-only.
    pub read_only: bool,
    /// Initial contents. Pages past the end of `data` are zero-filled.
    pub data: Vec<u8>,
}

/// A pre-parsed executable image.
#[derive(Clone)]
pub struct Executable {
    /// Sections, in address order.
    pub sections: Vec<Section>,
    /// Initial program counter.
    pub entry_point: u32,
    /// Instruction stream.
    pub program: Program,
}

impl Executable {
    /// Creates an image from its sections and instruction stream.
    pub fn new<F>(sections: Vec<Section>, entry_point: u32, program: F) -> Self
    where
        F: Fn(&mut UserContext) -> i32 + Send + Sync + 'static,
    {
        Self {
            sections,
            entry_point,
            program: Arc::new(program),
        }
    }

    /// Creates an image with a single read-only code page.
    pub fn from_fn<F>(program: F) -> Self
    where
        F: Fn(&mut UserContext) -> i32 + Send + Sync + 'static,
    {
        Self::new(
            vec![Section {
                first_vpn: 0,
                num_pages: 1,
                read_only: true,
                data: Vec::new(),
            }],
            0,
            program,
        )
    }

    /// Number of pages covered by the sections, if they are contiguous from
    /// page 0 and their contents fit.
    fn code_pages(&self) -> Result<usize, KernelError> {
        self.sections.iter().try_fold(0, |next, section| {
            if section.first_vpn == next && section.data.len() <= section.num_pages * PAGE_SIZE {
                Ok(next + section.num_pages)
            } else {
                Err(KernelError::NoExec)
            }
        })
    }
}

/// Source of executable images.
pub trait Loader
where
    Self: Send + Sync,
{
    /// Finds the executable `name`.
    ///
    /// # Returns
    /// - `Ok(Executable)`: the image.
    /// - `Err(KernelError::NoSuchEntry)`: no such executable.
    fn lookup(&self, name: &str) -> Result<Executable, KernelError>;
}

/// An in-memory table of executables.
#[derive(Default)]
pub struct ProgramRegistry {
    programs: SpinLock<BTreeMap<String, Executable>>,
}

impl ProgramRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `exe` as `name`, replacing any previous image.
    pub fn register(&self, name: &str, exe: Executable) -> &Self {
        let mut guard = self.programs.lock();
        guard.insert(name.to_string(), exe);
        guard.unlock();
        self
    }

    /// Installs a single-page program as `name`.
    pub fn register_fn<F>(&self, name: &str, program: F) -> &Self
    where
        F: Fn(&mut UserContext) -> i32 + Send + Sync + 'static,
    {
        self.register(name, Executable::from_fn(program))
    }
}

impl Loader for ProgramRegistry {
    fn lookup(&self, name: &str) -> Result<Executable, KernelError> {
        let guard = self.programs.lock();
        let exe = guard.get(name).cloned();
        guard.unlock();
        exe.ok_or(KernelError::NoSuchEntry)
    }
}

/// A context that holds the state of a program being loaded.
pub struct LoadContext {
    /// Virtual memory of the new program.
    pub aspace: AddressSpace,
    /// Initial register values of the new program.
    pub regs: Registers,
}

impl LoadContext {
    /// Builds the address space and initial registers of `exe` started with
    /// `args`.
    ///
    /// # Errors
    /// - [`KernelError::NoExec`]: the sections are not contiguous from page 0.
    /// - [`KernelError::ArgumentListTooLong`]: the arguments do not fit in one
    ///   page.
    /// - [`KernelError::NoMemory`]: not enough free frames.
    pub fn load<S: AsRef<str>>(
        exe: &Executable,
        args: &[S],
        memory: &Arc<PhysicalMemory>,
        frames: &Arc<FrameAllocator>,
    ) -> Result<Self, KernelError> {
        let code_pages = exe.code_pages()?;
        let args_size: usize = args.iter().map(|arg| 4 + arg.as_ref().len() + 1).sum();
        if args_size > PAGE_SIZE {
            return Err(KernelError::ArgumentListTooLong);
        }

        let num_pages = code_pages + STACK_PAGES + 1;
        let acquired = frames.acquire_frames(num_pages)?;
        let mut aspace = AddressSpace::new(num_pages, memory.clone(), frames.clone());
        let mut acquired = acquired.into_iter().enumerate();
        while let Some((vpn, ppn)) = acquired.next() {
            memory.zero_frame(ppn as usize);
            let read_only = exe
                .sections
                .iter()
                .any(|s| s.read_only && (s.first_vpn..s.first_vpn + s.num_pages).contains(&vpn));
            if let Err(e) = aspace.map(vpn, ppn, read_only) {
                frames.release_frame(ppn);
                acquired.for_each(|(_, ppn)| frames.release_frame(ppn));
                return Err(e);
            }
        }

        let mut this = Self {
            aspace,
            regs: Registers::new(),
        };
        this.load_sections(exe)?;
        this.build_argv(args)?;
        this.regs.set_pc(exe.entry_point as i32);
        this.regs.write(REG_SP, ((num_pages - 1) * PAGE_SIZE) as i32);
        kestrel::debug!(
            "Loaded {} code pages, entry {:#x}, {} args.",
            code_pages,
            exe.entry_point,
            args.len()
        );
        Ok(this)
    }

    /// Copies the initial contents of every section into its pages.
    pub fn load_sections(&mut self, exe: &Executable) -> Result<(), KernelError> {
        for section in exe.sections.iter() {
            for (idx, chunk) in section.data.chunks(PAGE_SIZE).enumerate() {
                self.aspace.fill_page(section.first_vpn + idx, 0, chunk)?;
            }
        }
        Ok(())
    }

    /// Fills the last page with `argv` and sets `A0` and `A1`.
    pub fn build_argv<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), KernelError> {
        let argv_vpn = self.aspace.num_pages() - 1;
        let base = argv_vpn * PAGE_SIZE;

        let mut page = [0u8; PAGE_SIZE];
        let mut pointers = ArrayVec::<u32, MAX_ARGS>::new();
        let mut cursor = 4 * args.len();
        for arg in args {
            let bytes = arg.as_ref().as_bytes();
            let end = cursor + bytes.len() + 1;
            if end > PAGE_SIZE {
                return Err(KernelError::ArgumentListTooLong);
            }
            page[cursor..end - 1].copy_from_slice(bytes);
            pointers
                .try_push((base + cursor) as u32)
                .map_err(|_| KernelError::ArgumentListTooLong)?;
            cursor = end;
        }
        for (slot, ptr) in page.chunks_exact_mut(4).zip(pointers.iter()) {
            slot.copy_from_slice(&ptr.to_le_bytes());
        }
        self.aspace.fill_page(argv_vpn, 0, &page)?;

        self.regs.write(REG_A0, args.len() as i32);
        self.regs.write(REG_A1, base as i32);
        Ok(())
    }
}
