//! # File state of a process.
//!
//! Processes interact with files through **file descriptors**: small
//! integers that index into the process's descriptor table. The open file
//! objects themselves stay in the kernel and are never reachable from user
//! space; a descriptor is only an opaque reference to one of them.
//!
//! Every process owns a [`FileStruct`] with [`MAX_FILES`] slots. The first
//! two are the standard streams:
//!
//! - **Standard Input (stdin) - File Descriptor 0**: read-only, fed by the
//!   console.
//! - **Standard Output (stdout) - File Descriptor 1**: write-only, printed on
//!   the console.
//!
//! Files opened by the process take the lowest free slot from 2 upwards.
//!
//! ## System calls
//!
//! | No. | Call                  | Result                                   |
//! | --- | --------------------- | ---------------------------------------- |
//! | 4   | `create(path)`        | descriptor; creates the file if missing  |
//! | 5   | `open(path)`          | descriptor; never creates                |
//! | 6   | `read(fd, buf, n)`    | bytes transferred                        |
//! | 7   | `write(fd, buf, n)`   | bytes transferred                        |
//! | 8   | `close(fd)`           | 0                                        |
//! | 9   | `unlink(path)`        | 0                                        |
//!
//! Any failure is reported as `-1`. Path arguments are read with
//! [`AddressSpace::read_cstring`] and are bounded by the configured maximum
//! string length. `read` and `write` move data one page at a time and stop
//! early on a short transfer; the count they return is the number of bytes
//! that actually reached their destination.
//!
//! A file that the file system marks read-only is opened with
//! [`FileMode::Read`]; writing through such a descriptor fails before any
//! byte is transferred.
//!
//! [`AddressSpace::read_cstring`]: crate::mm_struct::AddressSpace::read_cstring
use crate::{process::Process, syscall::SyscallAbi};
use kestrel::{
    KernelError,
    fs::{RegularFile, traits::FileSystem},
    teletype::Teletype,
};
use machine::PAGE_SIZE;

/// Number of slots of a descriptor table.
pub const MAX_FILES: usize = 16;

/// The operations allowed through a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Read only.
    Read,
    /// Write only.
    Write,
    /// Read and write.
    ReadWrite,
}

impl FileMode {
    /// Returns true if the descriptor can be read.
    pub fn is_readable(&self) -> bool {
        matches!(self, FileMode::Read | FileMode::ReadWrite)
    }

    /// Returns true if the descriptor can be written.
    pub fn is_writable(&self) -> bool {
        matches!(self, FileMode::Write | FileMode::ReadWrite)
    }
}

/// The type of an open file.
#[derive(Clone)]
pub enum FileKind {
    /// A regular file of the file system.
    RegularFile {
        /// The open file.
        file: RegularFile,
        /// Offset of the next read or write, in bytes.
        position: usize,
    },
    /// The console input.
    Stdin,
    /// The console output.
    Stdout,
}

/// An open file of a process.
#[derive(Clone)]
pub struct File {
    /// The access mode of the file.
    pub mode: FileMode,
    /// The underlying file.
    pub file: FileKind,
}

/// Represents an index into a process’s file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

/// The descriptor table of a process.
#[derive(Clone)]
pub struct FileStruct {
    files: [Option<File>; MAX_FILES],
}

impl Default for FileStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStruct {
    /// Creates a table with stdin and stdout installed.
    pub fn new() -> Self {
        let mut files: [Option<File>; MAX_FILES] = std::array::from_fn(|_| None);
        files[0] = Some(File {
            mode: FileMode::Read,
            file: FileKind::Stdin,
        });
        files[1] = Some(File {
            mode: FileMode::Write,
            file: FileKind::Stdout,
        });
        Self { files }
    }

    /// Installs `file` in the lowest free slot from 2 upwards.
    ///
    /// # Errors
    /// - [`KernelError::TooManyOpenFile`] if every slot is taken.
    pub fn install_file(&mut self, file: File) -> Result<FileDescriptor, KernelError> {
        let (idx, slot) = self
            .files
            .iter_mut()
            .enumerate()
            .skip(2)
            .find(|(_, slot)| slot.is_none())
            .ok_or(KernelError::TooManyOpenFile)?;
        *slot = Some(file);
        Ok(FileDescriptor(idx as i32))
    }

    /// Looks up the open file of `fd`.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`] if `fd` is out of range or not
    ///   open.
    pub fn get(&mut self, fd: FileDescriptor) -> Result<&mut File, KernelError> {
        usize::try_from(fd.0)
            .ok()
            .and_then(|idx| self.files.get_mut(idx))
            .and_then(Option::as_mut)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Closes `fd`.
    pub fn close(&mut self, fd: FileDescriptor) -> Result<(), KernelError> {
        usize::try_from(fd.0)
            .ok()
            .and_then(|idx| self.files.get_mut(idx))
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Closes every descriptor from 2 upwards.
    pub fn close_all(&mut self) {
        self.files.iter_mut().skip(2).for_each(|slot| *slot = None);
    }

    /// Closes every descriptor that refers to the regular file `name`.
    ///
    /// Returns the number of descriptors closed.
    pub fn close_by_name(&mut self, name: &str) -> usize {
        let mut closed = 0;
        for slot in self.files.iter_mut() {
            if matches!(slot, Some(File { file: FileKind::RegularFile { file, .. }, .. }) if file.name() == name)
            {
                *slot = None;
                closed += 1;
            }
        }
        closed
    }

    /// Number of open descriptors, the standard streams included.
    pub fn open_files(&self) -> usize {
        self.files.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Process {
    fn read_path(&mut self, vaddr: i32) -> Result<String, KernelError> {
        let max_len = self.kernel.config().max_string_length;
        self.aspace
            .read_cstring(vaddr as u32, max_len)
            .ok_or(KernelError::BadAddress)
    }

    fn open_file(&mut self, abi: &SyscallAbi, create: bool) -> Result<i32, KernelError> {
        let name = self.read_path(abi.arg1)?;
        let file = self.kernel.fs().open(&name, create)?;
        let mode = if file.is_read_only() {
            FileMode::Read
        } else {
            FileMode::ReadWrite
        };
        let fd = self.files.install_file(File {
            mode,
            file: FileKind::RegularFile { file, position: 0 },
        })?;
        Ok(fd.0)
    }

    /// Opens a file, creating it if it does not exist.
    ///
    /// # Syscall API
    /// ```c
    /// int create(const char *path);
    /// ```
    pub fn create(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        self.open_file(abi, true)
    }

    /// Opens an existing file.
    ///
    /// # Syscall API
    /// ```c
    /// int open(const char *path);
    /// ```
    pub fn open(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        self.open_file(abi, false)
    }

    /// Reads up to `count` bytes from `fd` into `buf`.
    ///
    /// # Syscall API
    /// ```c
    /// int read(int fd, void *buf, int count);
    /// ```
    ///
    /// Returns the number of bytes stored into `buf`, which is smaller than
    /// `count` at end of file or when `buf` runs into memory that cannot be
    /// written. A `buf` that cannot take a single byte is an error.
    pub fn read(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        let count = usize::try_from(abi.arg3).map_err(|_| KernelError::InvalidArgument)?;
        let Self {
            files,
            aspace,
            kernel,
            ..
        } = self;
        let file = files.get(FileDescriptor(abi.arg1))?;
        if !file.mode.is_readable() {
            return Err(KernelError::BadFileDescriptor);
        }

        let mut buf = [0u8; PAGE_SIZE];
        let mut total = 0;
        while total < count {
            let chunk = (count - total).min(PAGE_SIZE);
            let read = match &file.file {
                FileKind::Stdin => kernel.console().read(&mut buf[..chunk])?,
                FileKind::RegularFile { file, position } => file.read(*position, &mut buf[..chunk])?,
                FileKind::Stdout => return Err(KernelError::BadFileDescriptor),
            };
            if read == 0 {
                break;
            }
            let Some(addr) = (abi.arg2 as u32).checked_add(total as u32) else {
                break;
            };
            let copied = aspace.copy_out(addr, &buf[..read]);
            if let FileKind::RegularFile { position, .. } = &mut file.file {
                *position += copied;
            }
            total += copied;
            if copied < read {
                if total == 0 {
                    return Err(KernelError::BadAddress);
                }
                break;
            }
            if read < chunk {
                break;
            }
        }
        Ok(total as i32)
    }

    /// Writes up to `count` bytes from `buf` to `fd`.
    ///
    /// # Syscall API
    /// ```c
    /// int write(int fd, const void *buf, int count);
    /// ```
    ///
    /// Returns the number of bytes written. Writing through a read-only
    /// descriptor fails before anything is transferred.
    pub fn write(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        let count = usize::try_from(abi.arg3).map_err(|_| KernelError::InvalidArgument)?;
        let Self {
            files,
            aspace,
            kernel,
            ..
        } = self;
        let file = files.get(FileDescriptor(abi.arg1))?;
        match (&file.file, file.mode.is_writable()) {
            (FileKind::Stdin, _) => return Err(KernelError::BadFileDescriptor),
            (_, false) => return Err(KernelError::InvalidAccess),
            _ => (),
        }

        let mut total = 0;
        while total < count {
            let chunk = (count - total).min(PAGE_SIZE);
            let Some(addr) = (abi.arg2 as u32).checked_add(total as u32) else {
                break;
            };
            let data = aspace.copy_in(addr, chunk);
            if data.is_empty() {
                if total == 0 {
                    return Err(KernelError::BadAddress);
                }
                break;
            }
            let written = match &mut file.file {
                FileKind::Stdout => kernel.console().write(&data)?,
                FileKind::RegularFile { file, position } => {
                    let written = file.write(*position, &data)?;
                    *position += written;
                    written
                }
                FileKind::Stdin => return Err(KernelError::BadFileDescriptor),
            };
            total += written;
            if written < data.len() || data.len() < chunk {
                break;
            }
        }
        Ok(total as i32)
    }

    /// Closes `fd`.
    ///
    /// # Syscall API
    /// ```c
    /// int close(int fd);
    /// ```
    pub fn close(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        self.files.close(FileDescriptor(abi.arg1))?;
        Ok(0)
    }

    /// Closes every descriptor of this process that refers to `path`, then
    /// removes `path` from the file system.
    ///
    /// # Syscall API
    /// ```c
    /// int unlink(const char *path);
    /// ```
    pub fn unlink(&mut self, abi: &SyscallAbi) -> Result<i32, KernelError> {
        let name = self.read_path(abi.arg1)?;
        let closed = self.files.close_by_name(&name);
        if closed > 0 {
            kestrel::debug!("unlink({name}): closed {closed} descriptors.");
        }
        self.kernel.fs().remove(&name)?;
        Ok(0)
    }
}
