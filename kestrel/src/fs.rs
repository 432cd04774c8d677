//! Filesystem abstraction.
//!
//! The kernel reaches files through [`traits::FileSystem`], a flat namespace
//! of regular files. Opening a file yields a [`RegularFile`] handle; the file
//! is closed when the last clone of the handle is dropped.
//!
//! [`MemFs`] is an in-memory implementation. Removing a file that is still
//! open unlinks its name immediately, so it can no longer be opened, while
//! the handles that are already open keep working until they are closed.
use crate::{KernelError, sync::SpinLock};
use std::{collections::BTreeMap, sync::Arc};

/// Defines traits for file system operations.
pub mod traits {
    use crate::KernelError;

    /// Trait representing a filesystem.
    pub trait FileSystem
    where
        Self: Sync + Send,
    {
        /// Opens the file `name`. If `create` is set and the file does not
        /// exist, an empty file is created first.
        ///
        /// # Returns
        /// - `Ok(RegularFile)`: A handle to the opened file.
        /// - `Err(KernelError::NoSuchEntry)`: If the file does not exist and
        ///   `create` is not set.
        fn open(&self, name: &str, create: bool) -> Result<super::RegularFile, KernelError>;

        /// Removes the file `name` from the namespace.
        fn remove(&self, name: &str) -> Result<(), KernelError>;
    }

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports basic read and write
    /// operations.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Name the file was opened with.
        fn name(&self) -> &str;

        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Returns true if the file rejects writes.
        fn is_read_only(&self) -> bool;

        /// Reads data at `position` into `buf`.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes read; 0 at end of file.
        /// - `Err(KernelError)`: An error occured while the read operation.
        fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` at `position`, extending the file if needed.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes written.
        /// - `Err(KernelError)`: An error occured while the write operation.
        fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError>;
    }
}

/// A handle to a regular file.
///
/// This struct provides a reference-counted handle to a file that supports
/// reading and writing operations at the kernel level.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Name the file was opened with.
    #[inline]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Returns true if the file rejects writes.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.0.is_read_only()
    }

    /// Reads data from the file into the provided buffer.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read(position, buf)
    }

    /// Writes data from the buffer into the file.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write(position, buf)
    }
}

struct Inode {
    data: SpinLock<Vec<u8>>,
    read_only: bool,
}

struct MemFile {
    name: String,
    inode: Arc<Inode>,
}

impl traits::RegularFile for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        let guard = self.inode.data.lock();
        let size = guard.len();
        guard.unlock();
        size
    }

    fn is_read_only(&self) -> bool {
        self.inode.read_only
    }

    fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let guard = self.inode.data.lock();
        let read_bytes = guard.len().saturating_sub(position).min(buf.len());
        buf[..read_bytes].copy_from_slice(&guard[position..position + read_bytes]);
        guard.unlock();
        Ok(read_bytes)
    }

    fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        if self.inode.read_only {
            return Err(KernelError::InvalidAccess);
        }
        let end = position
            .checked_add(buf.len())
            .ok_or(KernelError::InvalidArgument)?;
        let mut guard = self.inode.data.lock();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[position..end].copy_from_slice(buf);
        guard.unlock();
        Ok(buf.len())
    }
}

/// An in-memory file system.
#[derive(Default)]
pub struct MemFs {
    files: SpinLock<BTreeMap<String, Arc<Inode>>>,
}

impl MemFs {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a file with the given contents, replacing any file of the
    /// same name.
    pub fn add_file(&self, name: &str, contents: &[u8], read_only: bool) {
        let inode = Arc::new(Inode {
            data: SpinLock::new(contents.to_vec()),
            read_only,
        });
        let mut guard = self.files.lock();
        guard.insert(name.to_string(), inode);
        guard.unlock();
    }

    /// Snapshot of the contents of `name`, if it is linked.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let guard = self.files.lock();
        let inode = guard.get(name).cloned();
        guard.unlock();
        inode.map(|inode| {
            let data = inode.data.lock();
            let v = data.clone();
            data.unlock();
            v
        })
    }

    /// Number of open files referring to `name`, if it is linked.
    pub fn open_count(&self, name: &str) -> Option<usize> {
        let guard = self.files.lock();
        let count = guard.get(name).map(|inode| Arc::strong_count(inode) - 1);
        guard.unlock();
        count
    }

    /// Returns true if `name` is linked.
    pub fn exists(&self, name: &str) -> bool {
        let guard = self.files.lock();
        let exists = guard.contains_key(name);
        guard.unlock();
        exists
    }
}

impl traits::FileSystem for MemFs {
    fn open(&self, name: &str, create: bool) -> Result<RegularFile, KernelError> {
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let mut guard = self.files.lock();
        let inode = match guard.get(name) {
            Some(inode) => Some(inode.clone()),
            None if create => {
                let inode = Arc::new(Inode {
                    data: SpinLock::new(Vec::new()),
                    read_only: false,
                });
                guard.insert(name.to_string(), inode.clone());
                Some(inode)
            }
            None => None,
        };
        guard.unlock();
        let inode = inode.ok_or(KernelError::NoSuchEntry)?;
        Ok(RegularFile::new(MemFile {
            name: name.to_string(),
            inode,
        }))
    }

    fn remove(&self, name: &str) -> Result<(), KernelError> {
        let mut guard = self.files.lock();
        let removed = guard.remove(name);
        guard.unlock();
        removed.map(|_| ()).ok_or(KernelError::NoSuchEntry)
    }
}
