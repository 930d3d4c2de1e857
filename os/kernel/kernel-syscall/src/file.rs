//! File descriptor table.
//!
//! A descriptor is an index into a fixed table of `Arc` handles. The `Arc`
//! count is the file's reference count: the table holds one, every mapping
//! backed by the file holds another, and the file is closed on the host
//! when the last one goes away.

use crate::errno::Errno;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_alloc::BackingFile;
use kernel_sync::SpinLock;

/// Number of descriptors.
pub const MAX_FILES: usize = 128;

pub struct FileTable {
    slots: SpinLock<Vec<Option<Arc<dyn BackingFile>>>>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SpinLock::new((0..MAX_FILES).map(|_| None).collect()),
        }
    }

    /// Installs `file` at the lowest free descriptor.
    ///
    /// # Errors
    /// [`Errno::EMFILE`] if the table is full.
    pub fn install(&self, file: Arc<dyn BackingFile>) -> Result<i32, Errno> {
        let mut slots = self.slots.lock();
        let (fd, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(Errno::EMFILE)?;
        *slot = Some(file);
        i32::try_from(fd).map_err(|_| Errno::EMFILE)
    }

    /// A new reference to the file behind `fd`.
    ///
    /// # Errors
    /// [`Errno::EBADF`] for a negative, out-of-range or closed descriptor.
    pub fn get(&self, fd: i32) -> Result<Arc<dyn BackingFile>, Errno> {
        let idx = usize::try_from(fd).map_err(|_| Errno::EBADF)?;
        self.slots
            .lock()
            .get(idx)
            .and_then(Clone::clone)
            .ok_or(Errno::EBADF)
    }

    /// Drops the table's reference to `fd`.
    ///
    /// # Errors
    /// [`Errno::EBADF`] as for [`get`](Self::get).
    pub fn close(&self, fd: i32) -> Result<(), Errno> {
        let idx = usize::try_from(fd).map_err(|_| Errno::EBADF)?;
        // drop outside the lock: the last reference may call into the host
        let file = self.slots.lock().get_mut(idx).and_then(Option::take);
        file.map(drop).ok_or(Errno::EBADF)
    }

    /// Number of open descriptors.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}
