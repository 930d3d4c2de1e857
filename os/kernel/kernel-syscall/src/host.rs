//! Forwarding to the host.
//!
//! The frontend is one request/response channel shared by all harts, so
//! [`HostChannel`] serializes requests behind its own lock. That lock is
//! independent of the VM lock: a page fault that reads a file holds the VM
//! lock and then takes this one, never the other way round. A request that
//! never completes hangs the requesting hart.

use crate::errno::Errno;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_alloc::{BackingFile, FileError};
use kernel_sync::SpinLock;

/// The host side of the proxy.
///
/// Results are raw host returns: a count, or a negated host errno.
pub trait Frontend: Send {
    fn pread(&mut self, fd: i32, buf: &mut [u8], offset: u64) -> i64;
    fn close(&mut self, fd: i32) -> i64;
}

pub struct HostChannel<F: Frontend> {
    frontend: SpinLock<F>,
    requests: AtomicU64,
}

impl<F: Frontend> HostChannel<F> {
    #[must_use]
    pub const fn new(frontend: F) -> Self {
        Self {
            frontend: SpinLock::new(frontend),
            requests: AtomicU64::new(0),
        }
    }

    /// # Errors
    /// The host's errno.
    pub fn pread(&self, fd: i32, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let ret = self.frontend.lock().pread(fd, buf, offset);
        decode(ret)
    }

    /// # Errors
    /// The host's errno.
    pub fn close(&self, fd: i32) -> Result<(), Errno> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let ret = self.frontend.lock().close(fd);
        decode(ret).map(|_| ())
    }

    /// Requests forwarded so far.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Exclusive access to the frontend, for requests without a wrapper.
    pub fn with_frontend<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.frontend.with_lock(f)
    }
}

fn decode(ret: i64) -> Result<usize, Errno> {
    if ret < 0 {
        Err(Errno(i32::try_from(-ret).unwrap_or(Errno::EIO.0)))
    } else {
        usize::try_from(ret).map_err(|_| Errno::EIO)
    }
}

/// A file open on the host. Closing happens when the last reference drops.
pub struct HostFile<F: Frontend> {
    channel: Arc<HostChannel<F>>,
    fd: i32,
}

impl<F: Frontend> HostFile<F> {
    #[must_use]
    pub const fn new(channel: Arc<HostChannel<F>>, fd: i32) -> Self {
        Self { channel, fd }
    }

    #[must_use]
    pub const fn host_fd(&self) -> i32 {
        self.fd
    }
}

impl<F: Frontend> BackingFile for HostFile<F> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
        self.channel
            .pread(self.fd, buf, offset)
            .map_err(|e| FileError { errno: e.0 })
    }
}

impl<F: Frontend> Drop for HostFile<F> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.close(self.fd) {
            log::warn!("host: closing fd {} failed: {e}", self.fd);
        }
    }
}
