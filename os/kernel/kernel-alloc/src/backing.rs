//! Files that can back a mapping.

/// Error reported by a backing file, carrying the host errno.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("backing file read failed (errno {errno})")]
pub struct FileError {
    pub errno: i32,
}

/// Read-by-offset access to a file.
///
/// Reference counting is the `Arc` count: every region holding the file keeps
/// one `Arc<dyn BackingFile>`, released when the region is freed.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. Returns `Ok(0)` at end of file.
    ///
    /// # Errors
    /// Any host-side failure.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError>;
}

/// Fills `buf` from `offset`, stopping early at end of file. Bytes past the end
/// are left untouched.
///
/// # Errors
/// The first failed read.
pub fn read_up_to(file: &dyn BackingFile, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
    let mut done = 0;
    while done < buf.len() {
        let n = file.read_at(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}
