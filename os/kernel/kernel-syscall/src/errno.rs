//! Linux errno values.

use kernel_alloc::VmError;

/// A positive Linux errno.
///
/// ```rust
/// use kernel_syscall::Errno;
///
/// assert_eq!(Errno::EINVAL.as_return(), -22i64 as u64);
/// assert_eq!(Errno::from_return(-9i64 as u64), Some(Errno::EBADF));
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
#[error("errno {0}")]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Self = Self(1);
    pub const ENOENT: Self = Self(2);
    pub const EIO: Self = Self(5);
    pub const EBADF: Self = Self(9);
    pub const ENOMEM: Self = Self(12);
    pub const EACCES: Self = Self(13);
    pub const EFAULT: Self = Self(14);
    pub const EINVAL: Self = Self(22);
    pub const EMFILE: Self = Self(24);
    pub const ENOSYS: Self = Self(38);

    /// `-errno` as a syscall return register value.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_return(self) -> u64 {
        (-(self.0 as i64)) as u64
    }

    /// Decodes a syscall return value; `None` for successful results.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const fn from_return(ret: u64) -> Option<Self> {
        let v = ret as i64;
        if v < 0 && v >= -4095 {
            Some(Self((-v) as i32))
        } else {
            None
        }
    }
}

impl From<VmError> for Errno {
    fn from(value: VmError) -> Self {
        match value {
            VmError::InvalidArgument => Self::EINVAL,
            VmError::BadFileDescriptor => Self::EBADF,
            VmError::OutOfMemory => Self::ENOMEM,
            VmError::AccessDenied => Self::EACCES,
            VmError::BadAddress => Self::EFAULT,
            VmError::Io(_) => Self::EIO,
        }
    }
}
