use crate::backing::FileError;
use crate::flags::Prot;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{LeafPerms, WalkError};

/// Failure of a VM system call.
///
/// Each variant corresponds to one errno; the syscall layer does the
/// numbering.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("out of memory")]
    OutOfMemory,
    #[error("access denied")]
    AccessDenied,
    #[error("bad user address")]
    BadAddress,
    #[error(transparent)]
    Io(#[from] FileError),
}

impl From<WalkError> for VmError {
    fn from(value: WalkError) -> Self {
        match value {
            WalkError::OutOfMemory { .. } => Self::OutOfMemory,
            WalkError::NotATable { .. } => Self::InvalidArgument,
        }
    }
}

/// Why a page fault could not be resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("no mapping at {0}")]
    Unmapped(VirtualAddress),
    #[error("{access:?} access to {addr} not permitted by {perms:?}")]
    ProtectionViolation {
        addr: VirtualAddress,
        access: Prot,
        perms: LeafPerms,
    },
    #[error("out of memory populating {0}")]
    OutOfMemory(VirtualAddress),
    #[error("populating {addr}: {source}")]
    BackingRead {
        addr: VirtualAddress,
        source: FileError,
    },
}

impl FaultError {
    /// Whether the fault is the program's doing rather than the kernel's.
    ///
    /// Program faults kill the program with a segfault report; the others
    /// halt the kernel.
    #[must_use]
    pub const fn is_segfault(&self) -> bool {
        matches!(self, Self::Unmapped(_) | Self::ProtectionViolation { .. })
    }
}

impl From<FaultError> for VmError {
    fn from(value: FaultError) -> Self {
        match value {
            FaultError::Unmapped(_) | FaultError::ProtectionViolation { .. } => Self::BadAddress,
            FaultError::OutOfMemory(_) => Self::OutOfMemory,
            FaultError::BackingRead { source, .. } => Self::Io(source),
        }
    }
}
