/// RISC-V Linux system call numbers (generic `asm-generic/unistd.h` table).
#[repr(u64)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sysno {
    Close = 57,
    Read = 63,
    Write = 64,
    Pread64 = 67,
    Exit = 93,
    ExitGroup = 94,
    Brk = 214,
    Munmap = 215,
    Mremap = 216,
    Mmap = 222,
    Mprotect = 226,
}

impl TryFrom<u64> for Sysno {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            57 => Self::Close,
            63 => Self::Read,
            64 => Self::Write,
            67 => Self::Pread64,
            93 => Self::Exit,
            94 => Self::ExitGroup,
            214 => Self::Brk,
            215 => Self::Munmap,
            216 => Self::Mremap,
            222 => Self::Mmap,
            226 => Self::Mprotect,
            other => return Err(other),
        })
    }
}

impl Sysno {
    /// Whether the call is served by the VM core.
    #[must_use]
    pub const fn is_mm(self) -> bool {
        matches!(
            self,
            Self::Brk | Self::Munmap | Self::Mremap | Self::Mmap | Self::Mprotect
        )
    }
}
