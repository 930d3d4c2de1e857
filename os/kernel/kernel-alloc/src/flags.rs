//! POSIX protection and mapping flags, with the Linux RISC-V values.

use kernel_vmem::LeafPerms;

bitflags::bitflags! {
    /// `PROT_*` bits.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct Prot: u32 {
        const READ  = 0x1;
        const WRITE = 0x2;
        const EXEC  = 0x4;

        const RW  = Self::READ.bits() | Self::WRITE.bits();
        const RWX = Self::RW.bits() | Self::EXEC.bits();
    }
}

bitflags::bitflags! {
    /// `MAP_*` bits.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct MapFlags: u32 {
        const SHARED    = 0x01;
        const PRIVATE   = 0x02;
        const FIXED     = 0x10;
        const ANONYMOUS = 0x20;
        const POPULATE  = 0x8000;
    }
}

bitflags::bitflags! {
    /// `MREMAP_*` bits.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct MremapFlags: u32 {
        const MAYMOVE = 0x1;
        const FIXED   = 0x2;
    }
}

impl From<Prot> for LeafPerms {
    /// R/W/X only; the caller adds `USER` for user pages.
    fn from(prot: Prot) -> Self {
        let mut perms = Self::empty();
        if prot.contains(Prot::READ) {
            perms |= Self::READ;
        }
        if prot.contains(Prot::WRITE) {
            perms |= Self::READ | Self::WRITE;
        }
        if prot.contains(Prot::EXEC) {
            perms |= Self::EXECUTE;
        }
        perms
    }
}
