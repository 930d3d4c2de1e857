//! Memory management system calls.
//!
//! Argument registers arrive as raw `u64`s; these adapters decode them,
//! call into the VM core and encode the result.

use crate::errno::Errno;
use crate::file::FileTable;
use crate::sysno::Sysno;
use kernel_alloc::{MapFlags, MremapFlags, Prot, Vm, VmError};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PhysMapper;

/// `mmap`'s failure value.
pub const MAP_FAILED: u64 = u64::MAX;

pub struct MmSyscalls<'a, M: PhysMapper + Clone> {
    vm: &'a Vm<M>,
    files: &'a FileTable,
}

impl<'a, M: PhysMapper + Clone> MmSyscalls<'a, M> {
    #[must_use]
    pub const fn new(vm: &'a Vm<M>, files: &'a FileTable) -> Self {
        Self { vm, files }
    }

    /// Runs the memory call `nr`, or returns `None` if `nr` is not one.
    pub fn dispatch(&self, nr: u64, args: [u64; 6]) -> Option<u64> {
        let sysno = Sysno::try_from(nr).ok().filter(|s| s.is_mm())?;
        let [a0, a1, a2, a3, a4, a5] = args;
        Some(match sysno {
            Sysno::Brk => self.brk(a0),
            Sysno::Munmap => self.munmap(a0, a1),
            Sysno::Mremap => self.mremap(a0, a1, a2, a3),
            Sysno::Mmap => self.mmap(a0, a1, a2, a3, a4, a5),
            Sysno::Mprotect => self.mprotect(a0, a1, a2),
            _ => unreachable!(),
        })
    }

    pub fn brk(&self, addr: u64) -> u64 {
        self.vm.brk(VirtualAddress::new(addr)).as_u64()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn mmap(&self, addr: u64, len: u64, prot: u64, flags: u64, fd: u64, offset: u64) -> u64 {
        let prot = Prot::from_bits_truncate(prot as u32);
        let flags = MapFlags::from_bits_truncate(flags as u32);
        // a bad descriptor only matters for file mappings; the VM core
        // reports it after validating everything else
        let file = if flags.contains(MapFlags::ANONYMOUS) {
            None
        } else {
            self.files.get(fd as i32).ok()
        };
        match self.vm.mmap(VirtualAddress::new(addr), len, prot, flags, file, offset) {
            Ok(base) => base.as_u64(),
            Err(VmError::OutOfMemory) => MAP_FAILED,
            Err(e) => {
                log::warn!("mmap({addr:#x}, {len:#x}, {prot:?}, {flags:?}, {fd}) failed: {e}");
                Errno::from(e).as_return()
            }
        }
    }

    pub fn munmap(&self, addr: u64, len: u64) -> u64 {
        encode(self.vm.munmap(VirtualAddress::new(addr), len).map(|()| 0))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn mprotect(&self, addr: u64, len: u64, prot: u64) -> u64 {
        let prot = Prot::from_bits_truncate(prot as u32);
        encode(self.vm.mprotect(VirtualAddress::new(addr), len, prot).map(|()| 0))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn mremap(&self, addr: u64, old_len: u64, new_len: u64, flags: u64) -> u64 {
        let flags = MremapFlags::from_bits_truncate(flags as u32);
        encode(
            self.vm
                .mremap(VirtualAddress::new(addr), old_len, new_len, flags)
                .map(VirtualAddress::as_u64),
        )
    }
}

fn encode(result: Result<u64, VmError>) -> u64 {
    result.unwrap_or_else(|e| Errno::from(e).as_return())
}
