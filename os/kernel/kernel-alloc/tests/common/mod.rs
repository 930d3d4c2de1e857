#![allow(dead_code)]

use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_alloc::{BackingFile, FileError, Vm, VmConfig};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const PHYS_BASE: u64 = 0x8000_0000;
pub const MMAP_MAX: VirtualAddress = VirtualAddress::new(0x4000_0000);

#[repr(C, align(4096))]
pub struct Frame([u8; 4096]);

/// Host memory standing in for DRAM at `PHYS_BASE`.
pub struct Ram {
    frames: Vec<Frame>,
}

impl Ram {
    pub fn new(pages: usize) -> Self {
        Self {
            frames: (0..pages).map(|_| Frame([0xcc; 4096])).collect(),
        }
    }

    pub fn mapper(&self) -> DirectMapPhysMapper {
        DirectMapPhysMapper::new((self.frames.as_ptr() as u64).wrapping_sub(PHYS_BASE))
    }

    pub fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(PHYS_BASE)
    }

    pub fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(PHYS_BASE + self.frames.len() as u64 * PAGE_SIZE)
    }
}

/// A VM with `pages` data pages, plus `config.table_pages` for page tables.
pub fn vm_with(pages: usize, config: VmConfig) -> (Ram, Vm<DirectMapPhysMapper>) {
    let reserve = usize::try_from(config.table_pages).unwrap();
    let ram = Ram::new(pages + reserve);
    let vm = Vm::new(ram.mapper(), ram.start(), ram.end(), MMAP_MAX, config).unwrap();
    (ram, vm)
}

pub fn vm(pages: usize) -> (Ram, Vm<DirectMapPhysMapper>) {
    vm_with(pages, VmConfig::default())
}

/// In-memory file that can be told to fail.
#[derive(Default)]
pub struct MemFile {
    pub data: Vec<u8>,
    pub fail: AtomicBool,
    pub reads: AtomicUsize,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// `len` bytes where byte `i` is `i % 251`.
    pub fn patterned(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8).collect())
    }
}

impl BackingFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::Relaxed) {
            return Err(FileError { errno: 5 });
        }
        let Some(rest) = usize::try_from(offset).ok().and_then(|o| self.data.get(o..)) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}
