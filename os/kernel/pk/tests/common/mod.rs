#![allow(dead_code)]

use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_alloc::{BackingFile, FileError};
use kernel_info::boot::BootFlags;
use kernel_info::memory::{DRAM_BASE, MemoryLayout};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use pk::ProxyKernel;
use std::sync::Arc;

/// Bytes reserved for the kernel image at the start of DRAM.
pub const KERNEL_BYTES: u64 = 4 * PAGE_SIZE;

#[repr(C, align(4096))]
pub struct Frame([u8; 4096]);

/// Host memory standing in for the page pool behind the kernel image.
pub struct Ram(Vec<Frame>);

pub fn kernel_with(pool_pages: usize, flags: BootFlags) -> (Ram, ProxyKernel<DirectMapPhysMapper>) {
    let ram = Ram((0..pool_pages).map(|_| Frame([0xcc; 4096])).collect());
    let pool_start = DRAM_BASE + KERNEL_BYTES;
    let mapper = DirectMapPhysMapper::new((ram.0.as_ptr() as u64).wrapping_sub(pool_start));
    let memory = MemoryLayout::new(
        PhysicalAddress::new(DRAM_BASE),
        KERNEL_BYTES + pool_pages as u64 * PAGE_SIZE,
        PhysicalAddress::new(pool_start),
    )
    .unwrap();
    let kernel = ProxyKernel::boot(mapper, memory, flags).unwrap();
    (ram, kernel)
}

pub fn kernel(pool_pages: usize) -> (Ram, ProxyKernel<DirectMapPhysMapper>) {
    kernel_with(pool_pages, BootFlags::new())
}

pub struct MemFile(pub Vec<u8>);

impl BackingFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
        let Some(rest) = usize::try_from(offset).ok().and_then(|o| self.0.get(o..)) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

pub fn file(bytes: Vec<u8>) -> Arc<dyn BackingFile> {
    Arc::new(MemFile(bytes))
}

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub struct Segment {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: u32,
}

/// ELF64 header and program headers at the start of a `len`-byte image.
pub fn elf_image(e_type: u16, machine: u16, entry: u64, segments: &[Segment], len: usize) -> Vec<u8> {
    let mut f = vec![0u8; len];
    f[0..4].copy_from_slice(b"\x7FELF");
    f[4] = 2;
    f[5] = 1;
    f[6] = 1;
    f[16..18].copy_from_slice(&e_type.to_le_bytes());
    f[18..20].copy_from_slice(&machine.to_le_bytes());
    f[20..24].copy_from_slice(&1u32.to_le_bytes());
    f[24..32].copy_from_slice(&entry.to_le_bytes());
    f[32..40].copy_from_slice(&64u64.to_le_bytes());
    f[52..54].copy_from_slice(&64u16.to_le_bytes());
    f[54..56].copy_from_slice(&56u16.to_le_bytes());
    f[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, s) in segments.iter().enumerate() {
        let p = 64 + i * 56;
        f[p..p + 4].copy_from_slice(&1u32.to_le_bytes());
        f[p + 4..p + 8].copy_from_slice(&s.flags.to_le_bytes());
        f[p + 8..p + 16].copy_from_slice(&s.offset.to_le_bytes());
        f[p + 16..p + 24].copy_from_slice(&s.vaddr.to_le_bytes());
        f[p + 24..p + 32].copy_from_slice(&s.vaddr.to_le_bytes());
        f[p + 32..p + 40].copy_from_slice(&s.filesz.to_le_bytes());
        f[p + 40..p + 48].copy_from_slice(&s.memsz.to_le_bytes());
        f[p + 48..p + 56].copy_from_slice(&PAGE_SIZE.to_le_bytes());
    }
    f
}

pub const TEXT: u64 = 0x1_0000;
pub const DATA: u64 = 0x1_1100;
pub const ENTRY: u64 = 0x1_0100;

/// Text page `[0x1_0000, +0x200)` (code bytes 0xaa from 0x100) followed by
/// data at 0x1_1100 (0x100 bytes of 0x77) with 0x1f00 bytes of BSS. File
/// bytes outside both segments are 0x55.
pub fn program() -> Vec<u8> {
    let segments = [
        Segment {
            vaddr: TEXT,
            offset: 0,
            filesz: 0x200,
            memsz: 0x200,
            flags: PF_R | PF_X,
        },
        Segment {
            vaddr: DATA,
            offset: 0x1100,
            filesz: 0x100,
            memsz: 0x2000,
            flags: PF_R | PF_W,
        },
    ];
    let mut f = elf_image(2, 243, ENTRY, &segments, 0x1200);
    f[0x100..0x200].fill(0xaa);
    f[0x200..0x1100].fill(0x55);
    f[0x1100..0x1200].fill(0x77);
    f
}
