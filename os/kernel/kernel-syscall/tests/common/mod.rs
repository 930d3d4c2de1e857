#![allow(dead_code)]

use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_alloc::{Vm, VmConfig};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_syscall::Frontend;
use std::collections::BTreeMap;

pub const PHYS_BASE: u64 = 0x8000_0000;
pub const MMAP_MAX: VirtualAddress = VirtualAddress::new(0x4000_0000);

#[repr(C, align(4096))]
pub struct Frame([u8; 4096]);

pub struct Ram(Vec<Frame>);

/// A VM with `pages` data pages on top of the default page table reserve.
pub fn vm(pages: usize) -> (Ram, Vm<DirectMapPhysMapper>) {
    let config = VmConfig::default();
    let total = pages + usize::try_from(config.table_pages).unwrap();
    let ram = Ram((0..total).map(|_| Frame([0; 4096])).collect());
    let mapper = DirectMapPhysMapper::new((ram.0.as_ptr() as u64).wrapping_sub(PHYS_BASE));
    let end = PhysicalAddress::new(PHYS_BASE + total as u64 * PAGE_SIZE);
    let vm = Vm::new(mapper, PhysicalAddress::new(PHYS_BASE), end, MMAP_MAX, config).unwrap();
    (ram, vm)
}

/// Host with in-memory files, keyed by host descriptor.
#[derive(Default)]
pub struct FakeHost {
    pub files: BTreeMap<i32, Vec<u8>>,
    pub closed: Vec<i32>,
    pub fail_reads: bool,
}

impl Frontend for FakeHost {
    fn pread(&mut self, fd: i32, buf: &mut [u8], offset: u64) -> i64 {
        if self.fail_reads {
            return -5;
        }
        let Some(data) = self.files.get(&fd) else {
            return -9;
        };
        let start = usize::try_from(offset).unwrap().min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        i64::try_from(n).unwrap()
    }

    fn close(&mut self, fd: i32) -> i64 {
        if self.files.remove(&fd).is_none() {
            return -9;
        }
        self.closed.push(fd);
        0
    }
}
