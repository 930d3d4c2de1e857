//! # Memory Layout

use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, VirtualAddress, page_align_down, page_align_up,
};

/// Physical address at which RAM starts on the supported platforms.
pub const DRAM_BASE: u64 = 0x8000_0000;

/// Upper bound for the user stack, in pages.
pub const USER_STACK_MAX_PAGES: u64 = 2048;

/// The stack gets at most this fraction (as a shift) of the page pool.
pub const USER_STACK_POOL_SHIFT: u32 = 5;

/// Upper bound for the page table reserve, in pages.
pub const PAGE_TABLE_MAX_PAGES: u64 = 1024;

/// Page tables get this fraction (as a shift) of the page pool up front.
pub const PAGE_TABLE_POOL_SHIFT: u32 = 5;

const _: () = {
    assert!(DRAM_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_MAX_PAGES > 0);
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("first free address {first_free} lies outside RAM")]
    FirstFreeOutOfRange { first_free: PhysicalAddress },
    #[error("RAM size {0:#x} overflows the physical address space")]
    SizeOverflow(u64),
    #[error("no pages left for the page pool")]
    EmptyPool,
}

/// Physical memory as reported by the platform code.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    dram_base: PhysicalAddress,
    mem_size: u64,
    first_free: PhysicalAddress,
}

impl MemoryLayout {
    /// `first_free` is the first byte past the kernel image; it is rounded up
    /// to a page boundary for the pool.
    pub fn new(
        dram_base: PhysicalAddress,
        mem_size: u64,
        first_free: PhysicalAddress,
    ) -> Result<Self, LayoutError> {
        let end = dram_base
            .as_u64()
            .checked_add(mem_size)
            .ok_or(LayoutError::SizeOverflow(mem_size))?;
        if first_free < dram_base || first_free.as_u64() > end {
            return Err(LayoutError::FirstFreeOutOfRange { first_free });
        }

        let layout = Self {
            dram_base,
            mem_size,
            first_free,
        };
        if layout.pool_pages() == 0 {
            return Err(LayoutError::EmptyPool);
        }
        Ok(layout)
    }

    #[must_use]
    pub const fn dram_base(&self) -> PhysicalAddress {
        self.dram_base
    }

    #[must_use]
    pub const fn mem_size(&self) -> u64 {
        self.mem_size
    }

    #[must_use]
    pub const fn dram_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.dram_base.as_u64() + self.mem_size)
    }

    /// The kernel image, `[dram_base, first_free)` rounded up to a page.
    #[must_use]
    pub fn kernel_range(&self) -> (PhysicalAddress, u64) {
        (self.dram_base, self.pool_range().0.as_u64() - self.dram_base.as_u64())
    }

    /// Physical range handed to the page allocator.
    #[must_use]
    pub fn pool_range(&self) -> (PhysicalAddress, PhysicalAddress) {
        let end = page_align_down(self.dram_end().as_u64());
        let start = page_align_up(self.first_free.as_u64()).map_or(end, |s| s.min(end));
        (PhysicalAddress::new(start), PhysicalAddress::new(end))
    }

    #[must_use]
    pub fn pool_pages(&self) -> u64 {
        let (start, end) = self.pool_range();
        (end.as_u64() - start.as_u64()) / PAGE_SIZE
    }

    /// Top of the user-mappable range. Also the initial `brk_max`.
    #[must_use]
    pub fn mmap_max(&self) -> VirtualAddress {
        let pool_bytes = self.pool_pages() * PAGE_SIZE;
        VirtualAddress::new(page_align_down(self.dram_base.as_u64().min(pool_bytes)))
    }

    /// Size of the initial user stack in pages.
    #[must_use]
    pub fn user_stack_pages(&self) -> u64 {
        (self.pool_pages() >> USER_STACK_POOL_SHIFT).clamp(1, USER_STACK_MAX_PAGES)
    }

    /// Pool pages set aside for page tables.
    #[must_use]
    pub fn page_table_pages(&self) -> u64 {
        (self.pool_pages() >> PAGE_TABLE_POOL_SHIFT).clamp(1, PAGE_TABLE_MAX_PAGES)
    }
}
