use crate::PageTableEntry;
use kernel_memory_addresses::{PAGE_SHIFT, VirtualAddress};

/// Entries per table.
pub const ENTRIES: usize = 512;

/// Levels of an Sv39 walk; level `LEVELS - 1` is the root.
pub const LEVELS: usize = 3;

const INDEX_BITS: u32 = 9;

/// Index into a page table at a given level (VPN\[level\]).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Extracts VPN\[`level`\] from `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: usize) -> Self {
        debug_assert!(level < LEVELS);
        let shift = PAGE_SHIFT + INDEX_BITS * level as u32;
        Self(((va.as_u64() >> shift) & (ENTRIES as u64 - 1)) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Bytes of virtual address space covered by one entry at `level`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn span(level: usize) -> u64 {
        1 << (PAGE_SHIFT + INDEX_BITS * level as u32)
    }
}

/// One page table: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn entries(&self) -> &[PageTableEntry; ENTRIES] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::empty(); ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must handle TLB maintenance when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub const fn entry_mut(&mut self, i: TableIndex) -> &mut PageTableEntry {
        &mut self.entries[i.as_usize()]
    }

    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::empty());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_empty())
    }
}
