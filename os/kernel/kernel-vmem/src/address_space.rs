//! # Address Space (Sv39, root-table based)
//!
//! A thin handle over a root [`PageTable`] frame that performs the three-level
//! walk. It owns nothing: frames come from a caller-provided [`FrameAlloc`] and
//! are reached through a [`PhysMapper`].
//!
//! - [`AddressSpace::walk`] finds the leaf slot for an address without
//!   touching the tree.
//! - [`AddressSpace::walk_or_create`] allocates missing intermediate tables on
//!   the way down.
//! - [`AddressSpace::tables_needed`] counts the tables `walk_or_create` would
//!   allocate for a range, so callers can reserve frames up front.
//!
//! The walker never interprets the leaf slot itself; callers decide whether it
//! holds a translation, a pending reference or nothing. It also never flushes
//! the TLB.

use crate::table::{LEVELS, PageTable, TableIndex};
use crate::{FrameAlloc, PageTableEntry, PhysMapper, PteKind, get_table};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WalkError {
    #[error("out of memory allocating a level-{level} page table")]
    OutOfMemory { level: usize },
    #[error("level-{level} entry for {va} is not a table pointer")]
    NotATable { va: VirtualAddress, level: usize },
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// `root` must be a zeroed or previously built root table.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    fn table(&self, page: PhysicalPage) -> &'m mut PageTable {
        unsafe { get_table(self.mapper, page) }
    }

    /// Leaf slot for `va`, or `None` if an intermediate table is missing.
    ///
    /// The returned reference aliases the table frame; callers must not hold
    /// two slots of the same table at once.
    pub fn walk(&self, va: VirtualAddress) -> Option<&'m mut PageTableEntry> {
        let mut table = self.table(self.root);
        for level in (1..LEVELS).rev() {
            match table.get(TableIndex::of(va, level)).kind() {
                PteKind::Table(next) => table = self.table(next),
                _ => return None,
            }
        }
        Some(table.entry_mut(TableIndex::of(va, 0)))
    }

    /// Leaf slot for `va`, allocating missing intermediate tables.
    ///
    /// # Errors
    /// - [`WalkError::OutOfMemory`] if `alloc` runs dry. Tables created before
    ///   the failure stay linked (they are empty and harmless).
    /// - [`WalkError::NotATable`] if a non-empty, non-table entry is in the way.
    pub fn walk_or_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<&'m mut PageTableEntry, WalkError> {
        let mut table = self.table(self.root);
        for level in (1..LEVELS).rev() {
            let idx = TableIndex::of(va, level);
            let next = match table.get(idx).kind() {
                PteKind::Table(next) => next,
                PteKind::Empty => {
                    let frame = alloc.alloc_4k().ok_or(WalkError::OutOfMemory { level: level - 1 })?;
                    table.set(idx, PageTableEntry::table(frame));
                    frame
                }
                _ => return Err(WalkError::NotATable { va, level }),
            };
            table = self.table(next);
        }
        Ok(table.entry_mut(TableIndex::of(va, 0)))
    }

    /// Number of intermediate tables [`walk_or_create`](Self::walk_or_create)
    /// would allocate to cover `[start, start + len)`.
    #[must_use]
    pub fn tables_needed(&self, start: VirtualAddress, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }
        let first = start.as_u64();
        let last = first.saturating_add(len - 1);
        let gib = TableIndex::span(2);
        let mib2 = TableIndex::span(1);

        let root = self.table(self.root);
        let mut missing = 0;
        let mut chunk = first / gib;
        while chunk <= last / gib {
            let lo = first.max(chunk * gib);
            let hi = last.min(chunk * gib + (gib - 1));
            let (lo_mid, hi_mid) = (lo / mib2, hi / mib2);

            match root.get(TableIndex::of(VirtualAddress::new(lo), 2)).kind() {
                PteKind::Table(mid) => {
                    let mid = self.table(mid);
                    for m in lo_mid..=hi_mid {
                        let va = VirtualAddress::new(m * mib2);
                        if !matches!(mid.get(TableIndex::of(va, 1)).kind(), PteKind::Table(_)) {
                            missing += 1;
                        }
                    }
                }
                _ => missing += 1 + (hi_mid - lo_mid + 1),
            }
            chunk += 1;
        }
        missing
    }

    /// Calls `f` for every non-empty last-level entry in address order and
    /// returns the number of table frames in the tree, root included.
    pub fn for_each_entry(&self, mut f: impl FnMut(VirtualAddress, PageTableEntry)) -> u64 {
        let mut tables = 1;
        let root = self.table(self.root);
        for (i2, top) in root.entries().iter().enumerate() {
            let PteKind::Table(mid) = top.kind() else {
                continue;
            };
            tables += 1;
            for (i1, e1) in self.table(mid).entries().iter().enumerate() {
                let PteKind::Table(leaf) = e1.kind() else {
                    continue;
                };
                tables += 1;
                for (i0, e0) in self.table(leaf).entries().iter().enumerate() {
                    if !e0.is_empty() {
                        let va = ((i2 as u64) << 30) | ((i1 as u64) << 21) | ((i0 as u64) << 12);
                        f(VirtualAddress::new(va), *e0);
                    }
                }
            }
        }
        tables
    }

    /// Physical address `va` translates to through a leaf, if any.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.walk(va)?.kind() {
            PteKind::Leaf { page, .. } => Some(page.join(va.page_offset())),
            _ => None,
        }
    }

    /// Install this space's root in `satp` (Sv39) and flush the TLB.
    ///
    /// # Safety
    /// The kernel's own code and data must be mapped in this space.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&self, asid: u16) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::satp::Satp;

        unsafe { Satp::sv39(self.root, asid).store_unsafe() };
        kernel_registers::tlb::flush_all();
    }
}
