//! The VM core: one address space, one lock.
//!
//! [`VmState`] holds everything the memory system calls touch: the page
//! allocator, the region pool, the root page table and the heap/mmap layout.
//! [`Vm`] wraps it in a [`SpinLock`]; every public operation takes the lock
//! once for its whole duration, page fault resolution included.

mod error;
mod fault;
mod layout;
mod mmap;
mod user;

pub use error::{FaultError, VmError};
pub use layout::AddressLayout;

use crate::backing::BackingFile;
use crate::flags::{MapFlags, MremapFlags, Prot};
use crate::page_alloc::{PageAllocError, PageAllocator};
use crate::vmr::VmrPool;
use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_sync::{SpinLock, SpinLockGuard};
use kernel_vmem::{AddressSpace, FrameAlloc, LeafPerms, PhysMapper, PteKind};

/// Default cap on live regions.
pub const DEFAULT_MAX_VMRS: usize = 4096;

/// Default number of pool pages set aside for page tables.
pub const DEFAULT_TABLE_PAGES: u64 = 16;

/// Boot-time knobs of the VM core.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VmConfig {
    /// When off, every mapping is populated eagerly as if `MAP_POPULATE`
    /// had been given.
    pub demand_paging: bool,
    /// Randomize physical page reuse order.
    pub page_shuffle_seed: Option<u64>,
    pub max_vmrs: usize,
    /// Pages carved off the front of the pool for page table frames. Tables
    /// fall back to the data pool once these run out. Clamped so at least one
    /// data page remains.
    pub table_pages: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            demand_paging: true,
            page_shuffle_seed: None,
            max_vmrs: DEFAULT_MAX_VMRS,
            table_pages: DEFAULT_TABLE_PAGES,
        }
    }
}

/// Event counters, reported at shutdown with `-s`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct VmStats {
    pub faults: u64,
    pub pages_populated: u64,
    pub file_bytes_read: u64,
    pub tlb_flushes: u64,
    pub mmaps: u64,
    pub munmaps: u64,
}

impl fmt::Display for VmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} populated={} file_bytes={} tlb_flushes={} mmaps={} munmaps={}",
            self.faults,
            self.pages_populated,
            self.file_bytes_read,
            self.tlb_flushes,
            self.mmaps,
            self.munmaps
        )
    }
}

/// What the page tables currently hold.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Census {
    /// Page table frames, root included.
    pub tables: u64,
    /// Populated user pages.
    pub resident: u64,
    /// Pending entries.
    pub pending: u64,
    /// Supervisor leaves from [`VmState::map_kernel_range`].
    pub kernel: u64,
}

/// Unlocked VM state. Reach it through [`Vm::lock`] to batch operations.
pub struct VmState<M: PhysMapper + Clone> {
    mapper: M,
    pages: PageAllocator<M>,
    tables: Option<PageAllocator<M>>,
    vmrs: VmrPool,
    root: Option<PhysicalPage>,
    layout: AddressLayout,
    demand_paging: bool,
    stats: VmStats,
}

impl<M: PhysMapper + Clone> VmState<M> {
    /// State over the physical pool `[pool_start, pool_end)` with user
    /// mappings confined below `mmap_max`.
    ///
    /// # Errors
    /// If the pool range is unusable.
    pub fn new(
        mapper: M,
        pool_start: PhysicalAddress,
        pool_end: PhysicalAddress,
        mmap_max: VirtualAddress,
        config: VmConfig,
    ) -> Result<Self, PageAllocError> {
        let mut pages = PageAllocator::new(mapper.clone(), pool_start, pool_end)?;
        let reserve = config.table_pages.min(pages.total_count().saturating_sub(1));
        let tables = pages.split_front(reserve);
        if let Some(seed) = config.page_shuffle_seed {
            pages = pages.with_shuffle(seed);
        }
        log::debug!(
            "vm: {} data pages and {reserve} table pages in {pool_start}..{pool_end}, mmap_max {mmap_max}",
            pages.total_count()
        );
        Ok(Self {
            mapper,
            pages,
            tables,
            vmrs: VmrPool::new(config.max_vmrs),
            root: None,
            layout: AddressLayout::new(mmap_max.align_down()),
            demand_paging: config.demand_paging,
            stats: VmStats::default(),
        })
    }

    /// The root table, allocated on first use.
    fn ensure_root(&mut self) -> Result<PhysicalPage, VmError> {
        if let Some(root) = self.root {
            return Ok(root);
        }
        let root = self.table_frames().alloc_4k().ok_or(VmError::OutOfMemory)?;
        log::trace!("vm: root table at {root}");
        self.root = Some(root);
        Ok(root)
    }

    /// Frames for page tables: the reserve first, then the data pool.
    fn table_frames(&mut self) -> TableFrames<'_, M> {
        TableFrames {
            reserve: self.tables.as_mut(),
            pool: &mut self.pages,
        }
    }

    /// Free reserve pages a walk can use before it dips into the data pool.
    fn reserve_free(&self) -> u64 {
        self.tables.as_ref().map_or(0, PageAllocator::free_count)
    }

    /// The root table, if any mapping was ever made.
    #[must_use]
    pub const fn root(&self) -> Option<PhysicalPage> {
        self.root
    }

    #[must_use]
    pub const fn layout(&self) -> AddressLayout {
        self.layout
    }

    #[must_use]
    pub const fn stats(&self) -> VmStats {
        self.stats
    }

    /// Free data pages. Page table frames taken from the reserve do not
    /// count against this.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.pages.free_count()
    }

    /// `(free, total)` pages of the page table reserve.
    #[must_use]
    pub fn table_reserve(&self) -> (u64, u64) {
        self.tables
            .as_ref()
            .map_or((0, 0), |t| (t.free_count(), t.total_count()))
    }

    #[must_use]
    pub const fn live_vmrs(&self) -> usize {
        self.vmrs.live()
    }

    #[must_use]
    pub const fn vmrs(&self) -> &VmrPool {
        &self.vmrs
    }

    /// Sets the lowest heap address, normally the end of the loaded image.
    ///
    /// # Errors
    /// [`VmError::InvalidArgument`] if `brk_min` is above the current
    /// `brk_max`.
    pub fn init_brk(&mut self, brk_min: VirtualAddress) -> Result<(), VmError> {
        self.layout.init_brk(brk_min)
    }

    /// Physical address `va` currently translates to, if resolved.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let root = self.root?;
        AddressSpace::from_root(&self.mapper, root).translate(va)
    }

    /// Installs this address space in `satp`.
    ///
    /// # Safety
    /// The kernel image and everything the trap path touches must be mapped
    /// (see [`map_kernel_range`](Self::map_kernel_range)).
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&mut self) -> Result<(), VmError> {
        let root = self.ensure_root()?;
        unsafe { AddressSpace::from_root(&self.mapper, root).activate(0) };
        Ok(())
    }

    /// Walks the whole tree and counts what it holds.
    #[must_use]
    pub fn census(&self) -> Census {
        let Some(root) = self.root else {
            return Census::default();
        };
        let (mut resident, mut pending, mut kernel) = (0, 0, 0);
        let tables = AddressSpace::from_root(&self.mapper, root).for_each_entry(|_, e| match e.kind() {
            PteKind::Leaf { perms, .. } if perms.contains(LeafPerms::USER) => resident += 1,
            PteKind::Leaf { .. } => kernel += 1,
            PteKind::Pending(_) => pending += 1,
            _ => {}
        });
        Census {
            tables,
            resident,
            pending,
            kernel,
        }
    }

    /// Pages of the data pool in total, reserve excluded.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.pages.total_count()
    }

    fn flush(&mut self, va: VirtualAddress) {
        kernel_registers::tlb::flush_page(va);
        self.stats.tlb_flushes += 1;
    }
}

/// Page table frames come from the reserve while it lasts.
struct TableFrames<'a, M: PhysMapper> {
    reserve: Option<&'a mut PageAllocator<M>>,
    pool: &'a mut PageAllocator<M>,
}

impl<M: PhysMapper> FrameAlloc for TableFrames<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.reserve
            .as_deref_mut()
            .and_then(PageAllocator::alloc)
            .or_else(|| self.pool.alloc())
    }

    fn free_4k(&mut self, page: PhysicalPage) {
        match self.reserve.as_deref_mut() {
            Some(reserve) if reserve.contains(page) => reserve.free(page),
            _ => self.pool.free(page),
        }
    }
}

/// The locked VM core shared by the trap handler and system calls.
pub struct Vm<M: PhysMapper + Clone> {
    state: SpinLock<VmState<M>>,
}

impl<M: PhysMapper + Clone> Vm<M> {
    #[must_use]
    pub const fn from_state(state: VmState<M>) -> Self {
        Self {
            state: SpinLock::new(state),
        }
    }

    /// See [`VmState::new`].
    ///
    /// # Errors
    /// If the pool range is unusable.
    pub fn new(
        mapper: M,
        pool_start: PhysicalAddress,
        pool_end: PhysicalAddress,
        mmap_max: VirtualAddress,
        config: VmConfig,
    ) -> Result<Self, PageAllocError> {
        VmState::new(mapper, pool_start, pool_end, mmap_max, config).map(Self::from_state)
    }

    /// Holds the VM lock for a batch of operations.
    pub fn lock(&self) -> SpinLockGuard<'_, VmState<M>> {
        self.state.lock()
    }

    /// # Errors
    /// See [`VmState::mmap`].
    pub fn mmap(
        &self,
        addr: VirtualAddress,
        len: u64,
        prot: Prot,
        flags: MapFlags,
        file: Option<Arc<dyn BackingFile>>,
        offset: u64,
    ) -> Result<VirtualAddress, VmError> {
        self.lock().mmap(addr, len, prot, flags, file, offset)
    }

    /// # Errors
    /// See [`VmState::munmap`].
    pub fn munmap(&self, addr: VirtualAddress, len: u64) -> Result<(), VmError> {
        self.lock().munmap(addr, len)
    }

    /// # Errors
    /// See [`VmState::mprotect`].
    pub fn mprotect(&self, addr: VirtualAddress, len: u64, prot: Prot) -> Result<(), VmError> {
        self.lock().mprotect(addr, len, prot)
    }

    /// # Errors
    /// See [`VmState::mremap`].
    pub fn mremap(
        &self,
        addr: VirtualAddress,
        old_len: u64,
        new_len: u64,
        flags: MremapFlags,
    ) -> Result<VirtualAddress, VmError> {
        self.lock().mremap(addr, old_len, new_len, flags)
    }

    pub fn brk(&self, addr: VirtualAddress) -> VirtualAddress {
        self.lock().brk(addr)
    }

    /// # Errors
    /// See [`VmState::resolve_fault`].
    pub fn resolve_fault(&self, va: VirtualAddress, access: Prot) -> Result<(), FaultError> {
        self.lock().resolve_fault(va, access)
    }

    /// # Errors
    /// See [`VmState::map_kernel_range`].
    pub fn map_kernel_range(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        perms: LeafPerms,
    ) -> Result<(), VmError> {
        self.lock().map_kernel_range(va, pa, len, perms)
    }

    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lock().translate(va)
    }

    #[must_use]
    pub fn stats(&self) -> VmStats {
        self.lock().stats()
    }

    /// How often the VM lock was taken, and how often it had to spin.
    #[must_use]
    pub fn lock_stats(&self) -> kernel_sync::LockStats {
        self.state.stats()
    }

    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.lock().free_pages()
    }

    #[must_use]
    pub fn table_reserve(&self) -> (u64, u64) {
        self.lock().table_reserve()
    }
}
