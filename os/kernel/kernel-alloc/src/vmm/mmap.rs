//! `mmap`, `munmap`, `mprotect`, `mremap` and `brk`.

use super::fault::corrupt_entry;
use super::{FaultError, VmError, VmState};
use crate::backing::BackingFile;
use crate::flags::{MapFlags, MremapFlags, Prot};
use crate::vmr::VmrId;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, page_align_up};
use kernel_vmem::{AddressSpace, LeafPerms, PageTableEntry, PhysMapper, PteKind};

/// A new mapping after argument validation.
struct Mapping {
    len: u64,
    prot: Prot,
    file: Option<Arc<dyn BackingFile>>,
    offset: u64,
    populate: bool,
}

impl<M: PhysMapper + Clone> VmState<M> {
    /// Maps `len` bytes and returns the base address.
    ///
    /// Without `MAP_FIXED`, `addr` is ignored and the highest free run below
    /// the previous placement is used. With it, whatever was mapped there
    /// before is replaced. Pages are populated on first touch unless
    /// `MAP_POPULATE` is given or demand paging is off.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] for a zero length, an unaligned offset
    ///   or fixed address, a file range that overflows, a shared or
    ///   non-private mapping, or a fixed range outside user space.
    /// - [`VmError::BadFileDescriptor`] for a file mapping without a file.
    /// - [`VmError::OutOfMemory`] if no address range, page table page or
    ///   region slot is available.
    /// - [`VmError::Io`] if populating eagerly failed to read the file; the
    ///   mapping is removed again.
    pub fn mmap(
        &mut self,
        addr: VirtualAddress,
        len: u64,
        prot: Prot,
        flags: MapFlags,
        file: Option<Arc<dyn BackingFile>>,
        offset: u64,
    ) -> Result<VirtualAddress, VmError> {
        if len == 0 || !offset.is_multiple_of(PAGE_SIZE) {
            return Err(VmError::InvalidArgument);
        }
        if flags.contains(MapFlags::SHARED) || !flags.contains(MapFlags::PRIVATE) {
            return Err(VmError::InvalidArgument);
        }
        let file = if flags.contains(MapFlags::ANONYMOUS) {
            None
        } else {
            Some(file.ok_or(VmError::BadFileDescriptor)?)
        };
        let len = page_align_up(len).ok_or(VmError::OutOfMemory)?;
        if offset.checked_add(len).is_none() {
            return Err(VmError::InvalidArgument);
        }

        let fixed = if flags.contains(MapFlags::FIXED) {
            if !addr.is_page_aligned() || !self.layout.contains_range(addr, len) {
                return Err(VmError::InvalidArgument);
            }
            Some(addr)
        } else {
            None
        };

        let populate = flags.contains(MapFlags::POPULATE) || !self.demand_paging;
        let base = self.map_locked(
            fixed,
            Mapping {
                len,
                prot,
                file,
                offset,
                populate,
            },
        )?;
        self.layout.reserve_above_heap(base, base + len);
        self.stats.mmaps += 1;
        log::debug!("vm: mmap {base}+{len:#x} {prot:?} {flags:?}");
        Ok(base)
    }

    /// Installs a validated mapping at `fixed` or at a free run.
    fn map_locked(&mut self, fixed: Option<VirtualAddress>, m: Mapping) -> Result<VirtualAddress, VmError> {
        let root = self.ensure_root()?;
        let npages = m.len / PAGE_SIZE;

        let addr = match fixed {
            Some(addr) => addr,
            None => self.find_free_run(npages).ok_or(VmError::OutOfMemory)?,
        };

        let mapper = self.mapper.clone();
        let aspace = AddressSpace::from_root(&mapper, root);
        let data_pages = if m.populate { npages } else { 0 };
        let tables = aspace.tables_needed(addr, m.len).saturating_sub(self.reserve_free());
        if tables + data_pages > self.pages.free_count() {
            return Err(VmError::OutOfMemory);
        }
        let id = self
            .vmrs
            .allocate(addr, m.len, m.file.as_ref(), m.offset, npages, m.prot)
            .ok_or(VmError::OutOfMemory)?;
        let tag = id.to_tag();

        for i in 0..npages {
            let va = addr + i * PAGE_SIZE;
            let created = aspace.walk_or_create(&mut self.table_frames(), va);
            let slot = match created {
                Ok(slot) => slot,
                Err(e) => {
                    self.unmap_range(addr, i);
                    self.vmrs.release(id, npages - i);
                    return Err(e.into());
                }
            };
            if !slot.is_empty() {
                self.clear_slot(slot, va);
            }
            *slot = PageTableEntry::pending(tag);
        }

        if fixed.is_none() {
            self.layout.set_hint(addr);
        }

        if m.populate {
            if let Err(e) = self.populate_range(addr, m.len) {
                self.unmap_range(addr, npages);
                return Err(match e {
                    FaultError::BackingRead { source, .. } => VmError::Io(source),
                    _ => VmError::OutOfMemory,
                });
            }
        }
        Ok(addr)
    }

    /// Highest run of `npages` unmapped pages below the hint, wrapping to
    /// the top of user space once.
    fn find_free_run(&self, npages: u64) -> Option<VirtualAddress> {
        let top = self.layout.mmap_hint();
        let max = self.layout.mmap_max();
        self.scan_down(top, npages)
            .or_else(|| if top < max { self.scan_down(max, npages) } else { None })
    }

    fn scan_down(&self, top: VirtualAddress, npages: u64) -> Option<VirtualAddress> {
        let floor = self.layout.mmap_floor().as_u64();
        let mut va = top.as_u64();
        let mut run = 0;
        while va >= floor + PAGE_SIZE {
            va -= PAGE_SIZE;
            if self.is_unmapped(VirtualAddress::new(va)) {
                run += 1;
                if run == npages {
                    return Some(VirtualAddress::new(va));
                }
            } else {
                run = 0;
            }
        }
        None
    }

    fn is_unmapped(&self, va: VirtualAddress) -> bool {
        let Some(root) = self.root else {
            return true;
        };
        AddressSpace::from_root(&self.mapper, root)
            .walk(va)
            .is_none_or(|slot| slot.is_empty())
    }

    /// Empties a non-empty user slot, giving back what it held.
    fn clear_slot(&mut self, slot: &mut PageTableEntry, va: VirtualAddress) {
        match slot.kind() {
            PteKind::Empty => return,
            PteKind::Leaf { page, .. } => self.pages.free(page),
            PteKind::Pending(tag) => {
                self.vmrs.release(VmrId::from_tag(tag), 1);
            }
            PteKind::Table(_) | PteKind::Corrupt(_) => corrupt_entry(va, *slot),
        }
        *slot = PageTableEntry::empty();
        self.flush(va);
    }

    /// Unmaps `npages` pages from `addr`. Holes are skipped.
    fn unmap_range(&mut self, addr: VirtualAddress, npages: u64) {
        let Some(root) = self.root else {
            return;
        };
        let mapper = self.mapper.clone();
        let aspace = AddressSpace::from_root(&mapper, root);
        for i in 0..npages {
            let va = addr + i * PAGE_SIZE;
            if let Some(slot) = aspace.walk(va) {
                self.clear_slot(slot, va);
            }
        }
    }

    /// Removes every page of `[addr, addr + len)`.
    ///
    /// # Errors
    /// [`VmError::InvalidArgument`] for an unaligned address, a zero length or
    /// a range outside user space.
    pub fn munmap(&mut self, addr: VirtualAddress, len: u64) -> Result<(), VmError> {
        if !addr.is_page_aligned() || len == 0 {
            return Err(VmError::InvalidArgument);
        }
        let len = page_align_up(len).ok_or(VmError::InvalidArgument)?;
        if !self.layout.contains_range(addr, len) {
            return Err(VmError::InvalidArgument);
        }
        self.unmap_range(addr, len / PAGE_SIZE);
        self.stats.munmaps += 1;
        log::debug!("vm: munmap {addr}+{len:#x}");
        Ok(())
    }

    /// Changes the protection of `[addr, addr + len)` to `prot`.
    ///
    /// Only narrowing is allowed: each page's new permissions must be a
    /// subset of what its mapping was created with (pending pages) or
    /// currently has (resolved pages). Either every page changes or none
    /// does.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] for an unaligned address.
    /// - [`VmError::OutOfMemory`] if part of the range is unmapped or a
    ///   region would have to be split without a free slot.
    /// - [`VmError::AccessDenied`] if the change would widen any page.
    pub fn mprotect(&mut self, addr: VirtualAddress, len: u64, prot: Prot) -> Result<(), VmError> {
        if !addr.is_page_aligned() {
            return Err(VmError::InvalidArgument);
        }
        let len = page_align_up(len).ok_or(VmError::OutOfMemory)?;
        if len == 0 {
            return Ok(());
        }
        if !self.layout.contains_range(addr, len) {
            return Err(VmError::OutOfMemory);
        }
        let Some(root) = self.root else {
            return Err(VmError::OutOfMemory);
        };
        let prot = prot & Prot::RWX;
        let wanted = LeafPerms::from(prot);
        let npages = len / PAGE_SIZE;
        let mapper = self.mapper.clone();
        let aspace = AddressSpace::from_root(&mapper, root);

        // pass 1: validate, and count pending entries per region
        let mut pending: BTreeMap<VmrId, u64> = BTreeMap::new();
        for i in 0..npages {
            let va = addr + i * PAGE_SIZE;
            let slot = aspace.walk(va).ok_or(VmError::OutOfMemory)?;
            match slot.kind() {
                PteKind::Empty => return Err(VmError::OutOfMemory),
                PteKind::Pending(tag) => {
                    let id = VmrId::from_tag(tag);
                    let Some(vmr) = self.vmrs.get(id) else {
                        panic!("pending entry at {va} refers to dead region {id:?}");
                    };
                    if !LeafPerms::from(vmr.prot).contains(wanted) {
                        return Err(VmError::AccessDenied);
                    }
                    *pending.entry(id).or_default() += 1;
                }
                PteKind::Leaf { perms, .. } => {
                    if !perms.contains(LeafPerms::USER) || !perms.contains(wanted) {
                        return Err(VmError::AccessDenied);
                    }
                }
                PteKind::Table(_) | PteKind::Corrupt(_) => corrupt_entry(va, *slot),
            }
        }
        let splits = pending
            .iter()
            .filter(|&(id, n)| self.vmrs.get(*id).is_some_and(|v| v.refcount() > *n))
            .count();
        if self.vmrs.available() < splits {
            return Err(VmError::OutOfMemory);
        }

        // pass 2: cannot fail
        let mut moved: BTreeMap<VmrId, VmrId> = BTreeMap::new();
        for (&id, &n) in &pending {
            let Some(vmr) = self.vmrs.get_mut(id) else {
                continue;
            };
            if vmr.refcount() == n {
                vmr.prot = prot;
                continue;
            }
            // the split covers only the part of the region inside the range
            let lo = vmr.addr.max(addr);
            let hi = (vmr.addr + vmr.length).min(addr + len);
            let offset = vmr.offset + (lo.as_u64() - vmr.addr.as_u64());
            let file = vmr.file.clone();
            let length = hi.as_u64() - lo.as_u64();
            let Some(split) = self.vmrs.allocate(lo, length, file.as_ref(), offset, n, prot) else {
                panic!("region slot vanished while the VM lock was held");
            };
            self.vmrs.release(id, n);
            moved.insert(id, split);
        }
        for i in 0..npages {
            let va = addr + i * PAGE_SIZE;
            let Some(slot) = aspace.walk(va) else {
                continue;
            };
            match slot.kind() {
                PteKind::Pending(tag) => {
                    if let Some(split) = moved.get(&VmrId::from_tag(tag)) {
                        *slot = PageTableEntry::pending(split.to_tag());
                    }
                }
                PteKind::Leaf { page, .. } => {
                    *slot = PageTableEntry::leaf(page, wanted | LeafPerms::USER);
                    self.flush(va);
                }
                _ => {}
            }
        }
        log::debug!("vm: mprotect {addr}+{len:#x} {prot:?}");
        Ok(())
    }

    /// Grows or shrinks the mapping created at `addr` with length `old_len`,
    /// in place.
    ///
    /// Growth maps the continuation of the same file (or more anonymous
    /// memory) directly above; it fails rather than moves.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] for unaligned arguments, a zero new
    ///   length, `MREMAP_FIXED`, no mapping matching `addr` and `old_len`
    ///   exactly, or a file range that would overflow.
    /// - [`VmError::OutOfMemory`] if the range above is not free.
    pub fn mremap(
        &mut self,
        addr: VirtualAddress,
        old_len: u64,
        new_len: u64,
        flags: MremapFlags,
    ) -> Result<VirtualAddress, VmError> {
        if !addr.is_page_aligned()
            || !old_len.is_multiple_of(PAGE_SIZE)
            || !new_len.is_multiple_of(PAGE_SIZE)
            || new_len == 0
            || flags.contains(MremapFlags::FIXED)
        {
            return Err(VmError::InvalidArgument);
        }
        let id = self.vmrs.find_exact(addr, old_len).ok_or(VmError::InvalidArgument)?;

        if new_len > old_len {
            let tail = addr + old_len;
            let grow = new_len - old_len;
            let Some(vmr) = self.vmrs.get(id) else {
                return Err(VmError::InvalidArgument);
            };
            let offset = vmr
                .offset
                .checked_add(old_len)
                .filter(|o| o.checked_add(grow).is_some())
                .ok_or(VmError::InvalidArgument)?;
            let (prot, file) = (vmr.prot, vmr.file.clone());
            if !self.layout.contains_range(tail, grow) {
                return Err(VmError::OutOfMemory);
            }
            if !(0..grow / PAGE_SIZE).all(|i| self.is_unmapped(tail + i * PAGE_SIZE)) {
                return Err(VmError::OutOfMemory);
            }
            let m = Mapping {
                len: grow,
                prot,
                file,
                offset,
                populate: !self.demand_paging,
            };
            self.map_locked(Some(tail), m)?;
            self.layout.reserve_above_heap(tail, addr + new_len);
        } else if new_len < old_len {
            self.unmap_range(addr + new_len, (old_len - new_len) / PAGE_SIZE);
        }

        if let Some(vmr) = self.vmrs.get_mut(id) {
            vmr.length = new_len;
        }
        log::debug!("vm: mremap {addr} {old_len:#x} -> {new_len:#x}");
        Ok(addr)
    }

    /// Moves the program break and returns the new break.
    ///
    /// The request is clamped to `[brk_min, brk_max]`. Heap pages are
    /// anonymous and read-write-execute. If growing fails, the break stays
    /// where it was and that value is returned.
    pub fn brk(&mut self, addr: VirtualAddress) -> VirtualAddress {
        let (lo, hi) = (self.layout.brk_min(), self.layout.brk_max());
        let new = addr.clamp(lo, hi);
        let old_end = self.layout.heap_end();
        let new_end = VirtualAddress::new(new.as_u64().next_multiple_of(PAGE_SIZE));

        if new_end < old_end {
            self.unmap_range(new_end, (old_end.as_u64() - new_end.as_u64()) / PAGE_SIZE);
        } else if new_end > old_end {
            let m = Mapping {
                len: new_end.as_u64() - old_end.as_u64(),
                prot: Prot::RWX,
                file: None,
                offset: 0,
                populate: !self.demand_paging,
            };
            if let Err(e) = self.map_locked(Some(old_end), m) {
                log::debug!("vm: brk to {new} failed: {e}");
                return self.layout.brk();
            }
        }
        self.layout.set_brk(new);
        new
    }
}
