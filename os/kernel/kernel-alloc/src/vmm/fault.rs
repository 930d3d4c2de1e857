//! Demand paging.
//!
//! A user access to a pending entry lands here through the trap handler. The
//! page is allocated, made reachable to the kernel through a temporary
//! kernel-only translation while it is filled, and only then given its final
//! user permissions.

use super::{FaultError, VmState};
use crate::backing::read_up_to;
use crate::flags::Prot;
use crate::vmr::VmrId;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::{AddressSpace, LeafPerms, PageTableEntry, PhysMapper, PteKind, frame_bytes};

impl<M: PhysMapper + Clone> VmState<M> {
    /// Makes the page containing `va` accessible for `access`.
    ///
    /// An empty `access` only populates the page; that is how eager mappings
    /// and kernel copies into user memory are served.
    ///
    /// # Errors
    /// - [`FaultError::Unmapped`] if nothing is mapped at `va`.
    /// - [`FaultError::ProtectionViolation`] if the page exists but does not
    ///   allow `access` from user mode.
    /// - [`FaultError::OutOfMemory`] or [`FaultError::BackingRead`] if the
    ///   page could not be populated; the entry stays pending.
    pub fn resolve_fault(&mut self, va: VirtualAddress, access: Prot) -> Result<(), FaultError> {
        self.stats.faults += 1;
        self.resolve(va, access)
    }

    /// [`resolve_fault`](Self::resolve_fault) without counting a fault.
    pub(super) fn resolve(&mut self, va: VirtualAddress, access: Prot) -> Result<(), FaultError> {
        let va = va.align_down();
        let Some(root) = self.root else {
            return Err(FaultError::Unmapped(va));
        };
        let mapper = self.mapper.clone();
        let aspace = AddressSpace::from_root(&mapper, root);
        let Some(slot) = aspace.walk(va) else {
            return Err(FaultError::Unmapped(va));
        };

        let perms = match slot.kind() {
            PteKind::Empty => return Err(FaultError::Unmapped(va)),
            PteKind::Leaf { perms, .. } => perms,
            PteKind::Pending(tag) => self.populate(slot, va, VmrId::from_tag(tag))?,
            PteKind::Table(_) | PteKind::Corrupt(_) => corrupt_entry(va, *slot),
        };

        let wanted = LeafPerms::from(access) | LeafPerms::USER;
        if !perms.contains(wanted) {
            log::debug!("vm: {access:?} fault at {va} denied by {perms:?}");
            return Err(FaultError::ProtectionViolation {
                addr: va,
                access,
                perms,
            });
        }
        Ok(())
    }

    /// Turns the pending `slot` for `va` into a populated leaf and returns
    /// the permissions it was given.
    fn populate(
        &mut self,
        slot: &mut PageTableEntry,
        va: VirtualAddress,
        id: VmrId,
    ) -> Result<LeafPerms, FaultError> {
        let Some(vmr) = self.vmrs.get(id) else {
            panic!("pending entry at {va} refers to dead region {id:?}");
        };
        let prot = vmr.prot;
        let file = vmr.file.clone();
        let file_offset = vmr.file_offset(va);

        let page = self.pages.alloc().ok_or(FaultError::OutOfMemory(va))?;

        // kernel-only while the contents are not final
        *slot = PageTableEntry::leaf(page, LeafPerms::READ | LeafPerms::WRITE);
        self.flush(va);

        if let Some(file) = file {
            let buf = unsafe { frame_bytes(&self.mapper, page) };
            match read_up_to(&*file, buf, file_offset) {
                Ok(n) => self.stats.file_bytes_read += n as u64,
                Err(source) => {
                    log::warn!("vm: reading offset {file_offset:#x} for {va} failed: {source}");
                    *slot = PageTableEntry::pending(id.to_tag());
                    self.flush(va);
                    self.pages.free(page);
                    return Err(FaultError::BackingRead { addr: va, source });
                }
            }
        }

        self.vmrs.release(id, 1);
        *slot = PageTableEntry::leaf(page, LeafPerms::from(prot) | LeafPerms::USER);
        self.flush(va);
        self.stats.pages_populated += 1;
        log::trace!("vm: populated {va} -> {page} ({prot:?})");

        match slot.kind() {
            PteKind::Leaf { perms, .. } => Ok(perms),
            _ => unreachable!(),
        }
    }

    /// Populates every page of `[addr, addr + len)`.
    pub(super) fn populate_range(&mut self, addr: VirtualAddress, len: u64) -> Result<(), FaultError> {
        let mut off = 0;
        while off < len {
            self.resolve(addr + off, Prot::empty())?;
            off += PAGE_SIZE;
        }
        Ok(())
    }
}

#[cold]
#[inline(never)]
pub(super) fn corrupt_entry(va: VirtualAddress, entry: PageTableEntry) -> ! {
    panic!("corrupt user page table entry at {va}: {entry:?}")
}
