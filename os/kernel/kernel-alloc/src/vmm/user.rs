//! Kernel-side access to the address space: supervisor mappings and copies
//! into user memory.

use super::{VmError, VmState};
use crate::flags::Prot;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, page_align_up};
use kernel_vmem::{AddressSpace, LeafPerms, PageTableEntry, PhysMapper, frame_bytes};

impl<M: PhysMapper + Clone> VmState<M> {
    /// Maps `[va, va + len)` to `[pa, pa + len)` for the supervisor only.
    ///
    /// Used for the kernel image and MMIO. These pages are not owned by the
    /// page allocator and are never freed.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] for unaligned addresses or if a
    ///   user mapping is in the way.
    /// - [`VmError::OutOfMemory`] if a page table page cannot be allocated.
    pub fn map_kernel_range(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        perms: LeafPerms,
    ) -> Result<(), VmError> {
        if !va.is_page_aligned() || !pa.is_page_aligned() {
            return Err(VmError::InvalidArgument);
        }
        let len = page_align_up(len).ok_or(VmError::InvalidArgument)?;
        if self.layout.contains_range(va, 1) {
            return Err(VmError::InvalidArgument);
        }
        let root = self.ensure_root()?;
        let mapper = self.mapper.clone();
        let aspace = AddressSpace::from_root(&mapper, root);
        let perms = perms.access();

        let mut off = 0;
        while off < len {
            let slot = aspace.walk_or_create(&mut self.table_frames(), va + off)?;
            *slot = PageTableEntry::leaf((pa + off).page(), perms);
            self.flush(va + off);
            off += PAGE_SIZE;
        }
        log::debug!("vm: kernel map {va}+{len:#x} -> {pa} {perms:?}");
        Ok(())
    }

    /// Copies `bytes` to user address `va`, populating pages as needed.
    ///
    /// Page permissions are not checked; this is how the loader fills
    /// read-only segments.
    ///
    /// # Errors
    /// [`VmError::BadAddress`] if part of the range is unmapped, or the
    /// population error.
    pub fn write_user(&mut self, va: VirtualAddress, bytes: &[u8]) -> Result<(), VmError> {
        let mut done = 0;
        self.for_each_user_chunk(va, bytes.len() as u64, |frame| {
            let n = frame.len();
            frame.copy_from_slice(&bytes[done..done + n]);
            done += n;
        })
    }

    /// Zeroes `len` bytes at user address `va`.
    ///
    /// # Errors
    /// As [`write_user`](Self::write_user).
    pub fn zero_user(&mut self, va: VirtualAddress, len: u64) -> Result<(), VmError> {
        self.for_each_user_chunk(va, len, |frame| frame.fill(0))
    }

    /// Reads `buf.len()` bytes from user address `va`.
    ///
    /// # Errors
    /// As [`write_user`](Self::write_user).
    pub fn read_user(&mut self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), VmError> {
        let mut done = 0;
        self.for_each_user_chunk(va, buf.len() as u64, |frame| {
            let n = frame.len();
            buf[done..done + n].copy_from_slice(frame);
            done += n;
        })
    }

    fn for_each_user_chunk(
        &mut self,
        va: VirtualAddress,
        len: u64,
        mut f: impl FnMut(&mut [u8]),
    ) -> Result<(), VmError> {
        let end = va.checked_add(len).ok_or(VmError::BadAddress)?;
        if !self.layout.contains_range(va, len) {
            return Err(VmError::BadAddress);
        }
        let mut cur = va;
        while cur < end {
            self.resolve(cur, Prot::empty())?;
            let pa = self.translate(cur).ok_or(VmError::BadAddress)?;
            let frame = unsafe { frame_bytes(&self.mapper, pa.page()) };
            let start = usize::try_from(cur.page_offset()).map_err(|_| VmError::BadAddress)?;
            let n = (PAGE_SIZE - cur.page_offset()).min(end.as_u64() - cur.as_u64());
            let n = usize::try_from(n).map_err(|_| VmError::BadAddress)?;
            f(&mut frame[start..start + n]);
            cur += n as u64;
        }
        Ok(())
    }
}
