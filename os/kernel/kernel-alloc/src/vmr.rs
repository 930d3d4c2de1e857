//! Virtual memory regions.
//!
//! A [`Vmr`] describes one `mmap` call: where it lives, what backs it and with
//! which protection. Page table entries that have not been faulted in yet
//! refer to their region through a [`VmrId`] stored in the entry itself, and
//! the region's `refcnt` counts exactly those entries. When the last one is
//! resolved or unmapped the region is released, dropping its file reference.
//!
//! Slots are recycled with a generation counter so that an id from a released
//! region can never resolve to its successor.

use crate::backing::BackingFile;
use crate::flags::Prot;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::PendingTag;

const INDEX_BITS: u32 = 24;
const GENERATION_BITS: u32 = 30;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

const _: () = assert!(INDEX_BITS + GENERATION_BITS <= PendingTag::BITS);

/// Upper bound on the number of slots a pool can address.
pub const MAX_SLOTS: usize = 1 << INDEX_BITS;

/// Generation-checked handle to a region.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VmrId {
    index: u32,
    generation: u32,
}

impl VmrId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[must_use]
    pub const fn to_tag(self) -> PendingTag {
        let packed = ((self.generation as u64) << INDEX_BITS) | self.index as u64;
        match PendingTag::new(packed) {
            Some(tag) => tag,
            None => unreachable!(),
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_tag(tag: PendingTag) -> Self {
        let v = tag.get();
        Self {
            index: (v & INDEX_MASK) as u32,
            generation: ((v >> INDEX_BITS) as u32) & GENERATION_MASK,
        }
    }
}

impl fmt::Debug for VmrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmrId({}#{})", self.index, self.generation)
    }
}

/// One mapping's description.
#[derive(Clone)]
pub struct Vmr {
    pub addr: VirtualAddress,
    pub length: u64,
    pub file: Option<Arc<dyn BackingFile>>,
    /// File offset of `addr`.
    pub offset: u64,
    pub prot: Prot,
    refcnt: u64,
}

impl Vmr {
    /// Number of pending entries that still refer to this region.
    #[must_use]
    pub const fn refcount(&self) -> u64 {
        self.refcnt
    }

    /// File offset backing the page at `va`.
    #[must_use]
    pub fn file_offset(&self, va: VirtualAddress) -> u64 {
        let delta = va.as_u64().wrapping_sub(self.addr.as_u64());
        self.offset.wrapping_add(delta)
    }
}

impl fmt::Debug for Vmr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vmr")
            .field("addr", &self.addr)
            .field("length", &self.length)
            .field("file", &self.file.is_some())
            .field("offset", &self.offset)
            .field("prot", &self.prot)
            .field("refcnt", &self.refcnt)
            .finish()
    }
}

struct Slot {
    generation: u32,
    vmr: Option<Vmr>,
}

/// Pool of region slots, grown one page worth of slots at a time.
pub struct VmrPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    max_slots: usize,
    live: usize,
}

impl VmrPool {
    /// Slots added per growth step.
    pub const SLOTS_PER_CHUNK: usize = {
        let n = PAGE_SIZE as usize / size_of::<Slot>();
        if n == 0 { 1 } else { n }
    };

    /// A pool that never holds more than `max_slots` live regions.
    #[must_use]
    pub const fn new(max_slots: usize) -> Self {
        let max_slots = if max_slots > MAX_SLOTS { MAX_SLOTS } else { max_slots };
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            max_slots,
            live: 0,
        }
    }

    /// Registers a region referenced by `page_count` pending entries.
    ///
    /// Returns `None` when the pool is at capacity.
    pub fn allocate(
        &mut self,
        addr: VirtualAddress,
        length: u64,
        file: Option<&Arc<dyn BackingFile>>,
        offset: u64,
        page_count: u64,
        prot: Prot,
    ) -> Option<VmrId> {
        debug_assert!(page_count > 0, "a region without references is released at once");
        let index = match self.free.pop() {
            Some(index) => index,
            None => self.grow()?,
        };
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.vmr.is_none());
        slot.vmr = Some(Vmr {
            addr,
            length,
            file: file.cloned(),
            offset,
            prot,
            refcnt: page_count,
        });
        self.live += 1;
        Some(VmrId {
            index,
            generation: slot.generation,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn grow(&mut self) -> Option<u32> {
        let have = self.slots.len();
        if have >= self.max_slots {
            return None;
        }
        let add = Self::SLOTS_PER_CHUNK.min(self.max_slots - have);
        self.slots.reserve_exact(add);
        self.slots.extend((0..add).map(|_| Slot {
            generation: 0,
            vmr: None,
        }));
        // hand out the lowest new index first
        self.free.extend((have + 1..have + add).rev().map(|i| i as u32));
        Some(have as u32)
    }

    /// Drops `n` references. Returns `true` if that released the region.
    ///
    /// # Panics
    /// On a stale id or if more references are dropped than exist; both mean
    /// the page tables and the pool disagree.
    pub fn release(&mut self, id: VmrId, n: u64) -> bool {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .unwrap_or_else(|| panic!("release of unknown region {id:?}"));
        let Some(vmr) = slot.vmr.as_mut() else {
            panic!("release of free region {id:?}");
        };
        assert!(
            vmr.refcnt >= n,
            "region {id:?} has {} references, dropping {n}",
            vmr.refcnt
        );
        vmr.refcnt -= n;
        if vmr.refcnt > 0 {
            return false;
        }

        slot.vmr = None;
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        self.free.push(id.index);
        self.live -= 1;
        true
    }

    #[must_use]
    pub fn get(&self, id: VmrId) -> Option<&Vmr> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.vmr.as_ref())
    }

    pub fn get_mut(&mut self, id: VmrId) -> Option<&mut Vmr> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.vmr.as_mut())
    }

    /// Live region with exactly this base and length.
    #[must_use]
    pub fn find_exact(&self, addr: VirtualAddress, length: u64) -> Option<VmrId> {
        self.iter()
            .find(|(_, v)| v.addr == addr && v.length == length)
            .map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VmrId, &Vmr)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            #[allow(clippy::cast_possible_truncation)]
            let id = VmrId {
                index: i as u32,
                generation: s.generation,
            };
            s.vmr.as_ref().map(|v| (id, v))
        })
    }

    #[must_use]
    pub const fn live(&self) -> usize {
        self.live
    }

    /// Regions that can still be allocated.
    #[must_use]
    pub const fn available(&self) -> usize {
        self.max_slots - self.live
    }
}

impl fmt::Debug for VmrPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmrPool")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .field("max_slots", &self.max_slots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn tag_round_trip_keeps_generation() {
        let id = VmrId {
            index: 0xab_cdef,
            generation: GENERATION_MASK,
        };
        assert_eq!(VmrId::from_tag(id.to_tag()), id);
    }

    #[test]
    fn released_after_last_reference() {
        let mut pool = VmrPool::new(4);
        let id = pool.allocate(va(0x1000), 0x3000, None, 0, 3, Prot::READ).unwrap();
        assert_eq!(pool.live(), 1);
        assert!(!pool.release(id, 2));
        assert_eq!(pool.get(id).unwrap().refcount(), 1);
        assert!(pool.release(id, 1));
        assert!(pool.get(id).is_none());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn recycled_slot_rejects_stale_id() {
        let mut pool = VmrPool::new(1);
        let old = pool.allocate(va(0x1000), 0x1000, None, 0, 1, Prot::READ).unwrap();
        assert!(pool.release(old, 1));
        let new = pool.allocate(va(0x2000), 0x1000, None, 0, 1, Prot::RW).unwrap();
        assert_eq!(old.index(), new.index());
        assert!(pool.get(old).is_none());
        assert_eq!(pool.get(new).unwrap().addr, va(0x2000));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut pool = VmrPool::new(2);
        let a = pool.allocate(va(0x1000), 0x1000, None, 0, 1, Prot::READ).unwrap();
        pool.allocate(va(0x2000), 0x1000, None, 0, 1, Prot::READ).unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.allocate(va(0x3000), 0x1000, None, 0, 1, Prot::READ).is_none());
        pool.release(a, 1);
        assert!(pool.allocate(va(0x3000), 0x1000, None, 0, 1, Prot::READ).is_some());
    }

    #[test]
    fn grows_past_first_chunk() {
        let n = VmrPool::SLOTS_PER_CHUNK + 3;
        let mut pool = VmrPool::new(n);
        let ids: Vec<_> = (0..n as u64)
            .map(|i| pool.allocate(va(i << 12), 0x1000, None, 0, 1, Prot::READ).unwrap())
            .collect();
        assert_eq!(pool.live(), n);
        assert_eq!(ids[n - 1].index(), n - 1);
    }

    #[test]
    fn find_exact_matches_base_and_length() {
        let mut pool = VmrPool::new(4);
        let id = pool.allocate(va(0x4000), 0x2000, None, 0, 2, Prot::READ).unwrap();
        assert_eq!(pool.find_exact(va(0x4000), 0x2000), Some(id));
        assert_eq!(pool.find_exact(va(0x4000), 0x1000), None);
    }

    #[test]
    #[should_panic(expected = "references")]
    fn over_release_panics() {
        let mut pool = VmrPool::new(1);
        let id = pool.allocate(va(0), 0x1000, None, 0, 1, Prot::READ).unwrap();
        pool.release(id, 2);
    }
}
