use super::VmError;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};

/// Heap and mmap bounds of the user address space.
///
/// `brk_min <= brk <= brk_max <= mmap_max` holds at all times. `brk_max` only
/// ever moves down, as mappings are placed above the heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressLayout {
    brk_min: VirtualAddress,
    brk: VirtualAddress,
    brk_max: VirtualAddress,
    mmap_max: VirtualAddress,
    mmap_hint: VirtualAddress,
}

impl AddressLayout {
    pub(super) const fn new(mmap_max: VirtualAddress) -> Self {
        Self {
            brk_min: VirtualAddress::zero(),
            brk: VirtualAddress::zero(),
            brk_max: mmap_max,
            mmap_max,
            mmap_hint: mmap_max,
        }
    }

    pub(super) fn init_brk(&mut self, brk_min: VirtualAddress) -> Result<(), VmError> {
        let heap = brk_min.align_up().ok_or(VmError::InvalidArgument)?;
        if heap > self.brk_max {
            return Err(VmError::InvalidArgument);
        }
        self.brk_min = brk_min;
        self.brk = brk_min;
        Ok(())
    }

    #[must_use]
    pub const fn brk_min(&self) -> VirtualAddress {
        self.brk_min
    }

    /// The break as last set by the program.
    #[must_use]
    pub const fn brk(&self) -> VirtualAddress {
        self.brk
    }

    /// First address above the mapped heap.
    #[must_use]
    pub fn heap_end(&self) -> VirtualAddress {
        // brk <= brk_max, which is page aligned
        VirtualAddress::new(self.brk.as_u64().next_multiple_of(PAGE_SIZE))
    }

    #[must_use]
    pub const fn brk_max(&self) -> VirtualAddress {
        self.brk_max
    }

    #[must_use]
    pub const fn mmap_max(&self) -> VirtualAddress {
        self.mmap_max
    }

    /// Where the next non-fixed search starts.
    #[must_use]
    pub const fn mmap_hint(&self) -> VirtualAddress {
        self.mmap_hint
    }

    /// Lowest address a non-fixed mapping may use. Page zero is never handed
    /// out.
    pub(super) fn mmap_floor(&self) -> VirtualAddress {
        let heap = self.heap_end();
        if heap.as_u64() < PAGE_SIZE {
            VirtualAddress::new(PAGE_SIZE)
        } else {
            heap
        }
    }

    /// Whether `[addr, addr + len)` lies in user space.
    pub(super) fn contains_range(&self, addr: VirtualAddress, len: u64) -> bool {
        addr.checked_add(len).is_some_and(|end| end <= self.mmap_max)
    }

    pub(super) fn set_brk(&mut self, brk: VirtualAddress) {
        debug_assert!(brk >= self.brk_min && brk <= self.brk_max);
        self.brk = brk;
    }

    pub(super) fn set_hint(&mut self, hint: VirtualAddress) {
        self.mmap_hint = hint;
    }

    /// Keeps future heap growth clear of a new mapping at `[addr, end)`.
    pub(super) fn reserve_above_heap(&mut self, addr: VirtualAddress, end: VirtualAddress) {
        let heap = self.heap_end();
        if end > heap {
            let cap = addr.max(heap);
            if cap < self.brk_max {
                self.brk_max = cap;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: VirtualAddress = VirtualAddress::new(0x10_0000);

    #[test]
    fn heap_starts_at_brk_min() {
        let mut l = AddressLayout::new(MAX);
        l.init_brk(VirtualAddress::new(0x1_2345)).unwrap();
        assert_eq!(l.brk(), VirtualAddress::new(0x1_2345));
        assert_eq!(l.heap_end(), VirtualAddress::new(0x1_3000));
        assert_eq!(l.mmap_floor(), VirtualAddress::new(0x1_3000));
    }

    #[test]
    fn floor_skips_page_zero() {
        let l = AddressLayout::new(MAX);
        assert_eq!(l.mmap_floor(), VirtualAddress::new(PAGE_SIZE));
    }

    #[test]
    fn mappings_cap_heap_growth() {
        let mut l = AddressLayout::new(MAX);
        l.init_brk(VirtualAddress::new(0x2000)).unwrap();
        l.reserve_above_heap(VirtualAddress::new(0x8000), VirtualAddress::new(0x9000));
        assert_eq!(l.brk_max(), VirtualAddress::new(0x8000));
        // straddling the heap end caps at the heap end
        l.reserve_above_heap(VirtualAddress::new(0x1000), VirtualAddress::new(0x4000));
        assert_eq!(l.brk_max(), VirtualAddress::new(0x2000));
        // below the heap: no effect
        l.reserve_above_heap(VirtualAddress::new(0x0), VirtualAddress::new(0x1000));
        assert_eq!(l.brk_max(), VirtualAddress::new(0x2000));
    }

    #[test]
    fn brk_min_above_max_is_rejected() {
        let mut l = AddressLayout::new(MAX);
        assert_eq!(
            l.init_brk(VirtualAddress::new(0x10_0001)),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn range_check() {
        let l = AddressLayout::new(MAX);
        assert!(l.contains_range(VirtualAddress::new(0xf_f000), 0x1000));
        assert!(!l.contains_range(VirtualAddress::new(0xf_f000), 0x1001));
        assert!(!l.contains_range(VirtualAddress::new(u64::MAX), 2));
    }
}
