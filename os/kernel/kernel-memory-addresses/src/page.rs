use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, VirtualAddress, page_align_down};
use core::fmt;

/// Page-aligned base of a 4 KiB virtual page.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits of the base are always zero.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let page = VirtualPage::containing(VirtualAddress::new(0x4321));
/// assert_eq!(page.number(), 4);
/// assert_eq!(page.checked_add(2).map(VirtualPage::number), Some(6));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self(page_align_down(addr.as_u64()))
    }

    /// Page with virtual page number `vpn`.
    #[inline]
    #[must_use]
    pub const fn from_number(vpn: u64) -> Self {
        Self(vpn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }

    /// Virtual page number (address >> 12).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// The page `n` pages above this one, `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        match n.checked_mul(PAGE_SIZE) {
            Some(bytes) => match self.0.checked_add(bytes) {
                Some(v) => Some(Self(v)),
                None => None,
            },
            None => None,
        }
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}

/// Page-aligned base of a 4 KiB physical frame.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits of the base are always zero.
/// - Sv39 PTEs store 44 PPN bits, so frames above 2^56 cannot be mapped.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(page_align_down(addr.as_u64()))
    }

    /// Frame with physical page number `ppn`.
    #[inline]
    #[must_use]
    pub const fn from_ppn(ppn: u64) -> Self {
        Self(ppn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Physical page number (address >> 12).
    #[inline]
    #[must_use]
    pub const fn ppn(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Byte address `offset` bytes into this frame.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE, "offset must be < page size");
        PhysicalAddress::new(self.0 | (offset & (PAGE_SIZE - 1)))
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}
