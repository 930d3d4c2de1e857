//! # Direct-map `PhysMapper`
//!
//! The proxy kernel runs with every physical page reachable at a fixed offset
//! from its physical address: offset 0 while paging is off or under the
//! identity map of DRAM, or a host buffer base in tests and simulators.
//!
//! ```rust
//! use kernel_alloc::phys_mapper::DirectMapPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let mut word = 0u64;
//! let mapper = DirectMapPhysMapper::new((&raw mut word) as u64);
//! let slot: &mut u64 = unsafe { mapper.phys_to_mut(PhysicalAddress::new(0)) };
//! *slot = 7;
//! assert_eq!(word, 7);
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// Physical address `pa` lives at virtual address `offset + pa`.
///
/// # Safety
/// The direct map must cover every physical page handed to it and stay
/// mapped for as long as the returned references live.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct DirectMapPhysMapper {
    offset: u64,
}

impl DirectMapPhysMapper {
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Identity mapping.
    #[inline]
    #[must_use]
    pub const fn identity() -> Self {
        Self { offset: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for DirectMapPhysMapper {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.offset.wrapping_add(pa.as_u64()) as *mut T;
        unsafe { &mut *va }
    }
}
