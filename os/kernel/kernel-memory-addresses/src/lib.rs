//! # Sv39 Address Types
//!
//! Strongly typed wrappers for the raw addresses and page numbers used by the
//! RISC-V virtual memory code.
//!
//! ## Overview
//!
//! Virtual and physical addresses are both plain `u64` values on RV64, which makes
//! it far too easy to hand a user pointer to a function expecting a physical
//! frame. The types in this crate carry the *kind* of an address at the type
//! level and are zero-cost otherwise.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A byte address in the (translated) user or kernel address space. |
//! | [`PhysicalAddress`] | A byte address in RAM or MMIO space. |
//! | [`VirtualPage`] | A 4 KiB aligned virtual page base (a VPN in address form). |
//! | [`PhysicalPage`] | A 4 KiB aligned physical frame base (a PPN in address form). |
//!
//! Only the 4 KiB base page size is modelled; the proxy kernel never installs
//! mega- or giga-pages for user mappings.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1_2345);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x1_2000);
//! assert_eq!(va.page_offset(), 0x345);
//!
//! let frame = PhysicalPage::from_ppn(0x8_0001);
//! assert_eq!(frame.base().as_u64(), 0x8000_1000);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u64` and implement `Copy`,
//!   `Eq`, `Ord` and `Hash`, so they work as map keys.
//! - Arithmetic that can leave the address space is exposed as `checked_*`
//!   and returns `None` instead of wrapping.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page;
mod physical_address;
mod virtual_address;

pub use page::{PhysicalPage, VirtualPage};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Base page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// [`PAGE_SIZE`] as `usize`, for buffer lengths.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_SIZE_BYTES: usize = PAGE_SIZE as usize;

/// Returns `true` if `value` is a multiple of [`PAGE_SIZE`].
#[inline(always)]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}

/// Rounds `value` down to a page boundary.
///
/// ```rust
/// # use kernel_memory_addresses::page_align_down;
/// assert_eq!(page_align_down(0x1fff), 0x1000);
/// assert_eq!(page_align_down(0x2000), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Rounds `value` up to a page boundary, or `None` if that overflows.
///
/// ```rust
/// # use kernel_memory_addresses::page_align_up;
/// assert_eq!(page_align_up(0x1001), Some(0x2000));
/// assert_eq!(page_align_up(0x2000), Some(0x2000));
/// assert_eq!(page_align_up(u64::MAX), None);
/// ```
#[inline(always)]
#[must_use]
pub const fn page_align_up(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(page_align_down(v)),
        None => None,
    }
}

/// Number of pages needed to cover `len` bytes.
#[inline(always)]
#[must_use]
pub const fn pages_for(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(0x8000_0000));
        assert!(!is_page_aligned(0x8000_0001));
        assert_eq!(page_align_down(0xfff), 0);
        assert_eq!(page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(page_align_up(u64::MAX - 10), None);
    }

    #[test]
    fn page_counts() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
        assert_eq!(pages_for(32 * 1024), 8);
    }
}
