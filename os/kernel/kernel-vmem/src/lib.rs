//! # Virtual Memory Support
//!
//! Sv39 page tables for the RISC-V proxy kernel.
//!
//! ## What you get
//! - A [`PageTableEntry`] that decodes into the tagged [`PteKind`], including
//!   the software-only *pending* state used for demand paging.
//! - A 4 KiB-aligned [`PageTable`] and the [`TableIndex`] helpers.
//! - An [`AddressSpace`] walker over a root table.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! Each 39-bit virtual address is divided into four fields:
//!
//! ```text
//! | 38‒30  | 29‒21  | 20‒12  | 11‒0   |
//! | VPN[2] | VPN[1] | VPN[0] | Offset |
//! ```
//!
//! The hardware uses the VPN fields as **indices** into three levels of page
//! tables, each holding 512 (2⁹) entries of 8 bytes.
//!
//! ```text
//!  root (L2)  →  L1  →  L0  →  Physical Page
//!     │          │       │
//!     │          │       └───► leaf PTE → maps a 4 KiB page
//!     │          └───────────► table PTE (or a 2 MiB leaf, never created here)
//!     └──────────────────────► table PTE (or a 1 GiB leaf, never created here)
//! ```
//!
//! A PTE with `V=1` and `R=W=X=0` points to the next table; `V=1` with any of
//! `R/W/X` set is a leaf. When `V=0` the hardware ignores every other bit,
//! which is where the software states live (see [`entry`]).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod entry;
mod table;

pub use crate::address_space::{AddressSpace, WalkError};
pub use crate::entry::{LeafPerms, PageTableEntry, PendingTag, PteKind};
pub use crate::table::{ENTRIES, LEVELS, PageTable, TableIndex};

use kernel_memory_addresses::{PAGE_SIZE_BYTES, PhysicalAddress, PhysicalPage};

/// Source of **physical** 4 KiB frames for page tables and user pages.
///
/// Returned frames must be page aligned and **zero-filled**; callers never
/// observe stale contents.
pub trait FrameAlloc {
    /// Allocate one zeroed frame, `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, page: PhysicalPage);
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// The proxy kernel runs with RAM identity mapped, so the kernel mapper is an
/// identity (or fixed offset) translation; host tests back it with a heap
/// buffer.
///
/// # Safety
/// - `pa` must be mapped writable in the current address space for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` and the caller must not create
///   overlapping mutable references.
pub trait PhysMapper {
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

impl<M: PhysMapper> PhysMapper for &M {
    #[inline(always)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }
}

/// Borrow the bytes of a whole frame.
///
/// # Safety
/// No other reference into `page` may be alive while the returned slice is.
#[inline]
pub unsafe fn frame_bytes<'a, M: PhysMapper>(
    m: &M,
    page: PhysicalPage,
) -> &'a mut [u8; PAGE_SIZE_BYTES] {
    unsafe { m.phys_to_mut::<[u8; PAGE_SIZE_BYTES]>(page.base()) }
}

/// Map a physical page table frame and return a mutable reference to it.
///
/// # Safety
/// - `page` must hold a page table.
/// - No other reference to the table may be alive.
#[inline]
pub(crate) unsafe fn get_table<'a, M: PhysMapper>(m: &M, page: PhysicalPage) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}
