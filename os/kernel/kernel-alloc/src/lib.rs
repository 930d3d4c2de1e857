//! # Proxy Kernel Memory Management
//!
//! Physical page allocation, mapping bookkeeping and the user virtual memory
//! system calls (`mmap`, `munmap`, `mprotect`, `mremap`, `brk`) together with
//! demand paging.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Vm  (one SpinLock)                  │
//! │    • mmap / munmap / mprotect / mremap / brk        │
//! │    • page fault resolution                          │
//! │    • kernel range mapping, user copies              │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────────┐ ┌─────────▼───────────────┐
//! │   VmrPool               │ │   AddressSpace (Sv39)   │
//! │    • region records     │ │    • kernel-vmem walker │
//! │    • pending refcounts  │ │    • PTE encoding       │
//! └─────────────────────────┘ └─────────┬───────────────┘
//!                                       │
//! ┌─────────────────────────────────────▼───────────────┐
//! │   PageAllocator  +  PhysMapper                      │
//! │    • zero-filled 4 KiB pages from a fixed pool      │
//! │    • physical-to-virtual access                     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Page allocator ([`page_alloc`])
//! Bump allocation over `[first_free, dram_end)` plus a free list, with an
//! optional seeded shuffle of reuse order.
//!
//! ### Physical mapper ([`phys_mapper`])
//! [`DirectMapPhysMapper`](phys_mapper::DirectMapPhysMapper) reaches physical
//! memory at a fixed offset.
//!
//! ### Regions ([`vmr`])
//! One record per mapping. Entries that were mapped lazily carry the region id
//! in the PTE itself, and the region's reference count is the number of such
//! entries.
//!
//! ### VM core ([`vmm`])
//! [`Vm`](vmm::Vm) serializes every operation through one lock. Faults on
//! pending entries allocate a page, fill it from the backing file (or leave it
//! zeroed) and install the final translation.
//!
//! ## Invariants
//! * Each valid leaf maps a page owned by exactly one user leaf, except pages
//!   installed with [`Vm::map_kernel_range`](vmm::Vm::map_kernel_range).
//! * A region is live exactly while some pending entry refers to it.
//! * Every PTE change that could be cached is followed by a TLB flush of that
//!   address.
//!
//! ```rust
//! use kernel_alloc::flags::{MapFlags, Prot};
//!
//! let flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
//! assert!(flags.contains(MapFlags::PRIVATE));
//! assert_eq!(Prot::RW.bits(), 3);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod backing;
pub mod flags;
pub mod page_alloc;
pub mod phys_mapper;
pub mod vmm;
pub mod vmr;

pub use crate::backing::{BackingFile, FileError, read_up_to};
pub use crate::flags::{MapFlags, MremapFlags, Prot};
pub use crate::page_alloc::{PageAllocError, PageAllocator};
pub use crate::vmm::{Census, FaultError, Vm, VmConfig, VmError, VmState, VmStats};
