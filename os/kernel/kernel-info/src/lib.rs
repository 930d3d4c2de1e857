//! # Proxy Kernel Configuration
//!
//! Boot-time configuration shared by the VM core and the proxy kernel: the
//! physical memory layout discovered by the platform code, and the flags
//! passed on the kernel command line ahead of the user program.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! DRAM_BASE        ┌─────────────────────────────────┐ 0x8000_0000
//!                  │   Firmware + Kernel Image       │  mapped supervisor-only
//! first_free       ├─────────────────────────────────┤
//!                  │   Page Pool                     │  handed to the page allocator
//! DRAM_BASE + size └─────────────────────────────────┘
//! ```
//!
//! ## User Virtual Layout
//!
//! ```text
//! 0                ┌─────────────────────────────────┐
//!                  │   ELF image                     │
//! brk_min          ├─────────────────────────────────┤
//!                  │   heap (brk) ↑                  │
//! brk_max          ├ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤
//!                  │   ↓ mmap regions                │
//!                  ├─────────────────────────────────┤
//!                  │   user stack                    │
//! mmap_max         └─────────────────────────────────┘ min(DRAM_BASE, pool bytes)
//! ```
//!
//! Everything at or above `mmap_max` is reserved for the kernel's own
//! identity mapping.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
