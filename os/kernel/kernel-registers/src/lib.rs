//! # Typed RISC-V Supervisor Registers
//!
//! Only the registers the virtual memory code touches are modelled: `satp`
//! (translation root) and `scause` (trap cause). Instruction wrappers such as
//! `sfence.vma` live in [`tlb`].
//!
//! Register access is compiled only for `riscv64` targets with the `asm`
//! feature. On any other target the load/store traits are not implemented and
//! the TLB helpers are no-ops, which keeps the VM core testable on the host.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "satp")]
pub mod satp;

#[cfg(feature = "scause")]
pub mod scause;

pub mod tlb;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Supervisor CSRs can only be read in S-mode or above.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing `satp` switches the active address space immediately.
    unsafe fn store_unsafe(self);
}
