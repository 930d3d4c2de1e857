//! Translation cache maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Flushes the cached translation for `va` in every address space.
#[inline]
pub fn flush_page(va: VirtualAddress) {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("sfence.vma {}, zero", in(reg) va.as_u64(), options(nostack));
    }
    #[cfg(not(all(feature = "asm", target_arch = "riscv64")))]
    let _ = va;
}

/// Flushes the whole translation cache.
#[inline]
pub fn flush_all() {
    #[cfg(all(feature = "asm", target_arch = "riscv64"))]
    unsafe {
        core::arch::asm!("sfence.vma zero, zero", options(nostack));
    }
}
