#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// `satp` — Supervisor Address Translation and Protection (RV64).
///
/// Selects the paging mode and holds the PPN of the root page table plus the
/// address-space identifier.
#[bitfield(u64)]
pub struct Satp {
    /// Bits 0–43 — PPN of the root page table.
    #[bits(44)]
    pub ppn: u64,

    /// Bits 44–59 — Address-space identifier.
    #[bits(16)]
    pub asid: u16,

    /// Bits 60–63 — Translation mode, see [`Satp::MODE_BARE`] and [`Satp::MODE_SV39`].
    #[bits(4)]
    pub mode: u8,
}

impl Satp {
    /// No translation.
    pub const MODE_BARE: u8 = 0;

    /// Three-level, 39-bit virtual addressing.
    pub const MODE_SV39: u8 = 8;

    /// `satp` value selecting Sv39 with `root` as the top-level table.
    #[must_use]
    pub const fn sv39(root: PhysicalPage, asid: u16) -> Self {
        Self::new()
            .with_mode(Self::MODE_SV39)
            .with_asid(asid)
            .with_ppn(root.ppn())
    }

    /// Root table frame, or `None` when translation is off.
    #[must_use]
    pub const fn root(&self) -> Option<PhysicalPage> {
        if self.mode() == Self::MODE_BARE {
            None
        } else {
            Some(PhysicalPage::from_ppn(self.ppn()))
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl LoadRegisterUnsafe for Satp {
    unsafe fn load_unsafe() -> Self {
        let satp: u64;
        unsafe {
            core::arch::asm!("csrr {}, satp", out(reg) satp, options(nomem, nostack));
        }
        Self::from_bits(satp)
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl StoreRegisterUnsafe for Satp {
    unsafe fn store_unsafe(self) {
        let satp = self.into_bits();
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) satp, options(nostack));
        }
    }
}
