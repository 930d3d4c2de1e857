#[cfg(all(feature = "asm", target_arch = "riscv64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// `scause` — Supervisor Trap Cause.
#[bitfield(u64)]
pub struct Scause {
    /// Bits 0–62 — Exception or interrupt code.
    #[bits(63)]
    pub code: u64,

    /// Bit 63 — Set if the trap was caused by an interrupt.
    pub interrupt: bool,
}

/// Synchronous exception causes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    InstructionMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadMisaligned,
    LoadAccessFault,
    StoreMisaligned,
    StoreAccessFault,
    UserEcall,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
    Other(u64),
}

impl Scause {
    /// Decodes the exception code; `None` for interrupts.
    #[must_use]
    pub const fn exception(&self) -> Option<Exception> {
        if self.interrupt() {
            return None;
        }
        Some(match self.code() {
            0 => Exception::InstructionMisaligned,
            1 => Exception::InstructionAccessFault,
            2 => Exception::IllegalInstruction,
            3 => Exception::Breakpoint,
            4 => Exception::LoadMisaligned,
            5 => Exception::LoadAccessFault,
            6 => Exception::StoreMisaligned,
            7 => Exception::StoreAccessFault,
            8 => Exception::UserEcall,
            12 => Exception::InstructionPageFault,
            13 => Exception::LoadPageFault,
            15 => Exception::StorePageFault,
            other => Exception::Other(other),
        })
    }
}

#[cfg(all(feature = "asm", target_arch = "riscv64"))]
impl LoadRegisterUnsafe for Scause {
    unsafe fn load_unsafe() -> Self {
        let scause: u64;
        unsafe {
            core::arch::asm!("csrr {}, scause", out(reg) scause, options(nomem, nostack));
        }
        Self::from_bits(scause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fault_codes() {
        assert_eq!(Scause::from_bits(13).exception(), Some(Exception::LoadPageFault));
        assert_eq!(Scause::from_bits(15).exception(), Some(Exception::StorePageFault));
        assert_eq!(Scause::from_bits(12).exception(), Some(Exception::InstructionPageFault));
        assert_eq!(Scause::from_bits((1 << 63) | 5).exception(), None);
    }
}
