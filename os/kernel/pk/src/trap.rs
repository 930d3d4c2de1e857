//! Page fault entry from the trap handler.

use kernel_alloc::{FaultError, Prot, Vm};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::scause::{Exception, Scause};
use kernel_vmem::PhysMapper;
use log::{error, warn};

/// What the trap handler does after a page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultOutcome {
    /// Retry the faulting instruction.
    Resolved,
    /// Terminate the program.
    Segfault(FaultError),
}

/// The access a page fault cause stands for.
#[must_use]
pub const fn access_for(cause: Scause) -> Option<Prot> {
    match cause.exception() {
        Some(Exception::InstructionPageFault) => Some(Prot::EXEC),
        Some(Exception::LoadPageFault) => Some(Prot::READ),
        Some(Exception::StorePageFault) => Some(Prot::WRITE),
        _ => None,
    }
}

/// Resolves the fault described by `scause`/`stval`. Returns `None` if
/// `cause` is not a page fault.
///
/// # Panics
/// If the fault cannot be resolved for lack of memory or because the backing
/// file could not be read. Neither leaves the program anything to continue
/// with.
pub fn handle_page_fault<M: PhysMapper + Clone>(
    vm: &Vm<M>,
    cause: Scause,
    tval: u64,
) -> Option<FaultOutcome> {
    let access = access_for(cause)?;
    let va = VirtualAddress::new(tval);
    Some(match vm.resolve_fault(va, access) {
        Ok(()) => FaultOutcome::Resolved,
        Err(e) if e.is_segfault() => {
            warn!("segmentation fault: {e}");
            FaultOutcome::Segfault(e)
        }
        Err(e) => {
            error!("unrecoverable page fault: {e}");
            panic!("unrecoverable page fault: {e}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_map_to_accesses() {
        assert_eq!(access_for(Scause::from_bits(12)), Some(Prot::EXEC));
        assert_eq!(access_for(Scause::from_bits(13)), Some(Prot::READ));
        assert_eq!(access_for(Scause::from_bits(15)), Some(Prot::WRITE));
        // store access fault, not a page fault
        assert_eq!(access_for(Scause::from_bits(7)), None);
        assert_eq!(access_for(Scause::from_bits((1 << 63) | 13)), None);
    }
}
