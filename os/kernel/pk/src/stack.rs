//! # Initial User Stack
//!
//! ```text
//! top     ┌──────────────────────────┐ mmap_max
//!         │ argv strings (NUL-term.) │
//!         ├──────────────────────────┤
//!         │ padding to 16 bytes      │
//!         │ AT_NULL, 0               │
//!         │ aux_key[i], aux_val[i]   │
//!         │ NULL                     │ envp (empty)
//!         │ NULL                     │
//!         │ argv[argc-1] .. argv[0]  │
//! sp  →   │ argc                     │ 16-byte aligned
//!         ├──────────────────────────┤
//!         │ ↓ free stack             │
//! bottom  └──────────────────────────┘
//! ```

use alloc::vec::Vec;
use kernel_alloc::{VmError, VmState};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PhysMapper;

/// Auxiliary vector keys understood by the RISC-V Linux ABI.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u64)]
pub enum AuxKey {
    Null = 0,
    Phdr = 3,
    Phent = 4,
    Phnum = 5,
    Pagesz = 6,
    Entry = 9,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StackError {
    #[error("initial stack needs more than the {0:#x} bytes reserved")]
    Overflow(u64),
    #[error("writing the initial stack failed: {0}")]
    Vm(#[from] VmError),
}

/// Writes the initial stack top-down into `[bottom, top)`, which must be
/// mapped writable already.
pub struct StackBuilder<'v, M: PhysMapper + Clone> {
    vm: &'v mut VmState<M>,
    bottom: VirtualAddress,
    top: VirtualAddress,
    sp: VirtualAddress,
}

impl<'v, M: PhysMapper + Clone> StackBuilder<'v, M> {
    pub const fn new(vm: &'v mut VmState<M>, bottom: VirtualAddress, top: VirtualAddress) -> Self {
        Self {
            vm,
            bottom,
            top,
            sp: top,
        }
    }

    fn reserve(&mut self, len: u64, align: u64) -> Result<VirtualAddress, StackError> {
        debug_assert!(align.is_power_of_two());
        let sp = self
            .sp
            .as_u64()
            .checked_sub(len)
            .map(|sp| sp & !(align - 1))
            .filter(|sp| *sp >= self.bottom.as_u64())
            .ok_or(StackError::Overflow(self.top.as_u64() - self.bottom.as_u64()))?;
        self.sp = VirtualAddress::new(sp);
        Ok(self.sp)
    }

    /// Pushes `bytes` and returns their user address.
    ///
    /// # Errors
    /// [`StackError::Overflow`] if they do not fit.
    pub fn push_bytes(&mut self, bytes: &[u8], align: u64) -> Result<VirtualAddress, StackError> {
        let at = self.reserve(bytes.len() as u64, align)?;
        self.vm.write_user(at, bytes)?;
        Ok(at)
    }

    /// Pushes `s` with a terminating NUL.
    ///
    /// # Errors
    /// [`StackError::Overflow`] if it does not fit.
    pub fn push_str(&mut self, s: &str) -> Result<VirtualAddress, StackError> {
        let at = self.reserve(s.len() as u64 + 1, 1)?;
        self.vm.write_user(at, s.as_bytes())?;
        self.vm.write_user(at + s.len() as u64, &[0])?;
        Ok(at)
    }

    /// Writes the argument strings and the argc/argv/envp/auxv block, and
    /// returns the stack pointer the program starts with.
    ///
    /// # Errors
    /// [`StackError::Overflow`] if the stack is too small.
    pub fn finish(
        mut self,
        argv: &[&str],
        auxv: &[(AuxKey, u64)],
    ) -> Result<VirtualAddress, StackError> {
        let mut pointers = Vec::with_capacity(argv.len());
        for arg in argv.iter().rev() {
            pointers.push(self.push_str(arg)?.as_u64());
        }
        pointers.reverse();

        let mut words = Vec::with_capacity(argv.len() + 2 * auxv.len() + 5);
        words.push(argv.len() as u64);
        words.extend_from_slice(&pointers);
        words.push(0);
        // envp
        words.push(0);
        for (key, value) in auxv {
            words.extend_from_slice(&[*key as u64, *value]);
        }
        words.extend_from_slice(&[AuxKey::Null as u64, 0]);

        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let sp = self.push_bytes(&bytes, 16)?;
        log::debug!("user stack at {sp}, argc {}", argv.len());
        Ok(sp)
    }
}
