//! ELF64 headers, decoded from little-endian bytes without allocating.

pub mod loader;

use bitfield_struct::bitfield;
use kernel_alloc::{FileError, Prot, VmError};
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("file too short for an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit ELF")]
    BadClass,
    #[error("not a little-endian ELF")]
    BadEndian,
    #[error("not a RISC-V binary (e_machine {0})")]
    BadMachine(u16),
    #[error("unsupported ELF type {0}")]
    BadType(u16),
    #[error("malformed ELF header")]
    BadHeader,
    #[error("program header table out of bounds")]
    Oob,
    #[error("segment at {vaddr} is not congruent with file offset {offset:#x}")]
    Misaligned { vaddr: VirtualAddress, offset: u64 },
    #[error("segment at {vaddr} does not fit in user space")]
    OutOfRange { vaddr: VirtualAddress },
    #[error("no loadable segments")]
    NoSegments,
    #[error(transparent)]
    Read(#[from] FileError),
    #[error("mapping a segment failed: {0}")]
    Map(#[from] VmError),
}

pub const EHDR_SIZE: usize = 64;
pub const PHDR_SIZE: usize = 56;

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
pub const EM_RISCV: u16 = 243;
pub const PT_LOAD: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct Eh64 {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: VirtualAddress,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

impl Eh64 {
    /// Validates `e_ident` and the fields the loader relies on.
    ///
    /// # Errors
    /// Anything that is not a little-endian ELF64 RISC-V executable.
    pub fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if bytes.len() < EHDR_SIZE {
            return Err(ElfError::TooShort);
        }
        if &bytes[0..4] != b"\x7FELF" {
            return Err(ElfError::BadMagic);
        }
        // ELFCLASS64
        if bytes[4] != 2 {
            return Err(ElfError::BadClass);
        }
        if bytes[5] != 1 {
            return Err(ElfError::BadEndian);
        }

        let eh = Self {
            e_type: le16(&bytes[16..18]),
            e_machine: le16(&bytes[18..20]),
            e_entry: VirtualAddress::new(le64(&bytes[24..32])),
            e_phoff: le64(&bytes[32..40]),
            e_phentsize: le16(&bytes[54..56]),
            e_phnum: le16(&bytes[56..58]),
        };

        if eh.e_type != ET_EXEC && eh.e_type != ET_DYN {
            return Err(ElfError::BadType(eh.e_type));
        }
        if eh.e_machine != EM_RISCV {
            return Err(ElfError::BadMachine(eh.e_machine));
        }
        if le32(&bytes[20..24]) != 1 || usize::from(eh.e_phentsize) != PHDR_SIZE {
            return Err(ElfError::BadHeader);
        }
        Ok(eh)
    }

    /// True for PIE (`ET_DYN`), false for fixed `ET_EXEC`.
    #[must_use]
    pub const fn is_pie(&self) -> bool {
        self.e_type == ET_DYN
    }

    /// Size of the program header table in bytes.
    #[must_use]
    pub fn ph_table_len(&self) -> usize {
        usize::from(self.e_phnum) * PHDR_SIZE
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ph64 {
    pub p_type: u32,
    pub p_flags: PFlags,
    pub p_offset: u64,
    pub p_vaddr: VirtualAddress,
    pub p_filesz: u64,
    pub p_memsz: u64,
}

impl Ph64 {
    /// Whether the segment's file image contains file offset `off`.
    #[must_use]
    pub const fn contains_offset(&self, off: u64) -> bool {
        off >= self.p_offset && off - self.p_offset < self.p_filesz
    }
}

/// `Elf64_Phdr.p_flags` (SVr4): bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    pub execute: bool, // PF_X = 1
    pub write: bool,   // PF_W = 2
    pub read: bool,    // PF_R = 4
    #[bits(29)]
    __: u32,
}

impl From<PFlags> for Prot {
    fn from(value: PFlags) -> Self {
        let mut prot = Self::empty();
        prot.set(Self::READ, value.read());
        prot.set(Self::WRITE, value.write());
        prot.set(Self::EXEC, value.execute());
        prot
    }
}

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

/// Program header table view over the bytes read from `e_phoff`.
#[derive(Copy, Clone)]
pub struct PhSlice<'a> {
    b: &'a [u8],
}

impl<'a> PhSlice<'a> {
    #[must_use]
    pub const fn new(b: &'a [u8]) -> Self {
        Self { b }
    }

    fn get(&self, i: usize) -> Option<Ph64> {
        let p = i.checked_mul(PHDR_SIZE)?;
        let s = self.b.get(p..p + PHDR_SIZE)?;
        Some(Ph64 {
            p_type: le32(&s[0..4]),
            p_flags: PFlags::from_bits(le32(&s[4..8])),
            p_offset: le64(&s[8..16]),
            p_vaddr: VirtualAddress::new(le64(&s[16..24])),
            p_filesz: le64(&s[32..40]),
            p_memsz: le64(&s[40..48]),
        })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.b.len() / PHDR_SIZE
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate all program headers.
    #[must_use]
    pub const fn iter(&self) -> PhIter<'a> {
        PhIter { ps: *self, i: 0 }
    }

    /// Iterate only `PT_LOAD` headers.
    pub fn iter_pt_load(&self) -> impl Iterator<Item = Ph64> + 'a {
        self.iter().filter(|ph| ph.p_type == PT_LOAD)
    }
}

pub struct PhIter<'a> {
    ps: PhSlice<'a>,
    i: usize,
}

impl Iterator for PhIter<'_> {
    type Item = Ph64;
    fn next(&mut self) -> Option<Self::Item> {
        let v = self.ps.get(self.i)?;
        self.i += 1;
        Some(v)
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.ps.len().saturating_sub(self.i);
        (r, Some(r))
    }
}

impl ExactSizeIterator for PhIter<'_> {}

impl core::iter::FusedIterator for PhIter<'_> {}
