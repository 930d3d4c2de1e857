//! Maps the `PT_LOAD` segments of the user program.
//!
//! Segments become fixed, private, file-backed mappings, so the program image
//! is paged in on demand like any other file mapping. Only the partial pages
//! at either end of a segment's file image are touched eagerly: the bytes
//! before `p_vaddr` and after `p_filesz` are zeroed. Whatever BSS remains past
//! the last file page is mapped anonymously.

use super::{EHDR_SIZE, ElfError, Eh64, Ph64, PhSlice};
use alloc::sync::Arc;
use alloc::vec;
use kernel_alloc::{BackingFile, MapFlags, Prot, VmState, read_up_to};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, page_align_down, page_align_up};
use kernel_vmem::PhysMapper;
use log::{debug, info};

/// Where position-independent programs are placed.
pub const PIE_BASE: u64 = 0x1_0000;

/// What the stack builder and the trap frame need to know about the image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadedImage {
    pub entry: VirtualAddress,
    /// User address of the program header table, zero if it is not mapped.
    pub phdr: VirtualAddress,
    pub phnum: u16,
    /// Offset added to every `p_vaddr`; non-zero only for PIE.
    pub bias: u64,
    /// End of the highest segment, where the heap starts.
    pub brk_min: VirtualAddress,
}

/// Loads the ELF program in `file` into the address space and sets the
/// initial break behind it.
///
/// # Errors
/// - Header validation failures.
/// - [`ElfError::Read`] if the headers cannot be read.
/// - [`ElfError::Map`] if a segment cannot be mapped.
pub fn load_elf<M: PhysMapper + Clone>(
    vm: &mut VmState<M>,
    file: &Arc<dyn BackingFile>,
) -> Result<LoadedImage, ElfError> {
    let mut ehdr = [0u8; EHDR_SIZE];
    if read_up_to(&**file, &mut ehdr, 0)? < EHDR_SIZE {
        return Err(ElfError::TooShort);
    }
    let eh = Eh64::parse(&ehdr)?;

    let mut table = vec![0u8; eh.ph_table_len()];
    if read_up_to(&**file, &mut table, eh.e_phoff)? < table.len() {
        return Err(ElfError::Oob);
    }
    let ph = PhSlice::new(&table);

    let bias = if eh.is_pie() { pie_bias(&ph)? } else { 0 };
    let mmap_max = vm.layout().mmap_max();

    let mut brk_min = VirtualAddress::zero();
    for seg in ph.iter_pt_load() {
        let vaddr = seg.p_vaddr + bias;
        if seg.p_filesz > seg.p_memsz {
            return Err(ElfError::BadHeader);
        }
        let end = vaddr
            .checked_add(seg.p_memsz)
            .filter(|end| *end <= mmap_max)
            .ok_or(ElfError::OutOfRange { vaddr })?;
        brk_min = brk_min.max(end);
    }
    if brk_min == VirtualAddress::zero() {
        return Err(ElfError::NoSegments);
    }

    // before any segment is mapped, so the image counts as below the heap
    vm.init_brk(brk_min)?;

    for seg in ph.iter_pt_load().filter(|seg| seg.p_memsz > 0) {
        map_segment(vm, file, &seg, bias)?;
    }

    let phdr = ph
        .iter_pt_load()
        .find(|seg| seg.contains_offset(eh.e_phoff))
        .map_or(VirtualAddress::zero(), |seg| {
            seg.p_vaddr + bias + (eh.e_phoff - seg.p_offset)
        });

    let image = LoadedImage {
        entry: eh.e_entry + bias,
        phdr,
        phnum: eh.e_phnum,
        bias,
        brk_min,
    };
    info!(
        "loaded {} segments, entry {}, brk {}",
        ph.iter_pt_load().count(),
        image.entry,
        image.brk_min
    );
    Ok(image)
}

fn map_segment<M: PhysMapper + Clone>(
    vm: &mut VmState<M>,
    file: &Arc<dyn BackingFile>,
    seg: &Ph64,
    bias: u64,
) -> Result<(), ElfError> {
    let vaddr = seg.p_vaddr + bias;
    let prepad = vaddr.page_offset();
    if seg.p_offset % PAGE_SIZE != prepad {
        return Err(ElfError::Misaligned {
            vaddr,
            offset: seg.p_offset,
        });
    }

    let base = vaddr.align_down();
    let prot = Prot::from(seg.p_flags);
    let fixed = MapFlags::FIXED | MapFlags::PRIVATE;
    let out_of_range = ElfError::OutOfRange { vaddr };

    let mut mapped_end = base;
    if seg.p_filesz > 0 {
        let file_end = vaddr + seg.p_filesz;
        vm.mmap(
            base,
            seg.p_filesz + prepad,
            prot,
            fixed,
            Some(file.clone()),
            seg.p_offset - prepad,
        )?;
        vm.zero_user(base, prepad)?;

        mapped_end = file_end.align_up().ok_or(out_of_range)?;
        vm.zero_user(file_end, mapped_end.as_u64() - file_end.as_u64())?;
    }

    let mem_end = page_align_up(vaddr.as_u64() + seg.p_memsz)
        .map(VirtualAddress::new)
        .ok_or(out_of_range)?;
    if mem_end > mapped_end {
        vm.mmap(
            mapped_end,
            mem_end.as_u64() - mapped_end.as_u64(),
            prot,
            fixed | MapFlags::ANONYMOUS,
            None,
            0,
        )?;
    }
    debug!(
        "segment {vaddr} file {:#x} mem {:#x} {prot:?}",
        seg.p_filesz, seg.p_memsz
    );
    Ok(())
}

/// Bias that moves the lowest `PT_LOAD` page of a PIE to [`PIE_BASE`].
fn pie_bias(ph: &PhSlice<'_>) -> Result<u64, ElfError> {
    let lowest = ph
        .iter_pt_load()
        .map(|seg| page_align_down(seg.p_vaddr.as_u64()))
        .min()
        .ok_or(ElfError::NoSegments)?;
    PIE_BASE.checked_sub(lowest).ok_or(ElfError::OutOfRange {
        vaddr: VirtualAddress::new(lowest),
    })
}
