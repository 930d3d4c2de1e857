mod common;

use common::{MMAP_MAX, MemFile, vm};
use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_alloc::{BackingFile, MapFlags, Prot, Vm};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::LeafPerms;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const HEAP_BASE: u64 = 0x10_0000;

#[derive(Debug, Clone)]
enum Op {
    Map { pages: u64, prot: Prot, populate: bool },
    Unmap { which: usize, first: u64, count: u64 },
    Touch { which: usize, page: u64, write: bool },
    Protect { which: usize, prot: Prot },
    Brk { pages: u64 },
}

fn arb_prot() -> impl Strategy<Value = Prot> {
    (0u32..8).prop_map(Prot::from_bits_truncate)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..6, arb_prot(), any::<bool>()).prop_map(|(pages, prot, populate)| Op::Map {
            pages,
            prot,
            populate
        }),
        (any::<usize>(), 0u64..6, 1u64..6).prop_map(|(which, first, count)| Op::Unmap {
            which,
            first,
            count
        }),
        (any::<usize>(), 0u64..6, any::<bool>()).prop_map(|(which, page, write)| Op::Touch {
            which,
            page,
            write
        }),
        (any::<usize>(), arb_prot()).prop_map(|(which, prot)| Op::Protect { which, prot }),
        (0u64..24).prop_map(|pages| Op::Brk { pages }),
    ]
}

fn pages_of(base: VirtualAddress, n: u64) -> impl Iterator<Item = u64> {
    (0..n).map(move |i| base.as_u64() + i * PAGE_SIZE)
}

fn check_accounting(vm: &Vm<DirectMapPhysMapper>) -> Result<(), TestCaseError> {
    let state = vm.lock();
    let census = state.census();
    let (reserve_free, reserve_total) = state.table_reserve();
    prop_assert_eq!(
        census.tables + census.resident + state.free_pages() + reserve_free,
        state.total_pages() + reserve_total,
        "pages leaked or double counted: {:?}",
        census
    );
    let refs: u64 = state.vmrs().iter().map(|(_, v)| v.refcount()).sum();
    prop_assert_eq!(refs, census.pending);
    prop_assert!(state.vmrs().iter().all(|(_, v)| v.refcount() > 0));

    let layout = state.layout();
    prop_assert!(layout.brk_min() <= layout.brk());
    prop_assert!(layout.brk() <= layout.brk_max());
    prop_assert!(layout.brk_max() <= layout.mmap_max());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bookkeeping_survives_any_sequence(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (_ram, vm) = vm(256);
        vm.lock().init_brk(VirtualAddress::new(HEAP_BASE)).unwrap();
        let mut maps: Vec<(VirtualAddress, u64)> = Vec::new();
        let mut mapped: BTreeSet<u64> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Map { pages, prot, populate } => {
                    let mut flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
                    if populate {
                        flags |= MapFlags::POPULATE;
                    }
                    if let Ok(base) = vm.mmap(VirtualAddress::zero(), pages * PAGE_SIZE, prot, flags, None, 0) {
                        prop_assert!(base.is_page_aligned());
                        prop_assert!(base >= vm.lock().layout().heap_end());
                        prop_assert!(base + pages * PAGE_SIZE <= MMAP_MAX);
                        for p in pages_of(base, pages) {
                            prop_assert!(mapped.insert(p), "{:#x} handed out twice", p);
                        }
                        maps.push((base, pages));
                    }
                }
                Op::Unmap { which, first, count } => {
                    if let Some(&(base, pages)) = maps.get(which % maps.len().max(1)) {
                        let first = first % pages;
                        let start = base + first * PAGE_SIZE;
                        let count = count.min((MMAP_MAX.as_u64() - start.as_u64()) / PAGE_SIZE);
                        vm.munmap(start, count * PAGE_SIZE).unwrap();
                        for p in pages_of(start, count) {
                            mapped.remove(&p);
                        }
                    }
                }
                Op::Touch { which, page, write } => {
                    if let Some(&(base, pages)) = maps.get(which % maps.len().max(1)) {
                        let va = base + (page % pages) * PAGE_SIZE;
                        let access = if write { Prot::WRITE } else { Prot::READ };
                        if let Err(e) = vm.resolve_fault(va, access) {
                            prop_assert!(e.is_segfault(), "{}", e);
                        }
                    }
                }
                Op::Protect { which, prot } => {
                    if let Some(&(base, pages)) = maps.get(which % maps.len().max(1)) {
                        let _ = vm.mprotect(base, pages * PAGE_SIZE, prot);
                    }
                }
                Op::Brk { pages } => {
                    let got = vm.brk(VirtualAddress::new(HEAP_BASE + pages * PAGE_SIZE));
                    let layout = vm.lock().layout();
                    prop_assert!(got >= layout.brk_min() && got <= layout.brk_max());
                }
            }
            check_accounting(&vm)?;
        }

        for (base, pages) in maps {
            vm.munmap(base, pages * PAGE_SIZE).unwrap();
        }
        vm.brk(VirtualAddress::zero());
        let state = vm.lock();
        let census = state.census();
        prop_assert_eq!(census.resident + census.pending, 0);
        prop_assert_eq!(state.live_vmrs(), 0);
    }

    #[test]
    fn narrowing_is_always_allowed(prot in arb_prot(), narrow in arb_prot(), touch in any::<bool>()) {
        let (_ram, vm) = vm(32);
        let flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
        let base = vm.mmap(VirtualAddress::zero(), 2 * PAGE_SIZE, prot, flags, None, 0).unwrap();
        if touch {
            vm.lock().zero_user(base, 1).unwrap();
        }
        let target = prot & narrow;
        prop_assert!(vm.mprotect(base, 2 * PAGE_SIZE, target).is_ok());
        // write implies read, so only a change in effective permissions widens
        let widened = prot | narrow;
        if LeafPerms::from(widened) != LeafPerms::from(prot) {
            prop_assert!(vm.mprotect(base, 2 * PAGE_SIZE, widened).is_err());
        }
    }

    #[test]
    fn map_then_unmap_restores_free_pages(
        pages in 1u64..16,
        prot in arb_prot(),
        populate in any::<bool>(),
        backed in any::<bool>(),
    ) {
        let (_ram, vm) = vm(64);
        let free = vm.free_pages();
        let live = vm.lock().live_vmrs();

        let (flags, file) = if backed {
            let file: Arc<dyn BackingFile> = Arc::new(MemFile::patterned(3 * PAGE_SIZE as usize));
            (MapFlags::PRIVATE, Some(file))
        } else {
            (MapFlags::PRIVATE | MapFlags::ANONYMOUS, None)
        };
        let flags = if populate { flags | MapFlags::POPULATE } else { flags };

        let base = vm.mmap(VirtualAddress::zero(), pages * PAGE_SIZE, prot, flags, file, 0).unwrap();
        if populate {
            prop_assert_eq!(vm.free_pages(), free - pages);
        } else {
            prop_assert_eq!(vm.free_pages(), free);
        }
        vm.munmap(base, pages * PAGE_SIZE).unwrap();
        prop_assert_eq!(vm.free_pages(), free);
        prop_assert_eq!(vm.lock().live_vmrs(), live);
    }

    #[test]
    fn file_pages_hold_file_bytes_then_zeros(
        file_pages in 0u64..3,
        extra in 0u64..PAGE_SIZE,
        offset_pages in 0u64..4,
        len_pages in 1u64..5,
    ) {
        let (_ram, vm) = vm(64);
        let file = Arc::new(MemFile::patterned((file_pages * PAGE_SIZE + extra) as usize));
        let offset = offset_pages * PAGE_SIZE;
        let base = vm
            .mmap(
                VirtualAddress::zero(),
                len_pages * PAGE_SIZE,
                Prot::READ,
                MapFlags::PRIVATE,
                Some(file.clone()),
                offset,
            )
            .unwrap();

        let mut page = vec![0xee; PAGE_SIZE as usize];
        for i in 0..len_pages {
            let va = base + i * PAGE_SIZE;
            vm.resolve_fault(va, Prot::READ).unwrap();
            vm.lock().read_user(va, &mut page).unwrap();
            for (j, b) in page.iter().enumerate() {
                let pos = (offset + i * PAGE_SIZE) as usize + j;
                let want = file.data.get(pos).copied().unwrap_or(0);
                prop_assert_eq!(*b, want, "page {} byte {}", i, j);
            }
        }
    }
}

#[test]
fn sixty_four_kib_region_faults_in_page_by_page() {
    let (_ram, vm) = vm(64);
    let flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
    let base = vm.mmap(VirtualAddress::zero(), 64 * 1024, Prot::RW, flags, None, 0).unwrap();
    assert_eq!(vm.lock().census().pending, 16);
    assert_eq!(vm.lock().vmrs().iter().next().unwrap().1.refcount(), 16);

    for i in 0..16 {
        vm.resolve_fault(base + i * PAGE_SIZE + 0x80, Prot::WRITE).unwrap();
        let state = vm.lock();
        let remaining = 15 - i;
        assert_eq!(state.census().pending, remaining);
        assert_eq!(state.live_vmrs(), usize::from(remaining > 0));
    }
    assert_eq!(vm.lock().census().resident, 16);
    assert_eq!(vm.stats().pages_populated, 16);
}
