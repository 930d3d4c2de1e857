//! # Sv39 Page Table Entries
//!
//! A [`PageTableEntry`] is the raw 64-bit word the MMU walks. Software never
//! interprets it directly but decodes it into a [`PteKind`]:
//!
//! | Kind | Encoding |
//! |------|----------|
//! | [`PteKind::Empty`] | all zero |
//! | [`PteKind::Table`] | `V=1`, `R=W=X=0`, PPN of the next table |
//! | [`PteKind::Leaf`] | `V=1`, at least one of `R/W/X`, PPN of the page |
//! | [`PteKind::Leaf`] (no access) | `V=0`, bit 2 set, `U` kept, PPN of the page |
//! | [`PteKind::Pending`] | `V=0`, bit 1 set, tag in bits 10‒63 |
//!
//! The `V=0` encodings are invisible to the hardware walker: any access
//! through them raises a page fault, which is exactly what demand paging and
//! `PROT_NONE` pages need. A resolved page whose permissions were all revoked
//! keeps its frame in the "no access" form so a later `munmap` can free it.

use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::PhysicalPage;

/// Hardware view of an Sv39 PTE.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Sv39Bits {
    /// **Valid** (bit 0). When clear, all other bits are free for software.
    pub valid: bool,
    /// **Readable** (bit 1).
    pub read: bool,
    /// **Writable** (bit 2). `W` without `R` is reserved.
    pub write: bool,
    /// **Executable** (bit 3).
    pub execute: bool,
    /// **User** (bit 4): accessible from U-mode; S-mode access needs `SUM`.
    pub user: bool,
    /// **Global** (bit 5): present in all address spaces.
    pub global: bool,
    /// **Accessed** (bit 6).
    pub accessed: bool,
    /// **Dirty** (bit 7).
    pub dirty: bool,
    /// **RSW** (bits 8‒9): reserved for supervisor software.
    #[bits(2)]
    pub rsw: u8,
    /// **PPN** (bits 10‒53).
    #[bits(44)]
    pub ppn: u64,
    /// Bits 54‒63: reserved, must be zero in valid entries.
    #[bits(10)]
    __: u16,
}

bitflags::bitflags! {
    /// Access rights of a leaf mapping, in hardware bit positions.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct LeafPerms: u64 {
        const READ    = 1 << 1;
        const WRITE   = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER    = 1 << 4;

        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl LeafPerms {
    /// Just the R/W/X part.
    #[inline]
    #[must_use]
    pub const fn access(self) -> Self {
        self.intersection(Self::RWX)
    }
}

/// Opaque payload stored in a pending entry (54 bits).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PendingTag(u64);

impl PendingTag {
    pub const BITS: u32 = 64 - PPN_SHIFT;
    pub const MAX: u64 = (1 << Self::BITS) - 1;

    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Option<Self> {
        if value > Self::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Decoded state of a PTE.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PteKind {
    Empty,
    /// Points at the next-level table.
    Table(PhysicalPage),
    /// Maps a page. `perms` may lack all of R/W/X for revoked pages.
    Leaf {
        page: PhysicalPage,
        perms: LeafPerms,
    },
    /// Belongs to a mapping but has not been faulted in yet.
    Pending(PendingTag),
    /// Bit pattern no constructor produces.
    Corrupt(u64),
}

const PPN_SHIFT: u32 = 10;
const PPN_MASK: u64 = ((1 << 44) - 1) << PPN_SHIFT;
const SW_PENDING: u64 = 1 << 1;
const SW_NO_ACCESS: u64 = 1 << 2;

/// A single Sv39 page table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PageTableEntry(Sv39Bits);

impl PageTableEntry {
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(Sv39Bits::new())
    }

    /// Non-leaf entry pointing at `next`.
    #[inline]
    #[must_use]
    pub const fn table(next: PhysicalPage) -> Self {
        Self(Sv39Bits::new().with_valid(true).with_ppn(next.ppn()))
    }

    /// Leaf entry for `page`.
    ///
    /// `WRITE` implies `READ`. `A` and `D` are preset so the hardware never has
    /// to fault just to update them. With no R/W/X bits left the entry is
    /// stored in the invalid "no access" form.
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perms: LeafPerms) -> Self {
        let mut perms = perms;
        if perms.contains(LeafPerms::WRITE) {
            perms = perms.union(LeafPerms::READ);
        }
        let ppn = page.ppn() << PPN_SHIFT;
        if perms.access().is_empty() {
            let user = perms.intersection(LeafPerms::USER).bits();
            return Self(Sv39Bits::from_bits(ppn | SW_NO_ACCESS | user));
        }
        let bits = Sv39Bits::from_bits(ppn | perms.bits())
            .with_valid(true)
            .with_accessed(true)
            .with_dirty(true);
        Self(bits)
    }

    /// Software-only entry carrying `tag`.
    #[inline]
    #[must_use]
    pub const fn pending(tag: PendingTag) -> Self {
        Self(Sv39Bits::from_bits((tag.get() << PPN_SHIFT) | SW_PENDING))
    }

    #[must_use]
    pub const fn kind(self) -> PteKind {
        let raw = self.0.into_bits();
        if raw == 0 {
            return PteKind::Empty;
        }

        if !self.0.valid() {
            let low = raw & ((1 << PPN_SHIFT) - 1);
            if low == SW_PENDING {
                return PteKind::Pending(PendingTag(raw >> PPN_SHIFT));
            }
            if low & !LeafPerms::USER.bits() == SW_NO_ACCESS && raw & !PPN_MASK & !0x3ff == 0 {
                return PteKind::Leaf {
                    page: PhysicalPage::from_ppn(self.0.ppn()),
                    perms: LeafPerms::from_bits_truncate(low & LeafPerms::USER.bits()),
                };
            }
            return PteKind::Corrupt(raw);
        }

        let page = PhysicalPage::from_ppn(self.0.ppn());
        let perms = LeafPerms::from_bits_truncate(raw);
        if perms.access().is_empty() {
            return PteKind::Table(page);
        }
        if self.0.write() && !self.0.read() {
            return PteKind::Corrupt(raw);
        }
        PteKind::Leaf { page, perms }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0.into_bits() == 0
    }

    /// Whether the hardware walker will use this entry.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0.valid()
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> Sv39Bits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.into_bits()
    }

    /// No validation is performed; [`kind`](Self::kind) reports junk as
    /// [`PteKind::Corrupt`].
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u64) -> Self {
        Self(Sv39Bits::from_bits(v))
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PTE({:#018x} = {:?})", self.raw(), self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(ppn: u64) -> PhysicalPage {
        PhysicalPage::from_ppn(ppn)
    }

    #[test]
    fn empty_and_table() {
        assert_eq!(PageTableEntry::empty().kind(), PteKind::Empty);
        let t = PageTableEntry::table(page(0x8_0042));
        assert!(t.is_valid());
        assert_eq!(t.raw(), (0x8_0042 << 10) | 1);
        assert_eq!(t.kind(), PteKind::Table(page(0x8_0042)));
    }

    #[test]
    fn user_leaf_sets_hardware_bits() {
        let e = PageTableEntry::leaf(page(0x8_1000), LeafPerms::READ | LeafPerms::USER);
        let bits = e.bits();
        assert!(bits.valid() && bits.read() && bits.user() && bits.accessed() && bits.dirty());
        assert!(!bits.write() && !bits.execute());
        assert_eq!(
            e.kind(),
            PteKind::Leaf {
                page: page(0x8_1000),
                perms: LeafPerms::READ | LeafPerms::USER
            }
        );
    }

    #[test]
    fn write_implies_read() {
        let e = PageTableEntry::leaf(page(1), LeafPerms::WRITE);
        let PteKind::Leaf { perms, .. } = e.kind() else {
            panic!("expected leaf, got {e:?}");
        };
        assert_eq!(perms, LeafPerms::READ | LeafPerms::WRITE);
    }

    #[test]
    fn revoked_leaf_is_invisible_to_hardware() {
        let e = PageTableEntry::leaf(page(0x8_2000), LeafPerms::USER);
        assert!(!e.is_valid());
        assert_eq!(
            e.kind(),
            PteKind::Leaf {
                page: page(0x8_2000),
                perms: LeafPerms::USER
            }
        );

        let kernel = PageTableEntry::leaf(page(0x8_2000), LeafPerms::empty());
        assert!(matches!(kernel.kind(), PteKind::Leaf { perms, .. } if perms.is_empty()));
    }

    #[test]
    fn pending_tag_uses_upper_bits() {
        let tag = PendingTag::new(PendingTag::MAX).unwrap();
        let e = PageTableEntry::pending(tag);
        assert!(!e.is_valid());
        assert_eq!(e.kind(), PteKind::Pending(tag));

        let zero = PageTableEntry::pending(PendingTag::new(0).unwrap());
        assert_eq!(zero.kind(), PteKind::Pending(PendingTag::new(0).unwrap()));
        assert!(PendingTag::new(PendingTag::MAX + 1).is_none());
    }

    #[test]
    fn reserved_patterns_decode_as_corrupt() {
        // W without R
        assert!(matches!(
            PageTableEntry::from_raw(0b101).kind(),
            PteKind::Corrupt(_)
        ));
        // both software tags at once
        assert!(matches!(
            PageTableEntry::from_raw(0b110).kind(),
            PteKind::Corrupt(_)
        ));
    }
}
