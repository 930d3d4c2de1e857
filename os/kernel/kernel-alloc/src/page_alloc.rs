//! Physical page allocator for the VM core.
//!
//! Pages are carved from a fixed pool with a bump pointer; freed pages go on a
//! free list and are handed out again before the bump pointer advances. Every
//! page is zero-filled on allocation.
//!
//! With a shuffle seed, reuse order is randomized (a `SmallRng` picks which
//! free page to hand out next). This only diversifies the physical layout; it
//! is not a security boundary.
//!
//! There is no internal locking: callers hold the VM lock.

use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_vmem::{FrameAlloc, PhysMapper, frame_bytes};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageAllocError {
    #[error("page pool {start}..{end} is not page aligned")]
    Unaligned {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("page pool {start}..{end} is empty")]
    Empty {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
}

pub struct PageAllocator<M: PhysMapper> {
    mapper: M,
    start: PhysicalAddress,
    next: PhysicalAddress,
    end: PhysicalAddress,
    free: Vec<PhysicalPage>,
    shuffle: Option<SmallRng>,
}

impl<M: PhysMapper> PageAllocator<M> {
    /// Pool over `[start, end)`, which must be page aligned and non-empty.
    pub fn new(mapper: M, start: PhysicalAddress, end: PhysicalAddress) -> Result<Self, PageAllocError> {
        if !start.is_page_aligned() || !end.is_page_aligned() {
            return Err(PageAllocError::Unaligned { start, end });
        }
        if end <= start {
            return Err(PageAllocError::Empty { start, end });
        }
        Ok(Self {
            mapper,
            start,
            next: start,
            end,
            free: Vec::new(),
            shuffle: None,
        })
    }

    /// Randomize free-list reuse order, seeded with `seed`.
    #[must_use]
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = Some(SmallRng::seed_from_u64(seed));
        self
    }

    /// Carves the first `pages` pages of an untouched pool into a pool of
    /// their own. `None` if that would leave either side empty.
    pub fn split_front(&mut self, pages: u64) -> Option<Self>
    where
        M: Clone,
    {
        debug_assert!(self.next == self.start && self.free.is_empty(), "pool already in use");
        if pages == 0 || pages >= self.total_count() {
            return None;
        }
        let mid = self.start + pages * PAGE_SIZE;
        let front = Self {
            mapper: self.mapper.clone(),
            start: self.start,
            next: self.start,
            end: mid,
            free: Vec::new(),
            shuffle: None,
        };
        self.start = mid;
        self.next = mid;
        Some(front)
    }

    /// A zero-filled page, or `None` when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<PhysicalPage> {
        let page = if self.free.is_empty() {
            if self.next >= self.end {
                return None;
            }
            let page = self.next.page();
            self.next = self.next + PAGE_SIZE;
            page
        } else {
            let idx = match &mut self.shuffle {
                Some(rng) => rng.gen_range(0..self.free.len()),
                None => self.free.len() - 1,
            };
            self.free.swap_remove(idx)
        };

        unsafe { frame_bytes(&self.mapper, page) }.fill(0);
        Some(page)
    }

    /// Returns `page` to the pool.
    pub fn free(&mut self, page: PhysicalPage) {
        debug_assert!(self.contains(page), "{page:?} is not from this pool");
        debug_assert!(!self.free.contains(&page), "double free of {page:?}");
        self.free.push(page);
    }

    #[must_use]
    pub fn contains(&self, page: PhysicalPage) -> bool {
        page.base() >= self.start && page.base() < self.next
    }

    /// Pages that can still be handed out.
    #[must_use]
    pub fn free_count(&self) -> u64 {
        (self.end.as_u64() - self.next.as_u64()) / PAGE_SIZE + self.free.len() as u64
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        (self.end.as_u64() - self.start.as_u64()) / PAGE_SIZE
    }

    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.total_count() - self.free_count()
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<M: PhysMapper> FrameAlloc for PageAllocator<M> {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.alloc()
    }

    #[inline]
    fn free_4k(&mut self, page: PhysicalPage) {
        self.free(page);
    }
}
