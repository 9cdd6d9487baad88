//! # Pluggable Physical-Memory Heaps for Buffer Sharing
//!
//! Two interchangeable allocation strategies behind one operation contract,
//! producing buffers that can be handed to devices, the kernel, and user
//! processes.
//!
//! ## What you get
//! - The [`Heap`] trait: the fixed operation set both strategies implement
//!   (allocate, free, the three mapping pairs, physical-address query).
//! - [`PageListHeap`]: backing from individually acquired pages, usable for
//!   large allocations with no contiguity requirement.
//! - [`ContiguousHeap`]: backing from a single physically-contiguous block,
//!   for devices that cannot walk a scatter list.
//! - The [`Buffer`] value type with its strategy-owned backing and lazily
//!   built device view ([`SgTable`]).
//! - Capability traits for the injected environment: [`PagePool`],
//!   [`BlockPool`], [`KernelSpace`], [`ProcessRange`].
//!
//! ## Lifecycle
//!
//! A caller picks a heap, allocates a [`Buffer`], then requests device,
//! kernel, and process views independently and in any order. Views are
//! released independently; the buffer itself is freed last, by value, so a
//! second free does not compile.
//!
//! Operations on one buffer are not synchronized here; callers serialize
//! them. The injected pools must tolerate concurrent use, which is why the
//! capability traits carry `Send + Sync` bounds.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod buffer;
mod contiguous;
mod error;
mod heap;
mod page_list;
mod sg;

pub use crate::buffer::{Buffer, BufferFlags, ContiguousBlock};
pub use crate::contiguous::ContiguousHeap;
pub use crate::error::{HeapError, MapError};
pub use crate::heap::{Heap, HeapConfig, HeapKind};
pub use crate::page_list::PageListHeap;
pub use crate::sg::{SgEntry, SgTable};

use membuf_addresses::{KernelAddress, PhysicalPage, ProcessAddress};

bitflags::bitflags! {
    /// Page acquisition semantics requested from a [`PagePool`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Contents must be zeroed before hand-out.
        const ZEROED = 1 << 0;
        /// The pool may satisfy the request from memory that has no
        /// permanent kernel mapping.
        const HIGHMEM = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Protection applied to a kernel-virtual mapping.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PageProtection: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Accesses go through the CPU caches. Cleared for mappings that
        /// alias device-visible memory without coherency.
        const CACHED = 1 << 3;
    }
}

impl PageProtection {
    /// Cacheable read/write kernel data, the protection buffer mappings use.
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::READ.union(Self::WRITE).union(Self::CACHED)
    }
}

/// Source of individually acquired physical pages.
///
/// The implementation decides where pages come from (bitmap pool, buddy
/// system, etc.). Returns `None` on exhaustion; pages handed out must be
/// page-aligned and honor the requested [`PageFlags`].
pub trait PagePool: Send + Sync {
    /// Acquire one physical page. `None` means the pool is exhausted.
    fn allocate_page(&self, flags: PageFlags) -> Option<PhysicalPage>;

    /// Return a page previously obtained from this pool.
    fn release_page(&self, page: PhysicalPage);
}

/// Source of physically-contiguous, page-aligned blocks.
///
/// Same conventions as [`PagePool`]; the block keeps the exact requested
/// byte length even when the pool accounts in whole pages internally.
pub trait BlockPool: Send + Sync {
    /// Acquire one contiguous block of `len` bytes. `None` means no
    /// sufficiently large span is available.
    fn allocate_block(&self, len: usize, flags: PageFlags) -> Option<ContiguousBlock>;

    /// Return a block previously obtained from this pool.
    fn release_block(&self, block: ContiguousBlock);
}

/// Kernel-virtual address space: maps an ordered page list into one
/// contiguous kernel range.
///
/// Returns `None` when the kernel window is exhausted. Unmapping is by
/// (base, page count); the pages themselves are untouched.
pub trait KernelSpace: Send + Sync {
    /// Map `pages` contiguously and return the base of the range.
    fn map_pages(
        &self,
        pages: &[PhysicalPage],
        protection: PageProtection,
    ) -> Option<KernelAddress>;

    /// Release a range of `count` pages starting at `base`.
    fn unmap_pages(&self, base: KernelAddress, count: usize);
}

/// A destination range a process has already reserved for a buffer.
///
/// Carries the range geometry and the two insertion primitives the heap
/// strategies use: per-page insertion for page-list backings and whole-range
/// remapping for contiguous ones. The range owner is responsible for tearing
/// the range down afterwards, including after a partially applied mapping.
pub trait ProcessRange: Send + Sync {
    /// First address of the reserved range.
    fn start(&self) -> ProcessAddress;

    /// Byte length of the reserved range.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page offset into the buffer at which the range wants to start.
    fn page_offset(&self) -> usize;

    /// Insert one page at `at`, which lies inside the reserved range.
    ///
    /// # Errors
    /// Fails if the slot is occupied, out of range, or the address space
    /// cannot take the mapping.
    fn insert_page(&mut self, at: ProcessAddress, page: PhysicalPage) -> Result<(), MapError>;

    /// Map the whole range onto consecutive pages starting at `base`.
    ///
    /// # Errors
    /// Fails if the address space rejects the remap; nothing is applied
    /// partially.
    fn remap_contiguous(&mut self, base: PhysicalPage) -> Result<(), MapError>;
}

impl<P: PagePool + ?Sized> PagePool for &P {
    fn allocate_page(&self, flags: PageFlags) -> Option<PhysicalPage> {
        (**self).allocate_page(flags)
    }

    fn release_page(&self, page: PhysicalPage) {
        (**self).release_page(page);
    }
}

impl<B: BlockPool + ?Sized> BlockPool for &B {
    fn allocate_block(&self, len: usize, flags: PageFlags) -> Option<ContiguousBlock> {
        (**self).allocate_block(len, flags)
    }

    fn release_block(&self, block: ContiguousBlock) {
        (**self).release_block(block);
    }
}

impl<K: KernelSpace + ?Sized> KernelSpace for &K {
    fn map_pages(
        &self,
        pages: &[PhysicalPage],
        protection: PageProtection,
    ) -> Option<KernelAddress> {
        (**self).map_pages(pages, protection)
    }

    fn unmap_pages(&self, base: KernelAddress, count: usize) {
        (**self).unmap_pages(base, count);
    }
}
