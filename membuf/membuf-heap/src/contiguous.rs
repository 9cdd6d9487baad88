//! Contiguous heap strategy.
//!
//! Backs a buffer with a single physically contiguous block, for devices
//! that cannot walk a scatter-gather list. The physical base is queryable
//! and process mappings are one whole-range remap instead of per-page
//! insertions.

use alloc::vec::Vec;

use log::{debug, trace};
use membuf_addresses::{KernelAddress, PhysicalAddress};

use crate::buffer::{Backing, Buffer, BufferFlags};
use crate::error::HeapError;
use crate::heap::{Heap, HeapConfig, HeapKind};
use crate::sg::SgTable;
use crate::{BlockPool, KernelSpace, PageFlags, PageProtection, ProcessRange};

/// Heap strategy backed by one physically contiguous block per buffer.
pub struct ContiguousHeap<B, K> {
    pool: B,
    kernel: K,
    name: &'static str,
}

impl<B: BlockPool, K: KernelSpace> ContiguousHeap<B, K> {
    /// Create a contiguous heap drawing blocks from `pool` and mapping
    /// through `kernel`.
    pub fn new(config: &HeapConfig, pool: B, kernel: K) -> Self {
        let name = config.name_or("system-contig");
        debug!("created contiguous heap \"{name}\"");
        Self { pool, kernel, name }
    }
}

impl<B: BlockPool, K: KernelSpace> Heap for ContiguousHeap<B, K> {
    fn kind(&self) -> HeapKind {
        HeapKind::Contiguous
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn allocate(
        &self,
        size: usize,
        align: usize,
        flags: BufferFlags,
    ) -> Result<Buffer, HeapError> {
        let _ = align;
        if size == 0 {
            return Err(HeapError::InvalidArgument("zero-length allocation"));
        }

        let Some(block) = self.pool.allocate_block(size, PageFlags::ZEROED) else {
            return Err(HeapError::OutOfMemory);
        };

        trace!(
            "\"{}\": allocated a {size}-byte block at {}",
            self.name,
            block.start().base()
        );
        Ok(Buffer::new(size, flags, Backing::Contiguous(block)))
    }

    fn free(&self, buffer: Buffer) {
        match buffer.into_backing() {
            Backing::Contiguous(block) => self.pool.release_block(block),
            Backing::PageList(_) => {
                panic!("contiguous heap asked to free a page-list buffer")
            }
        }
    }

    fn map_to_device<'b>(&self, buffer: &'b mut Buffer) -> Result<&'b SgTable, HeapError> {
        buffer.build_device_view(|backing| {
            let Backing::Contiguous(block) = backing else {
                panic!("contiguous heap asked to map a page-list buffer")
            };
            let view = SgTable::for_block(block)?;
            trace!("\"{}\": built a single-entry device view", self.name);
            Ok(view)
        })
    }

    fn unmap_from_device(&self, buffer: &mut Buffer) {
        drop(buffer.take_device_view());
    }

    fn map_to_kernel(&self, buffer: &Buffer) -> Result<KernelAddress, HeapError> {
        let Backing::Contiguous(block) = buffer.backing() else {
            panic!("contiguous heap asked to map a page-list buffer")
        };

        // The kernel window takes an explicit list, so the block's frames
        // are enumerated in place.
        let count = buffer.page_count();
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(count)
            .map_err(|_| HeapError::OutOfMemory)?;
        for i in 0..count {
            pages.push(block.start().add_pages(i));
        }

        let Some(base) = self.kernel.map_pages(&pages, PageProtection::kernel_data()) else {
            return Err(HeapError::OutOfMemory);
        };
        trace!("\"{}\": mapped {count} pages at {base}", self.name);
        Ok(base)
    }

    fn unmap_from_kernel(&self, buffer: &Buffer, base: KernelAddress) {
        self.kernel.unmap_pages(base, buffer.page_count());
    }

    fn map_to_process(
        &self,
        buffer: &Buffer,
        range: &mut dyn ProcessRange,
    ) -> Result<(), HeapError> {
        let Backing::Contiguous(block) = buffer.backing() else {
            panic!("contiguous heap asked to map a page-list buffer")
        };

        // The range length is not validated against the block; the remap
        // covers whatever the range spans from the offset page onward.
        range.remap_contiguous(block.start().add_pages(range.page_offset()))?;
        Ok(())
    }

    fn physical_address(&self, buffer: &Buffer) -> Result<(PhysicalAddress, usize), HeapError> {
        let Backing::Contiguous(block) = buffer.backing() else {
            panic!("contiguous heap asked to describe a page-list buffer")
        };
        Ok((block.start().base(), buffer.size()))
    }
}
