//! Scatter-gather description of a buffer's backing.

use alloc::vec::Vec;

use membuf_addresses::{PAGE_SIZE, PhysicalPage};

use crate::buffer::ContiguousBlock;
use crate::error::HeapError;

/// One device-visible segment: a page, a byte length, and a byte offset into
/// that page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SgEntry {
    page: PhysicalPage,
    length: usize,
    offset: usize,
}

impl SgEntry {
    #[inline]
    #[must_use]
    pub const fn page(&self) -> PhysicalPage {
        self.page
    }

    #[inline]
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

/// Ordered scatter-gather description consumed by a DMA collaborator.
///
/// Entries appear in ascending logical order of the backing. Construction is
/// fallible because the entry table is an allocation of its own; a failed
/// construction leaves nothing behind.
#[derive(Debug)]
pub struct SgTable {
    entries: Vec<SgEntry>,
}

impl SgTable {
    /// One `PAGE_SIZE` entry per backing page, in list order.
    pub(crate) fn for_pages(pages: &[PhysicalPage]) -> Result<Self, HeapError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(pages.len())
            .map_err(|_| HeapError::OutOfMemory)?;
        for &page in pages {
            entries.push(SgEntry {
                page,
                length: PAGE_SIZE,
                offset: 0,
            });
        }
        Ok(Self { entries })
    }

    /// A single entry covering one contiguous block at its exact length.
    pub(crate) fn for_block(block: &ContiguousBlock) -> Result<Self, HeapError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(1)
            .map_err(|_| HeapError::OutOfMemory)?;
        entries.push(SgEntry {
            page: block.start(),
            length: block.len(),
            offset: 0,
        });
        Ok(Self { entries })
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[SgEntry] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_table_has_one_entry_per_page() {
        let pages = [
            PhysicalPage::from_frame(10),
            PhysicalPage::from_frame(3),
            PhysicalPage::from_frame(7),
        ];
        let table = SgTable::for_pages(&pages).unwrap();
        assert_eq!(table.len(), 3);
        for (entry, &page) in table.entries().iter().zip(&pages) {
            assert_eq!(entry.page(), page);
            assert_eq!(entry.length(), PAGE_SIZE);
            assert_eq!(entry.offset(), 0);
        }
    }

    #[test]
    fn block_table_keeps_exact_length() {
        let block = ContiguousBlock::new(PhysicalPage::from_frame(4), PAGE_SIZE + 1);
        let table = SgTable::for_block(&block).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].length(), PAGE_SIZE + 1);
        assert_eq!(table.entries()[0].offset(), 0);
        assert_eq!(table.entries()[0].page(), block.start());
    }
}
