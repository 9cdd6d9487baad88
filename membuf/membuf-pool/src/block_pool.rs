//! Region-backed contiguous block pool.

use alloc::vec::Vec;

use log::{debug, trace};
use membuf_addresses::{PAGE_SIZE, PhysicalPage, page_span};
use membuf_heap::{BlockPool, ContiguousBlock, PageFlags};
use spin::Mutex;

/// [`BlockPool`] carving page-aligned blocks out of one physical region.
///
/// Free spans are kept as an address-ordered list; allocation is first-fit
/// and takes the front of the chosen span. Released blocks coalesce with
/// their neighbors. Releasing a block outside the region, or one that
/// overlaps a span the pool already holds, panics.
pub struct RegionBlockPool {
    inner: Mutex<Vec<FreeRange>>,
    region: FreeRange,
}

/// A free span of whole page frames.
#[derive(Copy, Clone)]
struct FreeRange {
    start: u64,
    pages: usize,
}

impl FreeRange {
    const fn end(self) -> u64 {
        self.start + self.pages as u64
    }
}

impl RegionBlockPool {
    /// Create a pool over `pages` page frames starting at `base`.
    #[must_use]
    pub fn new(base: PhysicalPage, pages: usize) -> Self {
        debug!("region block pool over {pages} pages at {}", base.base());
        let region = FreeRange {
            start: base.frame_number(),
            pages,
        };
        let mut ranges = Vec::new();
        if pages != 0 {
            ranges.push(region);
        }
        Self {
            inner: Mutex::new(ranges),
            region,
        }
    }

    /// Bytes currently free, summed over all spans. A request can still fail
    /// when no single span is large enough.
    #[must_use]
    pub fn bytes_free(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .map(|range| range.pages * PAGE_SIZE)
            .sum()
    }
}

impl BlockPool for RegionBlockPool {
    fn allocate_block(&self, len: usize, flags: PageFlags) -> Option<ContiguousBlock> {
        // this pool only tracks ownership; block contents are never touched
        let _ = flags;

        let need = page_span(len);
        if need == 0 {
            return None;
        }

        let mut ranges = self.inner.lock();
        let index = ranges.iter().position(|range| range.pages >= need)?;
        let range = &mut ranges[index];
        let start = range.start;
        range.start += need as u64;
        range.pages -= need;
        if range.pages == 0 {
            ranges.remove(index);
        }

        trace!("block pool handed out {need} pages at frame {start:#x}");
        Some(ContiguousBlock::new(PhysicalPage::from_frame(start), len))
    }

    fn release_block(&self, block: ContiguousBlock) {
        let pages = page_span(block.len());
        let start = block.start().frame_number();
        let end = start + pages as u64;
        assert!(
            start >= self.region.start && end <= self.region.end(),
            "released a block this pool never owned: frame {start:#x}"
        );

        let mut ranges = self.inner.lock();
        let index = ranges
            .iter()
            .position(|range| range.start > start)
            .unwrap_or(ranges.len());

        if index > 0 {
            assert!(
                ranges[index - 1].end() <= start,
                "block released twice: frame {start:#x}"
            );
        }
        if index < ranges.len() {
            assert!(
                end <= ranges[index].start,
                "block released twice: frame {start:#x}"
            );
        }

        let touches_before = index > 0 && ranges[index - 1].end() == start;
        let touches_after = index < ranges.len() && ranges[index].start == end;
        match (touches_before, touches_after) {
            (true, true) => {
                ranges[index - 1].pages += pages + ranges[index].pages;
                ranges.remove(index);
            }
            (true, false) => ranges[index - 1].pages += pages,
            (false, true) => {
                ranges[index].start = start;
                ranges[index].pages += pages;
            }
            (false, false) => ranges.insert(index, FreeRange { start, pages }),
        }
    }
}
