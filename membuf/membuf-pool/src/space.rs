//! Address-space pieces: a linear kernel mapping window and a recording
//! process range.

use alloc::vec::Vec;

use log::{debug, trace};
use membuf_addresses::{KernelAddress, PAGE_SIZE, PhysicalPage, ProcessAddress};
use membuf_heap::{KernelSpace, MapError, PageProtection, ProcessRange};
use spin::Mutex;

/// [`KernelSpace`] handing out ranges from a fixed window with a bump
/// cursor.
///
/// Unmapped ranges are forgotten but their window space is not reused; the
/// cursor only moves forward. Unmapping a (base, count) pair the space does
/// not hold panics.
pub struct LinearKernelSpace {
    inner: Mutex<SpaceInner>,
    window_start: KernelAddress,
    window_len: usize,
}

struct SpaceInner {
    cursor: u64,
    live: Vec<(u64, usize)>,
}

impl LinearKernelSpace {
    /// Create a space over `window_pages` pages starting at `window_start`.
    #[must_use]
    pub fn new(window_start: KernelAddress, window_pages: usize) -> Self {
        debug!("kernel window of {window_pages} pages at {window_start}");
        Self {
            inner: Mutex::new(SpaceInner {
                cursor: window_start.as_u64(),
                live: Vec::new(),
            }),
            window_start,
            window_len: window_pages * PAGE_SIZE,
        }
    }

    /// Number of pages in currently live mappings.
    #[must_use]
    pub fn pages_mapped(&self) -> usize {
        self.inner.lock().live.iter().map(|&(_, pages)| pages).sum()
    }
}

impl KernelSpace for LinearKernelSpace {
    fn map_pages(
        &self,
        pages: &[PhysicalPage],
        protection: PageProtection,
    ) -> Option<KernelAddress> {
        // bookkeeping space; the protection never materializes anywhere
        let _ = protection;
        if pages.is_empty() {
            return None;
        }

        let len = pages.len() * PAGE_SIZE;
        let window_end = self.window_start.as_u64() + self.window_len as u64;

        let mut inner = self.inner.lock();
        if inner.cursor + len as u64 > window_end {
            return None;
        }
        let base = inner.cursor;
        inner.cursor += len as u64;
        inner.live.push((base, pages.len()));

        trace!("kernel window mapped {} pages at {base:#x}", pages.len());
        Some(KernelAddress::new(base))
    }

    fn unmap_pages(&self, base: KernelAddress, count: usize) {
        let mut inner = self.inner.lock();
        let Some(index) = inner
            .live
            .iter()
            .position(|&(start, pages)| start == base.as_u64() && pages == count)
        else {
            panic!("unmapped a range this space does not hold: {base}")
        };
        inner.live.swap_remove(index);
        trace!("kernel window unmapped {count} pages at {base}");
    }
}

/// [`ProcessRange`] that records the mappings it receives.
///
/// Stands in for a process's reserved destination range. Insert and remap
/// failures can be scripted through the builder methods, so callers can
/// exercise the heaps' partial-failure paths without a real address space.
pub struct ReservedRange {
    start: ProcessAddress,
    len: usize,
    page_offset: usize,
    inserted: Vec<(ProcessAddress, PhysicalPage)>,
    remapped: Option<PhysicalPage>,
    fail_insert_at: Option<(usize, MapError)>,
    fail_remap: Option<MapError>,
}

impl ReservedRange {
    /// Reserve `len` bytes starting at `start`.
    #[must_use]
    pub fn new(start: ProcessAddress, len: usize) -> Self {
        Self {
            start,
            len,
            page_offset: 0,
            inserted: Vec::new(),
            remapped: None,
            fail_insert_at: None,
            fail_remap: None,
        }
    }

    /// Ask for the mapping to start `page_offset` pages into the buffer.
    #[must_use]
    pub fn at_page_offset(mut self, page_offset: usize) -> Self {
        self.page_offset = page_offset;
        self
    }

    /// Fail the insert with `error` once `index` pages are in.
    #[must_use]
    pub fn failing_insert_at(mut self, index: usize, error: MapError) -> Self {
        self.fail_insert_at = Some((index, error));
        self
    }

    /// Fail any remap attempt with `error`.
    #[must_use]
    pub fn failing_remap(mut self, error: MapError) -> Self {
        self.fail_remap = Some(error);
        self
    }

    /// The per-page insertions received so far, in order.
    #[must_use]
    pub fn inserted(&self) -> &[(ProcessAddress, PhysicalPage)] {
        &self.inserted
    }

    /// The base page of a received whole-range remap, if any.
    #[must_use]
    pub const fn remapped(&self) -> Option<PhysicalPage> {
        self.remapped
    }
}

impl ProcessRange for ReservedRange {
    fn start(&self) -> ProcessAddress {
        self.start
    }

    fn len(&self) -> usize {
        self.len
    }

    fn page_offset(&self) -> usize {
        self.page_offset
    }

    fn insert_page(&mut self, at: ProcessAddress, page: PhysicalPage) -> Result<(), MapError> {
        if let Some((index, error)) = self.fail_insert_at {
            if self.inserted.len() == index {
                return Err(error);
            }
        }
        let Some(offset) = at.as_u64().checked_sub(self.start.as_u64()) else {
            return Err(MapError::OutOfRange);
        };
        if offset >= self.len as u64 {
            return Err(MapError::OutOfRange);
        }
        if self.inserted.iter().any(|&(existing, _)| existing == at) {
            return Err(MapError::Conflict);
        }
        self.inserted.push((at, page));
        Ok(())
    }

    fn remap_contiguous(&mut self, base: PhysicalPage) -> Result<(), MapError> {
        if let Some(error) = self.fail_remap {
            return Err(error);
        }
        if self.remapped.is_some() {
            return Err(MapError::Conflict);
        }
        self.remapped = Some(base);
        Ok(())
    }
}
