//! Bitmap-backed page pool.

use alloc::vec::Vec;

use log::{debug, trace};
use membuf_addresses::PhysicalPage;
use membuf_heap::{PageFlags, PagePool};
use spin::Mutex;

const WORD_BITS: usize = u64::BITS as usize;

/// [`PagePool`] over a fixed range of page frames, tracked in a bitmap.
///
/// One bit per page, set while the page is handed out. Allocation scans for
/// the lowest clear bit, skipping fully occupied words. Releasing a page the
/// pool never handed out, or releasing one twice, panics.
pub struct BitmapPagePool {
    inner: Mutex<Inner>,
    base: PhysicalPage,
    total: usize,
}

struct Inner {
    bitmap: Vec<u64>,
    free: usize,
}

impl BitmapPagePool {
    /// Create a pool over `total` page frames starting at `base`.
    #[must_use]
    pub fn new(base: PhysicalPage, total: usize) -> Self {
        let words = total.div_ceil(WORD_BITS);
        let mut bitmap = alloc::vec![0_u64; words];
        let tail = total % WORD_BITS;
        if tail != 0 {
            // bits past the end of the range are permanently taken
            bitmap[words - 1] |= u64::MAX << tail;
        }

        debug!("bitmap page pool over {total} pages at {}", base.base());
        Self {
            inner: Mutex::new(Inner {
                bitmap,
                free: total,
            }),
            base,
            total,
        }
    }

    /// Number of pages currently available.
    #[must_use]
    pub fn pages_free(&self) -> usize {
        self.inner.lock().free
    }

    /// Number of pages the pool manages.
    #[must_use]
    pub const fn pages_total(&self) -> usize {
        self.total
    }
}

impl PagePool for BitmapPagePool {
    fn allocate_page(&self, flags: PageFlags) -> Option<PhysicalPage> {
        // this pool only tracks ownership; page contents are never touched
        let _ = flags;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.free == 0 {
            return None;
        }

        let (word_index, word) = inner
            .bitmap
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let bit = (!*word).trailing_zeros() as usize;
        *word |= 1 << bit;
        inner.free -= 1;

        let page = self.base.add_pages(word_index * WORD_BITS + bit);
        trace!("page pool handed out {page:?} ({} free)", inner.free);
        Some(page)
    }

    fn release_page(&self, page: PhysicalPage) {
        let Some(index) = page
            .frame_number()
            .checked_sub(self.base.frame_number())
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&index| index < self.total)
        else {
            panic!("released a page this pool never owned: {page:?}")
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let word = &mut inner.bitmap[index / WORD_BITS];
        let mask = 1_u64 << (index % WORD_BITS);
        assert!(*word & mask != 0, "page released twice: {page:?}");
        *word &= !mask;
        inner.free += 1;
    }
}
