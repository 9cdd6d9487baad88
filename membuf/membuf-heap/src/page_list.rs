//! Page-list heap strategy.
//!
//! Backs a buffer with `page_span(size)` individually acquired pages held in
//! an ordered list. Large allocations succeed without any physically
//! contiguous span being available; devices consume the backing through a
//! per-page scatter-gather view.

use alloc::vec::Vec;
use core::mem;

use log::{debug, trace};
use membuf_addresses::{KernelAddress, PAGE_SIZE, PhysicalPage, page_span};

use crate::buffer::{Backing, Buffer, BufferFlags};
use crate::error::HeapError;
use crate::heap::{Heap, HeapConfig, HeapKind};
use crate::sg::SgTable;
use crate::{KernelSpace, PageFlags, PagePool, PageProtection, ProcessRange};

/// Heap strategy backed by an ordered list of individually acquired pages.
pub struct PageListHeap<P, K> {
    pool: P,
    kernel: K,
    name: &'static str,
}

impl<P: PagePool, K: KernelSpace> PageListHeap<P, K> {
    /// Create a page-list heap drawing pages from `pool` and mapping through
    /// `kernel`.
    pub fn new(config: &HeapConfig, pool: P, kernel: K) -> Self {
        let name = config.name_or("system");
        debug!("created page-list heap \"{name}\"");
        Self { pool, kernel, name }
    }
}

/// Pages acquired so far during a multi-page allocation.
///
/// Dropping the reservation returns every held page to the pool, in reverse
/// acquisition order. Completing the allocation with
/// [`PageReservation::into_pages`] disarms that.
struct PageReservation<'p, P: PagePool> {
    pool: &'p P,
    pages: Vec<PhysicalPage>,
}

impl<'p, P: PagePool> PageReservation<'p, P> {
    /// Reserve the list itself; the slot array is an allocation of its own.
    fn with_capacity(pool: &'p P, count: usize) -> Result<Self, HeapError> {
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(count)
            .map_err(|_| HeapError::OutOfMemory)?;
        Ok(Self { pool, pages })
    }

    fn acquire(&mut self, flags: PageFlags) -> Result<(), HeapError> {
        let Some(page) = self.pool.allocate_page(flags) else {
            return Err(HeapError::OutOfMemory);
        };
        self.pages.push(page);
        Ok(())
    }

    /// Keep the pages; the reservation no longer owns them.
    fn into_pages(mut self) -> Vec<PhysicalPage> {
        let pages = mem::take(&mut self.pages);
        mem::forget(self);
        pages
    }
}

impl<P: PagePool> Drop for PageReservation<'_, P> {
    fn drop(&mut self) {
        while let Some(page) = self.pages.pop() {
            self.pool.release_page(page);
        }
    }
}

impl<P: PagePool, K: KernelSpace> Heap for PageListHeap<P, K> {
    fn kind(&self) -> HeapKind {
        HeapKind::PageList
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

        let count = page_span(size);
        let mut reservation = PageReservation::with_capacity(&self.pool, count)?;
        for _ in 0..count {
            reservation.acquire(PageFlags::ZEROED | PageFlags::HIGHMEM)?;
        }
        let pages = reservation.into_pages();

        trace!("\"{}\": allocated {count} pages for {size} bytes", self.name);
        Ok(Buffer::new(size, flags, Backing::PageList(pages)))
    }

    fn free(&self, buffer: Buffer) {
        match buffer.into_backing() {
            Backing::PageList(pages) => {
                for page in pages {
                    self.pool.release_page(page);
                }
            }
            Backing::Contiguous(_) => {
                panic!("page-list heap asked to free a contiguous buffer")
            }
        }
    }

    fn map_to_device<'b>(&self, buffer: &'b mut Buffer) -> Result<&'b SgTable, HeapError> {
        buffer.build_device_view(|backing| {
            let Backing::PageList(pages) = backing else {
                panic!("page-list heap asked to map a contiguous buffer")
            };
            let view = SgTable::for_pages(pages)?;
            trace!("\"{}\": built {}-entry device view", self.name, view.len());
            Ok(view)
        })
    }

    fn unmap_from_device(&self, buffer: &mut Buffer) {
        drop(buffer.take_device_view());
    }

    fn map_to_kernel(&self, buffer: &Buffer) -> Result<KernelAddress, HeapError> {
        let Backing::PageList(pages) = buffer.backing() else {
            panic!("page-list heap asked to map a contiguous buffer")
        };
        let Some(base) = self.kernel.map_pages(pages, PageProtection::kernel_data()) else {
            return Err(HeapError::OutOfMemory);
        };
        trace!("\"{}\": mapped {} pages at {base}", self.name, pages.len());
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
        let Backing::PageList(pages) = buffer.backing() else {
            panic!("page-list heap asked to map a contiguous buffer")
        };
        if range.len() > pages.len() * PAGE_SIZE {
            return Err(HeapError::InvalidArgument("range longer than the buffer"));
        }

        // The range's page offset is not applied here; insertion starts at
        // the first page of the list. On failure, pages already inserted
        // stay mapped and the range owner must tear the whole range down.
        let mut at = range.start();
        let mut remaining = range.len();
        for &page in pages {
            if remaining == 0 {
                break;
            }
            range.insert_page(at, page)?;
            at += PAGE_SIZE as u64;
            remaining = remaining.saturating_sub(PAGE_SIZE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapError;
    use crate::buffer::ContiguousBlock;
    use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use membuf_addresses::ProcessAddress;

    /// Counting page source with an optional scripted failure index.
    struct FlakyPool {
        fail_at: Option<usize>,
        allocated: AtomicUsize,
        released: AtomicUsize,
    }

    impl FlakyPool {
        fn new() -> Self {
            Self {
                fail_at: None,
                allocated: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }

        fn failing_at(index: usize) -> Self {
            Self {
                fail_at: Some(index),
                ..Self::new()
            }
        }

        fn allocated(&self) -> usize {
            self.allocated.load(Ordering::Relaxed)
        }

        fn live(&self) -> usize {
            self.allocated() - self.released.load(Ordering::Relaxed)
        }
    }

    impl PagePool for FlakyPool {
        fn allocate_page(&self, flags: PageFlags) -> Option<PhysicalPage> {
            assert!(flags.contains(PageFlags::ZEROED | PageFlags::HIGHMEM));
            let index = self.allocated.load(Ordering::Relaxed);
            if self.fail_at == Some(index) {
                return None;
            }
            self.allocated.store(index + 1, Ordering::Relaxed);
            // frames handed out in order: 1, 2, 3, ..
            Some(PhysicalPage::from_frame(index as u64 + 1))
        }

        fn release_page(&self, _page: PhysicalPage) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Kernel space handing out bases from a bump cursor.
    struct WindowKernelSpace {
        next: AtomicU64,
        mapped: AtomicUsize,
    }

    impl WindowKernelSpace {
        fn new() -> Self {
            Self {
                next: AtomicU64::new(0xFFFF_8000_0000_0000),
                mapped: AtomicUsize::new(0),
            }
        }

        fn mapped(&self) -> usize {
            self.mapped.load(Ordering::Relaxed)
        }
    }

    impl KernelSpace for WindowKernelSpace {
        fn map_pages(
            &self,
            pages: &[PhysicalPage],
            protection: PageProtection,
        ) -> Option<KernelAddress> {
            assert_eq!(protection, PageProtection::kernel_data());
            let len = (pages.len() * PAGE_SIZE) as u64;
            let base = self.next.fetch_add(len, Ordering::Relaxed);
            self.mapped.fetch_add(pages.len(), Ordering::Relaxed);
            Some(KernelAddress::new(base))
        }

        fn unmap_pages(&self, _base: KernelAddress, count: usize) {
            self.mapped.fetch_sub(count, Ordering::Relaxed);
        }
    }

    /// Kernel space that is always out of room.
    struct NoKernelSpace;

    impl KernelSpace for NoKernelSpace {
        fn map_pages(&self, _: &[PhysicalPage], _: PageProtection) -> Option<KernelAddress> {
            None
        }

        fn unmap_pages(&self, _: KernelAddress, _: usize) {
            unreachable!("nothing was ever mapped")
        }
    }

    /// Recording destination range with an optional scripted insert failure.
    struct ScriptedRange {
        start: ProcessAddress,
        len: usize,
        fail_at: Option<usize>,
        inserted: Vec<(ProcessAddress, PhysicalPage)>,
    }

    impl ScriptedRange {
        fn new(len: usize) -> Self {
            Self {
                start: ProcessAddress::new(0x7000_0000_0000),
                len,
                fail_at: None,
                inserted: Vec::new(),
            }
        }

        fn failing_at(len: usize, index: usize) -> Self {
            Self {
                fail_at: Some(index),
                ..Self::new(len)
            }
        }
    }

    impl ProcessRange for ScriptedRange {
        fn start(&self) -> ProcessAddress {
            self.start
        }

        fn len(&self) -> usize {
            self.len
        }

        fn page_offset(&self) -> usize {
            0
        }

        fn insert_page(
            &mut self,
            at: ProcessAddress,
            page: PhysicalPage,
        ) -> Result<(), MapError> {
            if self.fail_at == Some(self.inserted.len()) {
                return Err(MapError::Conflict);
            }
            self.inserted.push((at, page));
            Ok(())
        }

        fn remap_contiguous(&mut self, _base: PhysicalPage) -> Result<(), MapError> {
            unreachable!("page-list mappings insert page by page")
        }
    }

    fn heap_over(pool: &FlakyPool) -> PageListHeap<&FlakyPool, WindowKernelSpace> {
        PageListHeap::new(&HeapConfig::new(), pool, WindowKernelSpace::new())
    }

    #[test]
    fn allocate_backs_every_page_of_the_span() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);

        let buffer = heap
            .allocate(3 * PAGE_SIZE + 1, PAGE_SIZE, BufferFlags::empty())
            .unwrap();
        assert_eq!(buffer.size(), 3 * PAGE_SIZE + 1);
        assert_eq!(buffer.page_count(), 4);
        assert_eq!(pool.allocated(), 4);
        assert_eq!(pool.live(), 4);

        heap.free(buffer);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn allocation_failure_rolls_back_acquired_pages() {
        let pool = FlakyPool::failing_at(2);
        let heap = heap_over(&pool);

        let err = heap
            .allocate(4 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory));
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn zero_length_allocation_is_rejected() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);

        let err = heap.allocate(0, PAGE_SIZE, BufferFlags::empty()).unwrap_err();
        assert!(matches!(err, HeapError::InvalidArgument(_)));
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn device_view_has_one_entry_per_page_in_order() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let mut buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let view = heap.map_to_device(&mut buffer).unwrap();
        assert_eq!(view.len(), 3);
        for (i, entry) in view.entries().iter().enumerate() {
            assert_eq!(entry.page().frame_number(), i as u64 + 1);
            assert_eq!(entry.length(), PAGE_SIZE);
            assert_eq!(entry.offset(), 0);
        }

        heap.free(buffer);
    }

    #[test]
    fn device_view_is_cached_until_unmapped() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let mut buffer = heap
            .allocate(2 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let first = heap.map_to_device(&mut buffer).unwrap().entries().as_ptr();
        let second = heap.map_to_device(&mut buffer).unwrap().entries().as_ptr();
        assert_eq!(first, second);

        heap.unmap_from_device(&mut buffer);
        assert!(buffer.device_view().is_none());

        // unmapping without a live view leaves the buffer untouched
        heap.unmap_from_device(&mut buffer);
        assert!(buffer.device_view().is_none());

        heap.free(buffer);
    }

    #[test]
    fn device_view_round_trip_is_a_no_op_on_the_backing() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let mut buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        heap.map_to_device(&mut buffer).unwrap();
        heap.unmap_from_device(&mut buffer);
        heap.free(buffer);

        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn process_map_inserts_in_backing_order() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let mut range = ScriptedRange::new(3 * PAGE_SIZE);
        heap.map_to_process(&buffer, &mut range).unwrap();

        assert_eq!(range.inserted.len(), 3);
        for (i, (at, page)) in range.inserted.iter().enumerate() {
            assert_eq!(at.as_u64(), range.start.as_u64() + (i * PAGE_SIZE) as u64);
            assert_eq!(page.frame_number(), i as u64 + 1);
        }

        heap.free(buffer);
    }

    #[test]
    fn oversized_process_range_is_rejected_before_any_insert() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let mut range = ScriptedRange::new(3 * PAGE_SIZE + 1);
        let err = heap.map_to_process(&buffer, &mut range).unwrap_err();
        assert!(matches!(err, HeapError::InvalidArgument(_)));
        assert!(range.inserted.is_empty());

        heap.free(buffer);
    }

    #[test]
    fn failed_process_insert_leaves_prior_pages_mapped() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let mut range = ScriptedRange::failing_at(3 * PAGE_SIZE, 2);
        let err = heap.map_to_process(&buffer, &mut range).unwrap_err();
        assert!(matches!(err, HeapError::Mapping(MapError::Conflict)));
        // the two pages inserted before the failure are still there
        assert_eq!(range.inserted.len(), 2);

        heap.free(buffer);
    }

    #[test]
    fn short_range_covers_a_prefix_of_the_list() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let mut range = ScriptedRange::new(PAGE_SIZE + 1);
        heap.map_to_process(&buffer, &mut range).unwrap();
        assert_eq!(range.inserted.len(), 2);

        heap.free(buffer);
    }

    #[test]
    fn kernel_map_spans_all_pages() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(3 * PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let base = heap.map_to_kernel(&buffer).unwrap();
        assert_eq!(heap.kernel.mapped(), 3);
        heap.unmap_from_kernel(&buffer, base);
        assert_eq!(heap.kernel.mapped(), 0);

        heap.free(buffer);
    }

    #[test]
    fn kernel_window_exhaustion_is_out_of_memory() {
        let pool = FlakyPool::new();
        let heap = PageListHeap::new(&HeapConfig::new(), &pool, NoKernelSpace);
        let buffer = heap
            .allocate(PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let err = heap.map_to_kernel(&buffer).unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory));

        heap.free(buffer);
    }

    #[test]
    fn physical_address_is_unsupported() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let buffer = heap
            .allocate(PAGE_SIZE, PAGE_SIZE, BufferFlags::empty())
            .unwrap();

        let err = heap.physical_address(&buffer).unwrap_err();
        assert!(matches!(err, HeapError::Unsupported));

        heap.free(buffer);
    }

    #[test]
    #[should_panic(expected = "page-list heap")]
    fn freeing_a_contiguous_buffer_panics() {
        let pool = FlakyPool::new();
        let heap = heap_over(&pool);
        let foreign = Buffer::new(
            PAGE_SIZE,
            BufferFlags::empty(),
            Backing::Contiguous(ContiguousBlock::new(PhysicalPage::from_frame(1), PAGE_SIZE)),
        );
        heap.free(foreign);
    }
}
