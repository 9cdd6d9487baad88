//! The buffer value type and its strategy-owned backing.

use alloc::vec::Vec;

use membuf_addresses::{PhysicalPage, page_span};

use crate::sg::SgTable;

bitflags::bitflags! {
    /// Caller-supplied allocation request flags.
    ///
    /// Both strategies record these on the [`Buffer`] without interpreting
    /// them; per-view cache policy is chosen by the mapping layers above.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        /// Mappings of the buffer should go through the CPU caches.
        const CACHED = 1 << 0;
    }
}

/// One physically-contiguous, page-aligned span of memory.
///
/// `len` is the exact byte length the caller asked for; the underlying pool
/// may account in whole pages, but that padding is invisible here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ContiguousBlock {
    start: PhysicalPage,
    len: usize,
}

impl ContiguousBlock {
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalPage, len: usize) -> Self {
        Self { start, len }
    }

    /// First page of the block.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalPage {
        self.start
    }

    /// Exact byte length.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Strategy-owned backing of a [`Buffer`].
///
/// Each heap strategy only ever interprets its own variant; handing a buffer
/// to the other strategy is a caller error and panics there.
#[derive(Debug)]
pub(crate) enum Backing {
    /// Individually acquired pages in ascending logical order.
    PageList(Vec<PhysicalPage>),
    /// One physically-contiguous block.
    Contiguous(ContiguousBlock),
}

/// A buffer produced by a heap strategy.
///
/// Owns its backing memory representation and, while device-mapped, the
/// scatter-gather view of it. The buffer is freed by value through the heap
/// that allocated it, so use-after-free and double-free do not compile.
#[derive(Debug)]
pub struct Buffer {
    size: usize,
    flags: BufferFlags,
    backing: Backing,
    device_view: Option<SgTable>,
}

impl Buffer {
    pub(crate) fn new(size: usize, flags: BufferFlags, backing: Backing) -> Self {
        Self {
            size,
            flags,
            backing,
            device_view: None,
        }
    }

    /// Requested byte length, immutable for the buffer's lifetime.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Allocation request flags, recorded verbatim.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Number of pages touched when mapping this buffer.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        page_span(self.size)
    }

    /// The live device view, if one exists.
    #[inline]
    #[must_use]
    pub fn device_view(&self) -> Option<&SgTable> {
        self.device_view.as_ref()
    }

    pub(crate) const fn backing(&self) -> &Backing {
        &self.backing
    }

    pub(crate) fn into_backing(self) -> Backing {
        self.backing
    }

    /// Return the live device view, building and caching one if absent.
    pub(crate) fn build_device_view<E>(
        &mut self,
        build: impl FnOnce(&Backing) -> Result<SgTable, E>,
    ) -> Result<&SgTable, E> {
        match &mut self.device_view {
            Some(view) => Ok(view),
            slot => {
                let view = build(&self.backing)?;
                Ok(slot.insert(view))
            }
        }
    }

    pub(crate) fn take_device_view(&mut self) -> Option<SgTable> {
        self.device_view.take()
    }
}
