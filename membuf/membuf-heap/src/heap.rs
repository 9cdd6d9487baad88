//! The common operation contract both heap strategies implement.

use core::fmt;

use membuf_addresses::{KernelAddress, PhysicalAddress};

use crate::ProcessRange;
use crate::buffer::{Buffer, BufferFlags};
use crate::error::HeapError;
use crate::sg::SgTable;

/// Which allocation strategy a heap implements.
///
/// Introspection only. Callers polymorphic over [`Heap`] never branch on
/// this; it exists for the registry layer that picks a heap per request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Individually acquired pages, possibly discontiguous.
    PageList,
    /// One physically-contiguous block.
    Contiguous,
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PageList => "page-list",
            Self::Contiguous => "contiguous",
        })
    }
}

/// Construction-time heap options.
///
/// Currently carries a diagnostic name only; there are no recognized
/// behavioral options.
#[derive(Debug, Clone, Default)]
pub struct HeapConfig {
    name: Option<&'static str>,
}

impl HeapConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self { name: None }
    }

    /// Use `name` in logs instead of the strategy's default name.
    #[must_use]
    pub const fn named(name: &'static str) -> Self {
        Self { name: Some(name) }
    }

    pub(crate) fn name_or(&self, default: &'static str) -> &'static str {
        self.name.unwrap_or(default)
    }
}

/// Operation contract shared by every heap strategy.
///
/// A heap is a factory and lifecycle manager for [`Buffer`]s. It performs no
/// internal locking: operations on different buffers are independent, while
/// operations on one buffer must be serialized by the caller. A buffer must
/// only ever be passed back to the strategy kind that allocated it;
/// implementations panic on a buffer backed by the other strategy.
pub trait Heap: Send + Sync {
    /// The strategy this heap implements.
    fn kind(&self) -> HeapKind;

    /// Diagnostic name used in logs.
    fn name(&self) -> &'static str;

    /// Acquire backing memory for a buffer of `size` bytes.
    ///
    /// `align` and `flags` are recorded but do not influence placement.
    /// Acquisition is atomic: on failure nothing stays allocated and no
    /// partial buffer is returned.
    ///
    /// # Errors
    /// `InvalidArgument` for `size == 0`; `OutOfMemory` when the backing
    /// cannot be acquired.
    fn allocate(
        &self,
        size: usize,
        align: usize,
        flags: BufferFlags,
    ) -> Result<Buffer, HeapError>;

    /// Release a buffer's backing memory.
    ///
    /// Consumes the buffer; a still-live device view is dropped with it.
    fn free(&self, buffer: Buffer);

    /// Build the device-visible scatter-gather view, or return the one
    /// already built.
    ///
    /// The view is cached on the buffer until [`Heap::unmap_from_device`];
    /// at most one view is ever live per buffer.
    ///
    /// # Errors
    /// `OutOfMemory` when the entry table cannot be allocated. A failed
    /// build leaves the buffer without a view.
    fn map_to_device<'b>(&self, buffer: &'b mut Buffer) -> Result<&'b SgTable, HeapError>;

    /// Drop the buffer's device view. A buffer without a live view is left
    /// untouched.
    fn unmap_from_device(&self, buffer: &mut Buffer);

    /// Map the whole buffer into one contiguous kernel-virtual range with
    /// cacheable read/write protection, returning the range base.
    ///
    /// # Errors
    /// `OutOfMemory` when the kernel window cannot take the range.
    fn map_to_kernel(&self, buffer: &Buffer) -> Result<KernelAddress, HeapError>;

    /// Release a kernel-virtual mapping established by
    /// [`Heap::map_to_kernel`].
    fn unmap_from_kernel(&self, buffer: &Buffer, base: KernelAddress);

    /// Map the buffer into a process's reserved destination range.
    ///
    /// The page-list strategy inserts page by page and, on a mid-loop
    /// failure, returns immediately with the pages inserted so far still
    /// mapped; the range is then in an indeterminate state and its owner
    /// must tear it down. The contiguous strategy remaps in one step and has
    /// no partial outcome.
    ///
    /// # Errors
    /// `InvalidArgument` when the range is longer than the buffer's page
    /// span; otherwise the converted primitive failure.
    fn map_to_process(
        &self,
        buffer: &Buffer,
        range: &mut dyn ProcessRange,
    ) -> Result<(), HeapError>;

    /// Base physical address and byte length of a physically-contiguous
    /// buffer.
    ///
    /// Only strategies whose backing is a single block can answer.
    ///
    /// # Errors
    /// `Unsupported` unless the strategy overrides this.
    fn physical_address(&self, buffer: &Buffer) -> Result<(PhysicalAddress, usize), HeapError> {
        let _ = buffer;
        Err(HeapError::Unsupported)
    }
}
