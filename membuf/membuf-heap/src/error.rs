//! Errors for heap operations and the address-space primitives they drive.

use thiserror::Error;

/// Failure of an address-space insertion or remap primitive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// The target address space has no room left for the mapping.
    #[error("address space exhausted")]
    Exhausted,
    /// The target slot already holds a conflicting mapping.
    #[error("conflicting mapping")]
    Conflict,
    /// The mapping would fall outside the reserved range.
    #[error("outside the reserved range")]
    OutOfRange,
}

/// Failure of a heap operation.
///
/// Every error is returned to the immediate caller; none is fatal to the
/// host, and `OutOfMemory` in particular is expected to be recoverable.
#[derive(Debug, Error)]
pub enum HeapError {
    /// Acquisition of a page, block, table, or address range failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The request itself is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// An address-space primitive failed for a non-exhaustion reason.
    #[error("mapping failed: {0}")]
    Mapping(MapError),
    /// The operation is not provided by this heap strategy.
    #[error("operation not supported by this heap")]
    Unsupported,
}

impl From<MapError> for HeapError {
    fn from(value: MapError) -> Self {
        match value {
            // exhaustion surfaces as OutOfMemory, like any failed acquisition
            MapError::Exhausted => Self::OutOfMemory,
            e => Self::Mapping(e),
        }
    }
}
