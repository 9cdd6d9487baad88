//! # Reference Environment for the Buffer Heaps
//!
//! Concrete implementations of the capability traits the heap strategies
//! are injected with: a bitmap page pool, a region block pool, a linear
//! kernel mapping window, and a recording process range.
//!
//! Everything here is bookkeeping over frame numbers; no real memory is
//! touched. The same pieces therefore serve as a starting point for wiring
//! the heaps into a kernel and as instrumentation when testing them.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod block_pool;
mod page_pool;
mod space;

pub use crate::block_pool::RegionBlockPool;
pub use crate::page_pool::BitmapPagePool;
pub use crate::space::{LinearKernelSpace, ReservedRange};
