//! # Addressing Domains for Buffer Memory
//!
//! Strongly typed wrappers for the three address spaces a shared buffer can be
//! visible in, plus page-granularity arithmetic used by the heap strategies.
//!
//! ## Overview
//!
//! A buffer travels through up to three distinct address spaces during its
//! lifetime, and mixing them up is the classic bug in this kind of code. Each
//! space gets its own zero-cost wrapper around `u64`:
//!
//! | Type | Space | Produced by |
//! |-------|--------|-------------|
//! | [`PhysicalAddress`] | Physical RAM | page/block acquisition |
//! | [`KernelAddress`] | Kernel-virtual | kernel mapping of a buffer |
//! | [`ProcessAddress`] | Process-virtual | a process's reserved range |
//!
//! [`PhysicalPage`] is the page-aligned unit the heap strategies hand around:
//! a physical base whose low [`PAGE_SHIFT`] bits are zero. Buffers are sized
//! in bytes but backed in whole pages; [`page_span`] does the rounding.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use membuf_addresses::*;
//! let page = PhysicalPage::containing(PhysicalAddress::new(0x0000_0010_2000_0042));
//! assert_eq!(page.base().as_u64() & (PAGE_SIZE as u64 - 1), 0);
//! assert_eq!(page.add_pages(2).frame_number(), page.frame_number() + 2);
//!
//! // 8 KiB + 1 byte needs three backing pages
//! assert_eq!(page_span(2 * PAGE_SIZE + 1), 3);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`,
//!   and `Hash`, making them suitable as map keys or for FFI use.
//! - There is exactly one page granularity here. Buffer sharing deals in base
//!   pages; huge-page backing would be a property of a pool, not of the
//!   address types.

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// log2 of the page size, i.e. the number of low offset bits.
pub const PAGE_SHIFT: u32 = 12;

/// Base page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of whole pages needed to cover `len` bytes.
///
/// `page_span(0)` is zero; a zero-length buffer covers nothing.
#[inline]
#[must_use]
pub const fn page_span(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Physical memory address.
///
/// Refers to RAM (or device-visible memory) before any translation. Only
/// pools and mapping layers produce these; buffer consumers mostly see the
/// page-aligned [`PhysicalPage`] form.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page containing this address (low bits zeroed).
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    /// The offset of this address within its page (`0..PAGE_SIZE`).
    #[inline]
    #[must_use]
    pub const fn offset_in_page(self) -> u64 {
        self.0 & (PAGE_SIZE as u64 - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.offset_in_page() == 0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(a: PhysicalAddress) -> Self {
        a.as_u64()
    }
}

/// Kernel-virtual address.
///
/// Where a buffer appears after being mapped for in-kernel access. Carries
/// intent only; nothing here validates that the value lies inside a kernel
/// window.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KernelAddress(u64);

impl KernelAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for KernelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KA(0x{:016X})", self.0)
    }
}

impl fmt::Display for KernelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for KernelAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for KernelAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for KernelAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

/// Process-virtual address.
///
/// Where a buffer appears inside a process's reserved range. Distinct from
/// [`KernelAddress`] so a page-insertion loop cannot silently walk a kernel
/// pointer through user space.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessAddress(u64);

impl ProcessAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE as u64 - 1) == 0
    }
}

impl fmt::Debug for ProcessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA(0x{:016X})", self.0)
    }
}

impl fmt::Display for ProcessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for ProcessAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for ProcessAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<u64> for ProcessAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

/// Page-aligned physical page base.
///
/// The unit of backing memory: the low [`PAGE_SHIFT`] bits are always zero.
/// Pools hand these out, scatter-gather entries reference them, and the
/// contiguous strategy steps through them with [`PhysicalPage::add_pages`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        addr.page()
    }

    /// Wrap an address that must already be page-aligned.
    /// Panics in debug if unaligned (no runtime cost in release).
    #[inline]
    #[must_use]
    pub fn new_aligned(addr: PhysicalAddress) -> Self {
        debug_assert!(addr.is_page_aligned(), "unaligned page address");
        Self(addr.as_u64())
    }

    /// Page with the given frame number (`base >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_frame(frame: u64) -> Self {
        Self(frame << PAGE_SHIFT)
    }

    /// The page base as a full physical address.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// The frame number of this page (`base >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// The page `n` pages above this one.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: usize) -> Self {
        Self(self.0 + (n as u64) * (PAGE_SIZE as u64))
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<PhysicalPage> for PhysicalAddress {
    #[inline]
    fn from(p: PhysicalPage) -> Self {
        p.base()
    }
}
