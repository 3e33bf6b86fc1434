//! Memory allocation primitives for ndmat array storage.
//!
//! Every dense array buffer is produced by an [`Allocator`] and must be
//! returned to the same allocator when its last owner goes away. This crate
//! defines that contract together with the two allocators the array core
//! ships with:
//!
//! - [`SystemAllocator`] - the global Rust allocator with statistics
//! - [`BudgetAllocator`] - a byte-budgeted wrapper that fails with
//!   [`AllocError::BudgetExhausted`] once the budget is spent
//!
//! # Design Goals
//!
//! - Explicit control over alignment (SIMD-friendly by default)
//! - Allocation failure is a value, never an abort
//! - Statistics are lock-free so allocators can be shared across threads

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod budget;

pub use budget::BudgetAllocator;

use std::alloc::{Layout, LayoutError};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alignment requirements for array buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alignment {
    /// Default alignment (8 bytes on 64-bit systems).
    Default,
    /// SIMD 128-bit alignment (16 bytes).
    Simd128,
    /// SIMD 256-bit alignment (32 bytes, AVX).
    Simd256,
    /// Cache line alignment (64 bytes).
    CacheLine,
    /// Page alignment (4096 bytes).
    Page,
}

impl Alignment {
    /// Get the alignment value in bytes.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        match self {
            Self::Default => 8,
            Self::Simd128 => 16,
            Self::Simd256 => 32,
            Self::CacheLine => 64,
            Self::Page => 4096,
        }
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::Simd128
    }
}

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur during allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The underlying allocator returned no memory.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Requested allocation size.
        requested: usize,
    },

    /// Invalid layout (size overflow or bad alignment).
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A budgeted allocator has no room left for the request.
    #[error("allocation budget exhausted: requested {requested} bytes, {remaining} bytes remaining")]
    BudgetExhausted {
        /// Requested allocation size.
        requested: usize,
        /// Bytes left in the budget.
        remaining: usize,
    },

    /// Alignment requirement not supported.
    #[error("alignment error: requested {requested}, max supported {supported}")]
    AlignmentError {
        /// Requested alignment.
        requested: usize,
        /// Maximum supported alignment.
        supported: usize,
    },
}

impl From<LayoutError> for AllocError {
    fn from(e: LayoutError) -> Self {
        Self::InvalidLayout(e.to_string())
    }
}

/// Largest alignment any allocator in this crate will honour.
pub const MAX_ALIGNMENT: usize = 4096;

/// Trait for array buffer allocators.
///
/// Implementations must be shareable: a buffer may be released on a
/// different thread from the one that allocated it.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Allocate a block of memory with the given layout.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The returned pointer is released with `deallocate` on this allocator
    /// - The memory is not accessed after deallocation
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>>;

    /// Deallocate a previously allocated block.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `ptr` was allocated by this allocator with the same `layout`
    /// - `ptr` has not been deallocated before
    /// - No references to the memory exist after this call
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Allocate zeroed memory.
    ///
    /// # Safety
    ///
    /// Same requirements as `allocate`.
    unsafe fn allocate_zeroed(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        let ptr = unsafe { self.allocate(layout)? };
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size());
        }
        Ok(ptr)
    }

    /// Statistics for this allocator, if it keeps any.
    fn stats(&self) -> Option<&AllocStats> {
        None
    }
}

/// A raw memory block together with the layout it was allocated with.
#[derive(Debug)]
pub struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// Create a new raw block (for use by allocator clients).
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` points to validly allocated memory
    /// with the given layout.
    #[must_use]
    pub const unsafe fn new(ptr: NonNull<u8>, layout: Layout) -> Self {
        Self { ptr, layout }
    }

    /// Get the pointer to the block's data.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Get the non-null pointer to the block's data.
    #[inline]
    #[must_use]
    pub const fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Get the layout of this block.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the size of this block in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    /// Get the alignment of this block.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }
}

/// Lock-free allocation statistics.
#[derive(Debug, Default)]
pub struct AllocStats {
    bytes_allocated: AtomicUsize,
    peak_bytes: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
    failed_allocations: AtomicUsize,
}

impl AllocStats {
    /// Create new empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes_allocated: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            deallocation_count: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
        }
    }

    /// Record an allocation.
    pub fn record_alloc(&self, size: usize) {
        let new_total = self.bytes_allocated.fetch_add(size, Ordering::SeqCst) + size;
        self.peak_bytes.fetch_max(new_total, Ordering::SeqCst);
        self.allocation_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a deallocation.
    pub fn record_dealloc(&self, size: usize) {
        self.bytes_allocated.fetch_sub(size, Ordering::SeqCst);
        self.deallocation_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed allocation.
    pub fn record_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::SeqCst);
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn current_bytes(&self) -> usize {
        self.bytes_allocated.load(Ordering::SeqCst)
    }

    /// Peak bytes allocated.
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::SeqCst)
    }

    /// Number of successful allocations.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::SeqCst)
    }

    /// Number of deallocations.
    #[must_use]
    pub fn deallocation_count(&self) -> usize {
        self.deallocation_count.load(Ordering::SeqCst)
    }

    /// Number of failed allocations.
    #[must_use]
    pub fn failed_allocations(&self) -> usize {
        self.failed_allocations.load(Ordering::SeqCst)
    }

    /// Allocations that have not been returned yet.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.allocation_count()
            .saturating_sub(self.deallocation_count())
    }
}

/// Utility function to check if a pointer is aligned.
#[inline]
#[must_use]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    (ptr as usize) & (align - 1) == 0
}

/// Build a layout for `size` bytes at `align`, rejecting unsupported alignments.
pub fn layout_for(size: usize, align: usize) -> AllocResult<Layout> {
    if align > MAX_ALIGNMENT {
        return Err(AllocError::AlignmentError {
            requested: align,
            supported: MAX_ALIGNMENT,
        });
    }
    Ok(Layout::from_size_align(size, align)?)
}

// ============================================================================
// System Allocator
// ============================================================================

/// An allocator backed by the global Rust allocator.
///
/// # Example
///
/// ```
/// use ndmat_alloc::{Allocator, SystemAllocator};
/// use std::alloc::Layout;
///
/// let alloc = SystemAllocator::new();
/// unsafe {
///     let layout = Layout::from_size_align(1024, 64).unwrap();
///     let ptr = alloc.allocate(layout).unwrap();
///     alloc.deallocate(ptr, layout);
/// }
/// assert_eq!(alloc.stats().unwrap().live_allocations(), 0);
/// ```
#[derive(Debug, Default)]
pub struct SystemAllocator {
    stats: AllocStats,
}

impl SystemAllocator {
    /// Create a new system allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stats: AllocStats::new(),
        }
    }
}

impl Allocator for SystemAllocator {
    fn name(&self) -> &'static str {
        "system"
    }

    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }

        let ptr = unsafe { std::alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => {
                self.stats.record_alloc(layout.size());
                Ok(ptr)
            }
            None => {
                self.stats.record_failure();
                Err(AllocError::OutOfMemory {
                    requested: layout.size(),
                })
            }
        }
    }

    unsafe fn allocate_zeroed(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }

        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => {
                self.stats.record_alloc(layout.size());
                Ok(ptr)
            }
            None => {
                self.stats.record_failure();
                Err(AllocError::OutOfMemory {
                    requested: layout.size(),
                })
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        self.stats.record_dealloc(layout.size());
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn stats(&self) -> Option<&AllocStats> {
        Some(&self.stats)
    }
}

/// A well-aligned dangling pointer for zero-sized layouts.
fn dangling_for(layout: Layout) -> NonNull<u8> {
    // align is a non-zero power of two, so this is never null
    NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
}

/// The process-wide system allocator shared by arrays that do not name one.
#[must_use]
pub fn system() -> Arc<dyn Allocator> {
    static SYSTEM: OnceLock<Arc<SystemAllocator>> = OnceLock::new();
    SYSTEM
        .get_or_init(|| Arc::new(SystemAllocator::new()))
        .clone()
}
