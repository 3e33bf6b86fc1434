//! Reference-counted buffers behind dense arrays.
//!
//! A [`SharedStorage`] is a handle to one raw block and the allocator that
//! produced it. Cloning the handle adds an owner; the block goes back to its
//! allocator when the last handle is dropped. Headers that alias the block
//! hold a handle each, so the reference count is the number of live aliases.

use std::fmt;
use std::sync::Arc;

use ndmat_alloc::{is_aligned, layout_for, Allocator, RawBlock};

use crate::error::Result;

struct StorageBlock {
    raw: RawBlock,
    allocator: Arc<dyn Allocator>,
}

// SAFETY: the block is plain bytes. Cross-thread access to its contents is
// governed by the arrays that alias it, not by the block itself.
unsafe impl Send for StorageBlock {}
unsafe impl Sync for StorageBlock {}

impl Drop for StorageBlock {
    fn drop(&mut self) {
        tracing::debug!(
            bytes = self.raw.size(),
            allocator = self.allocator.name(),
            "releasing array storage"
        );
        // SAFETY: `raw` came from `allocator` with this exact layout and is
        // released exactly once, here.
        unsafe {
            self.allocator
                .deallocate(self.raw.as_non_null(), self.raw.layout());
        }
    }
}

/// Shared ownership of one zero-initialised buffer.
#[derive(Clone)]
pub struct SharedStorage {
    block: Arc<StorageBlock>,
}

impl SharedStorage {
    /// Allocate `size` zeroed bytes at `align` from `allocator`.
    pub fn allocate(allocator: Arc<dyn Allocator>, size: usize, align: usize) -> Result<Self> {
        let layout = layout_for(size, align)?;
        // SAFETY: the block is handed back to the same allocator in Drop.
        let ptr = unsafe { allocator.allocate_zeroed(layout)? };
        debug_assert!(is_aligned(ptr.as_ptr(), align));
        tracing::debug!(bytes = size, align, allocator = allocator.name(), "allocated array storage");
        // SAFETY: `ptr` was just allocated with `layout`.
        let raw = unsafe { RawBlock::new(ptr, layout) };
        Ok(Self {
            block: Arc::new(StorageBlock { raw, allocator }),
        })
    }

    /// Start of the buffer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.block.raw.as_ptr()
    }

    /// Buffer length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.block.raw.size()
    }

    /// True for a zero-byte buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live handles.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.block)
    }

    /// Whether two handles own the same block.
    #[must_use]
    pub fn ptr_eq(&self, other: &SharedStorage) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    /// The allocator that produced the block.
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.block.allocator
    }
}

impl fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStorage")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .field("refcount", &self.refcount())
            .field("allocator", &self.block.allocator.name())
            .finish()
    }
}
