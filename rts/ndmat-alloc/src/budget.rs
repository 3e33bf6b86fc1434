//! Byte-budgeted allocator.
//!
//! Wraps the system allocator and refuses any request that would push the
//! live byte count past a fixed budget. Arrays use it to cap memory for a
//! pipeline stage, and tests use it to force allocation failure on demand.

use crate::{AllocError, AllocResult, AllocStats, Allocator, SystemAllocator};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An allocator that fails once `budget` live bytes are in use.
#[derive(Debug)]
pub struct BudgetAllocator {
    inner: SystemAllocator,
    budget: usize,
    in_use: AtomicUsize,
}

impl BudgetAllocator {
    /// Create an allocator that will hand out at most `budget` live bytes.
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self {
            inner: SystemAllocator::new(),
            budget,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Total budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.budget
            .saturating_sub(self.in_use.load(Ordering::Acquire))
    }

    fn reserve(&self, size: usize) -> AllocResult<()> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let remaining = self.budget.saturating_sub(current);
            if size > remaining {
                tracing::debug!(requested = size, remaining, "allocation budget exhausted");
                return Err(AllocError::BudgetExhausted {
                    requested: size,
                    remaining,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + size,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn unreserve(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }
}

impl Allocator for BudgetAllocator {
    fn name(&self) -> &'static str {
        "budget"
    }

    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        self.reserve(layout.size())?;
        match unsafe { self.inner.allocate(layout) } {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                self.unreserve(layout.size());
                Err(e)
            }
        }
    }

    unsafe fn allocate_zeroed(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        self.reserve(layout.size())?;
        match unsafe { self.inner.allocate_zeroed(layout) } {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                self.unreserve(layout.size());
                Err(e)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.deallocate(ptr, layout) };
        self.unreserve(layout.size());
    }

    fn stats(&self) -> Option<&AllocStats> {
        self.inner.stats()
    }
}
