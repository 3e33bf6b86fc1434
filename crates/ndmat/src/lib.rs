//! Reference-counted n-dimensional arrays.
//!
//! `ndmat` is the array core shared by image- and signal-processing code:
//! a dense strided array whose storage is shared by every view cut from it,
//! a hash-backed sparse array, and the erased-type argument proxies that
//! algorithms use to accept any of them.
//!
//! # Architecture
//!
//! | Piece | Type | Notes |
//! |-------|------|-------|
//! | Element type | [`ArrayType`], [`TypeTag`] | depth + channels, packed with layout flags |
//! | Storage | [`SharedStorage`] | one allocation, atomically counted |
//! | Dense | [`DenseArray`], [`TypedArray`] | views alias storage; `deep_clone` copies |
//! | Sparse | [`SparseArray`] | chained hash of coordinates, shared handle |
//! | Arguments | [`InputArray`], [`OutputArray`] | borrowed for one call |
//! | Deferred work | [`Stream`] | output valid after `synchronize` |
//!
//! # Sharing
//!
//! Cloning a [`DenseArray`] or taking a region, row, column or diagonal
//! never copies elements; writes through one handle are visible through all
//! of them. Storage is freed when the last handle goes away. Growing an
//! array past its capacity moves it to new storage; other handles keep the
//! old storage and stop seeing its writes. Borrowing elements as `&mut`
//! needs the only handle to the storage; shared slices come from `unsafe`
//! accessors whose callers rule out writes through other handles.
//!
//! ```
//! use ndmat::{ArrayType, DenseArray};
//!
//! let m = DenseArray::zeros(&[4, 4], ArrayType::I32C1)?;
//! let mut block = m.region(&[1..3, 1..3])?;
//! block.set(&[0, 0], 7i32)?;
//! assert_eq!(m.at::<i32>(&[1, 1])?, 7);
//! assert_eq!(m.refcount(), 2);
//! # Ok::<(), ndmat::ArrayError>(())
//! ```
//!
//! # Errors
//!
//! Every fallible call returns [`Result`]. Contract violations (bad
//! indices, type or shape mismatches) and allocation failure are both
//! reported as [`ArrayError`]; [`ArrayError::kind`] tells them apart.

#![warn(missing_docs)]
#![allow(unsafe_code)] // element access goes through raw strided pointers

pub mod collab;
pub mod config;
pub mod dense;
pub mod error;
pub mod header;
pub mod proxy;
pub mod sparse;
pub mod storage;
pub mod tag;
pub mod typed;

pub use collab::{DescriptorMatcher, Feature2DAsync, ObjectDetector, Stream};
pub use config::ArrayConfig;
pub use dense::{DenseArray, Elements, RoiLocation};
pub use error::{ArrayError, ErrorKind, Result};
pub use header::{ArrayHeader, Dims, MAX_DIMS};
pub use proxy::{DestinationConstraints, InputArray, OutputArray, ProxyKind, ShapeRequest};
pub use sparse::SparseArray;
pub use storage::SharedStorage;
pub use tag::{ArrayType, Depth, DepthMask, Element, Scalar, TypeTag};
pub use typed::TypedArray;

pub use ndmat_alloc::{Alignment, AllocError, Allocator, BudgetAllocator, SystemAllocator};
