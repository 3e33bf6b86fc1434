//! Error types for array operations.
//!
//! Two families share one enum. Contract violations report programmer error
//! (wrong element type, bad region, incompatible reshape) and are never worth
//! retrying. Resource exhaustion wraps an [`AllocError`] from the allocator.

use ndmat_alloc::AllocError;
use thiserror::Error;

use crate::tag::ArrayType;

/// Broad classification of an [`ArrayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller broke an API contract.
    Contract,
    /// The allocator could not satisfy a request.
    ResourceExhausted,
}

/// Errors that can occur during array operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    /// Typed access used an element type inconsistent with the array type.
    #[error("type mismatch: array holds {actual}, access requested {requested}")]
    TypeMismatch {
        /// Type implied by the access.
        requested: ArrayType,
        /// Type stored in the header.
        actual: ArrayType,
    },

    /// An element index is outside the array extents.
    #[error("index {index} out of range for dimension {dim} of size {size}")]
    IndexOutOfRange {
        /// Dimension being indexed.
        dim: usize,
        /// Offending index.
        index: usize,
        /// Extent of that dimension.
        size: usize,
    },

    /// A region request does not fit inside the array.
    #[error("region {start}..{end} out of range for dimension {dim} of size {size}")]
    RegionOutOfRange {
        /// Dimension being sliced.
        dim: usize,
        /// Requested start.
        start: usize,
        /// Requested end (exclusive).
        end: usize,
        /// Extent of that dimension.
        size: usize,
    },

    /// Element or byte totals disagree.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected total.
        expected: usize,
        /// Actual total.
        actual: usize,
    },

    /// The operation needs a gap-free buffer.
    #[error("array is not continuous: {0}")]
    NotContinuous(&'static str),

    /// Dimension counts disagree.
    #[error("dimension mismatch: expected {expected} dimensions, got {actual}")]
    DimensionMismatch {
        /// Expected number of dimensions.
        expected: usize,
        /// Actual number of dimensions.
        actual: usize,
    },

    /// A dimension count is outside the supported range.
    #[error("invalid number of dimensions: {dims} (supported 1..={max})")]
    InvalidDims {
        /// Requested dimension count.
        dims: usize,
        /// Largest supported dimension count.
        max: usize,
    },

    /// A channel count is outside the supported range.
    #[error("invalid number of channels: {0}")]
    InvalidChannels(usize),

    /// A mutable borrow of elements needs the only handle to the storage.
    #[error("array storage is shared with other headers")]
    Aliased,

    /// Row growth was requested on a view of a larger allocation.
    #[error("cannot grow a submatrix view; deep-clone it first")]
    SubmatrixGrowth,

    /// A fixed-size destination would have to change shape.
    #[error("destination has a fixed size {actual:?}, requested {requested:?}")]
    FixedSize {
        /// Requested extents.
        requested: Vec<usize>,
        /// Current destination extents.
        actual: Vec<usize>,
    },

    /// A fixed-type destination would have to change type.
    #[error("destination has a fixed type {actual}, requested {requested}")]
    FixedType {
        /// Requested type.
        requested: ArrayType,
        /// Current destination type.
        actual: ArrayType,
    },

    /// The proxy does not hold the kind of array the operation needs.
    #[error("unsupported array kind for this operation: {0}")]
    UnsupportedKind(&'static str),

    /// A valid request this core does not implement.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The allocator failed.
    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),
}

impl ArrayError {
    /// Which family this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Alloc(_) => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Contract,
        }
    }

    /// True for programmer errors.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        self.kind() == ErrorKind::Contract
    }
}

/// Result type for array operations.
pub type Result<T> = std::result::Result<T, ArrayError>;
