//! Statically typed view over a [`DenseArray`].
//!
//! `TypedArray<T>` checks the element type once, when it is built, and then
//! offers accessors that cannot be called with the wrong `T`. It carries no
//! state of its own beyond the wrapped array.

use std::marker::PhantomData;
use std::ops::{Deref, Range};

use crate::dense::{DenseArray, Elements};
use crate::error::{ArrayError, Result};
use crate::tag::Element;

/// A dense array whose element type is `T`.
#[derive(Debug, Clone)]
pub struct TypedArray<T: Element> {
    inner: DenseArray,
    _marker: PhantomData<T>,
}

impl<T: Element> TypedArray<T> {
    /// Zero-filled array of extents `sizes`.
    pub fn zeros(sizes: &[usize]) -> Result<Self> {
        Ok(Self::wrap(DenseArray::zeros(sizes, T::array_type())?))
    }

    /// Copy `data` (row-major) into a new array.
    pub fn from_slice(sizes: &[usize], data: &[T]) -> Result<Self> {
        Ok(Self::wrap(DenseArray::from_slice(sizes, data)?))
    }

    /// Attach a type to `array`, failing if its element type is not `T`.
    ///
    /// An empty array is accepted and given the type on first growth.
    pub fn try_from_dense(array: DenseArray) -> Result<Self> {
        if array.dims() > 0 && array.array_type() != T::array_type() {
            return Err(ArrayError::TypeMismatch {
                requested: T::array_type(),
                actual: array.array_type(),
            });
        }
        Ok(Self::wrap(array))
    }

    fn wrap(inner: DenseArray) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The untyped array.
    #[must_use]
    pub fn as_dense(&self) -> &DenseArray {
        &self.inner
    }

    /// Give back the untyped array.
    #[must_use]
    pub fn into_dense(self) -> DenseArray {
        self.inner
    }

    /// Read element `idx`.
    pub fn get(&self, idx: &[usize]) -> Result<T> {
        self.inner.at(idx)
    }

    /// Write element `idx`.
    pub fn set(&mut self, idx: &[usize], value: T) -> Result<()> {
        self.inner.set(idx, value)
    }

    /// Mutable reference to element `idx`. Needs sole ownership of the
    /// storage, see [`DenseArray::at_mut`].
    pub fn get_mut(&mut self, idx: &[usize]) -> Result<&mut T> {
        self.inner.at_mut(idx)
    }

    /// Elements of row `i` of a 2-D array as a slice.
    ///
    /// # Safety
    ///
    /// No other header over the same buffer may write the row while the
    /// slice is alive.
    pub unsafe fn row_slice(&self, i: usize) -> Result<&[T]> {
        let row = self.inner.row(i)?;
        if !row.is_continuous() {
            return Err(ArrayError::NotContinuous("row elements are strided"));
        }
        let p = row.data().cast::<T>();
        if row.total() > 0 && p.align_offset(std::mem::align_of::<T>()) != 0 {
            return Err(ArrayError::Unsupported("element is not aligned for typed access"));
        }
        // SAFETY: the row is gap-free and lives in storage this array keeps
        // alive for at least as long as `&self`; the caller rules out writers.
        Ok(unsafe { std::slice::from_raw_parts(p, row.total()) })
    }

    /// All elements as one slice. Requires a continuous array.
    ///
    /// # Safety
    ///
    /// As for [`DenseArray::as_slice`].
    pub unsafe fn as_slice(&self) -> Result<&[T]> {
        // SAFETY: forwarded contract.
        unsafe { self.inner.as_slice() }
    }

    /// Row-major iterator over copies of the elements.
    pub fn iter(&self) -> Result<Elements<'_, T>> {
        self.inner.iter()
    }

    /// All elements as one mutable slice. Requires a continuous array.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.inner.as_mut_slice()
    }

    /// Copy out in row-major order.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.inner.to_vec()
    }

    /// Typed view of a sub-block.
    pub fn region(&self, ranges: &[Range<usize>]) -> Result<Self> {
        Ok(Self::wrap(self.inner.region(ranges)?))
    }

    /// Typed view of row `i`.
    pub fn row(&self, i: usize) -> Result<Self> {
        Ok(Self::wrap(self.inner.row(i)?))
    }

    /// Typed view of column `i`.
    pub fn col(&self, i: usize) -> Result<Self> {
        Ok(Self::wrap(self.inner.col(i)?))
    }

    /// Independent copy.
    pub fn deep_clone(&self) -> Result<Self> {
        Ok(Self::wrap(self.inner.deep_clone()?))
    }

    /// Append one element to an n x 1 array.
    pub fn push_back(&mut self, value: T) -> Result<()> {
        self.inner.push_back(value)
    }

    /// Remove the last `n` rows.
    pub fn pop_back(&mut self, n: usize) -> Result<()> {
        self.inner.pop_back(n)
    }

    /// Visit every element in row-major order.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) -> Result<()> {
        let mut values = self.inner.to_vec::<T>()?;
        values.iter_mut().for_each(&mut f);
        let src = DenseArray::from_slice(self.inner.size(), &values)?;
        src.copy_bytes_into(&mut self.inner);
        Ok(())
    }
}

impl<T: Element> Deref for TypedArray<T> {
    type Target = DenseArray;

    fn deref(&self) -> &DenseArray {
        &self.inner
    }
}

impl<T: Element> TryFrom<DenseArray> for TypedArray<T> {
    type Error = ArrayError;

    fn try_from(array: DenseArray) -> Result<Self> {
        Self::try_from_dense(array)
    }
}
