//! Dense n-dimensional arrays with shared, reference-counted storage.
//!
//! A [`DenseArray`] is a header (extents, byte strides, type tag) plus a
//! handle to the [`SharedStorage`] it reads from. Slicing operations never
//! copy: they return a new header over the same storage with an adjusted
//! data offset and narrowed extents.
//!
//! # Memory Layout
//!
//! ```text
//!  base                      base+offset                  base+end   base+limit
//!   │                            │                            │          │
//!   ▼                            ▼                            ▼          ▼
//!   ┌────────────────────────────┬────────────────────────────┬──────────┐
//!   │ rows outside this view     │ this view's elements ...   │ reserved │
//!   └────────────────────────────┴────────────────────────────┴──────────┘
//! ```
//!
//! `end` and `limit` always describe the owning allocation, so a view can
//! recover its position inside the parent (see [`DenseArray::locate_roi`]).
//!
//! # Growth
//!
//! [`push_back`](DenseArray::push_back), [`resize`](DenseArray::resize) and
//! [`reserve`](DenseArray::reserve) append rows along the outermost
//! dimension. Past capacity they move the array into a fresh allocation.
//! Other headers that aliased the old buffer keep it alive and keep reading
//! it, so they stop observing writes made through the grown array.

use std::marker::PhantomData;
use std::ops::Range;
use std::ptr;
use std::sync::Arc;

use ndmat_alloc::{AllocError, Allocator};

use crate::config::ArrayConfig;
use crate::error::{ArrayError, Result};
use crate::header::{walk_rows, walk_spans, ArrayHeader, Dims, MAX_DIMS};
use crate::proxy::OutputArray;
use crate::storage::SharedStorage;
use crate::tag::{as_bytes, ArrayType, Depth, Element, Scalar, TypeTag};

/// Position of a 2-D view inside the allocation it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiLocation {
    /// Rows and columns of the whole allocation.
    pub whole_size: [usize; 2],
    /// Row and column of the view's first element.
    pub offset: [usize; 2],
}

/// A dense array header over shared storage.
///
/// `Clone` produces another alias of the same storage (the reference count
/// goes up by one); use [`DenseArray::deep_clone`] for an independent copy.
///
/// # Aliasing
///
/// Element reads and writes copy values through raw pointers, so aliases
/// may freely write while others read on the same thread. Borrows into the
/// buffer are handed out only by [`at_mut`](Self::at_mut) and
/// [`as_mut_slice`](Self::as_mut_slice), which require this header to be the
/// sole owner, and by the `unsafe` [`as_slice`](Self::as_slice) and
/// [`byte_spans`](Self::byte_spans).
///
/// A header can be sent to another thread but not shared between threads.
/// Aliases living on different threads must not write the same buffer
/// concurrently with any other access to it; callers order such work, for
/// example through a [`Stream`](crate::Stream).
#[derive(Debug, Clone)]
pub struct DenseArray {
    hdr: ArrayHeader,
    base: *mut u8,
    offset: usize,
    end: usize,
    limit: usize,
    storage: Option<SharedStorage>,
    allocator: Arc<dyn Allocator>,
    align: usize,
    min_reserve: usize,
}

// SAFETY: `base` points into `storage`, which is kept alive by this header,
// or into caller memory that `from_raw_parts` requires to outlive it.
// Cross-thread access to a shared buffer follows the contract above.
unsafe impl Send for DenseArray {}

impl Default for DenseArray {
    fn default() -> Self {
        Self::new()
    }
}

impl DenseArray {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// An empty array bound to the process-wide system allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ndmat_alloc::system(), &ArrayConfig::default())
    }

    /// An empty array that will allocate from `allocator`.
    #[must_use]
    pub fn with_config(allocator: Arc<dyn Allocator>, config: &ArrayConfig) -> Self {
        Self {
            hdr: ArrayHeader::empty(),
            base: ptr::null_mut(),
            offset: 0,
            end: 0,
            limit: 0,
            storage: None,
            allocator,
            align: config.alignment.as_usize(),
            min_reserve: config.min_reserve_bytes,
        }
    }

    /// A zero-filled array.
    pub fn zeros(sizes: &[usize], ty: ArrayType) -> Result<Self> {
        let mut arr = Self::new();
        arr.create(sizes, ty)?;
        Ok(arr)
    }

    /// A zero-filled array allocated from `allocator`.
    pub fn create_in(allocator: Arc<dyn Allocator>, sizes: &[usize], ty: ArrayType) -> Result<Self> {
        let mut arr = Self::with_config(allocator, &ArrayConfig::default());
        arr.create(sizes, ty)?;
        Ok(arr)
    }

    /// An array with every element set to `value`.
    pub fn filled(sizes: &[usize], ty: ArrayType, value: Scalar) -> Result<Self> {
        let mut arr = Self::zeros(sizes, ty)?;
        arr.set_to(value)?;
        Ok(arr)
    }

    /// Copy `data` (row-major) into a new array of extents `sizes`.
    pub fn from_slice<T: Element>(sizes: &[usize], data: &[T]) -> Result<Self> {
        let total: usize = sizes.iter().product();
        if total != data.len() {
            return Err(ArrayError::ShapeMismatch {
                expected: total,
                actual: data.len(),
            });
        }
        let mut arr = Self::zeros(sizes, T::array_type())?;
        let bytes = as_bytes(data);
        if !bytes.is_empty() {
            // SAFETY: the new array is continuous and exactly `bytes.len()` long.
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), arr.data_mut(), bytes.len()) };
        }
        Ok(arr)
    }

    /// Wrap caller-owned memory without taking ownership.
    ///
    /// `steps` defaults to gap-free strides. The returned array has no
    /// reference count and never frees `data`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads and writes over the whole extent
    /// described by `sizes` and `steps`, and must outlive the returned array
    /// and every view derived from it.
    pub unsafe fn from_raw_parts(
        data: *mut u8,
        sizes: &[usize],
        steps: Option<&[usize]>,
        ty: ArrayType,
    ) -> Result<Self> {
        let hdr = match steps {
            Some(steps) => ArrayHeader::with_steps(sizes, steps, ty)?,
            None => ArrayHeader::new(sizes, ty)?,
        };
        let end = hdr.byte_extent();
        let limit = hdr.size()[0] * hdr.step()[0];
        let mut arr = Self::new();
        arr.hdr = hdr;
        arr.base = data;
        arr.end = end;
        arr.limit = limit.max(end);
        Ok(arr)
    }

    /// Allocate storage for `sizes` and `ty`.
    ///
    /// A no-op when the array already has these extents and this type, so
    /// writes land in the existing buffer. Otherwise the new buffer is
    /// allocated before the old one is let go; on failure the array is left
    /// exactly as it was.
    pub fn create(&mut self, sizes: &[usize], ty: ArrayType) -> Result<()> {
        if self.dims() > 0 && self.array_type() == ty && self.size() == sizes {
            return Ok(());
        }
        let hdr = ArrayHeader::new(sizes, ty)?;
        let bytes = byte_len(sizes, ty.elem_size())?;
        let storage = if bytes > 0 {
            Some(SharedStorage::allocate(
                self.allocator.clone(),
                bytes,
                self.align,
            )?)
        } else {
            None
        };

        self.base = storage.as_ref().map_or(ptr::null_mut(), SharedStorage::as_ptr);
        self.hdr = hdr;
        self.offset = 0;
        self.end = bytes;
        self.limit = bytes;
        self.storage = storage;
        Ok(())
    }

    /// Independent copy with its own storage.
    pub fn deep_clone(&self) -> Result<Self> {
        let mut out = self.empty_like();
        if self.dims() > 0 {
            out.create(self.size(), self.array_type())?;
            self.copy_bytes_into(&mut out);
        }
        Ok(out)
    }

    /// Drop this header's claim on its storage and reset it to empty.
    pub fn release(&mut self) {
        self.storage = None;
        self.hdr = ArrayHeader::empty();
        self.base = ptr::null_mut();
        self.offset = 0;
        self.end = 0;
        self.limit = 0;
    }

    fn empty_like(&self) -> Self {
        Self {
            hdr: ArrayHeader::empty(),
            base: ptr::null_mut(),
            offset: 0,
            end: 0,
            limit: 0,
            storage: None,
            allocator: self.allocator.clone(),
            align: self.align,
            min_reserve: self.min_reserve,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The header.
    #[must_use]
    pub fn header(&self) -> &ArrayHeader {
        &self.hdr
    }

    /// Packed type tag.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.hdr.tag()
    }

    /// Number of dimensions; zero for an empty array.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> usize {
        self.hdr.dims()
    }

    /// Extents.
    #[inline]
    #[must_use]
    pub fn size(&self) -> &[usize] {
        self.hdr.size()
    }

    /// Byte strides.
    #[inline]
    #[must_use]
    pub fn step(&self) -> &[usize] {
        self.hdr.step()
    }

    /// Stride of dimension `i` in channel values rather than bytes.
    #[must_use]
    pub fn step1(&self, i: usize) -> usize {
        self.step()[i] / self.elem_size1()
    }

    /// Total element count.
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.hdr.total()
    }

    /// Element type.
    #[inline]
    #[must_use]
    pub fn array_type(&self) -> ArrayType {
        self.hdr.array_type()
    }

    /// Channel depth.
    #[must_use]
    pub fn depth(&self) -> Depth {
        self.array_type().depth()
    }

    /// Channels per element.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.array_type().channels()
    }

    /// Bytes per element.
    #[must_use]
    pub fn elem_size(&self) -> usize {
        self.array_type().elem_size()
    }

    /// Bytes per channel value.
    #[must_use]
    pub fn elem_size1(&self) -> usize {
        self.array_type().elem_size1()
    }

    /// True when there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Whether elements are laid out without gaps.
    #[inline]
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.hdr.tag().is_continuous()
    }

    /// Whether this header is a restricted view of a larger allocation.
    #[inline]
    #[must_use]
    pub fn is_submatrix(&self) -> bool {
        self.hdr.tag().is_submatrix()
    }

    /// Number of headers sharing this storage; zero when there is none.
    #[must_use]
    pub fn refcount(&self) -> usize {
        self.storage.as_ref().map_or(0, SharedStorage::refcount)
    }

    /// Whether both headers read the same buffer.
    #[must_use]
    pub fn shares_storage_with(&self, other: &DenseArray) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => !self.base.is_null() && self.base == other.base,
            _ => false,
        }
    }

    /// The storage handle, if the array owns one.
    #[must_use]
    pub fn storage(&self) -> Option<&SharedStorage> {
        self.storage.as_ref()
    }

    /// The allocator new buffers come from.
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    /// Rows that fit between the first element and the end of the allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self.step().first() {
            Some(&step0) if step0 > 0 => self.limit.saturating_sub(self.offset) / step0,
            _ => 0,
        }
    }

    /// Number of `channels`-wide vectors the array holds, if it can be read
    /// as a flat list of them.
    ///
    /// Accepts a single row or column of `channels`-channel elements, an
    /// n x `channels` single-channel matrix, or the 3-D equivalent.
    #[must_use]
    pub fn check_vector(
        &self,
        channels: usize,
        depth: Option<Depth>,
        require_continuous: bool,
    ) -> Option<usize> {
        if self.is_empty() || channels == 0 {
            return None;
        }
        if depth.is_some_and(|d| d != self.depth()) {
            return None;
        }
        if require_continuous && !self.is_continuous() {
            return None;
        }
        let cn = self.channels();
        let size = self.size();
        let fits = match size {
            [rows, cols] => {
                ((*rows == 1 || *cols == 1) && cn == channels) || (*cols == channels && cn == 1)
            }
            [d0, d1, d2] => {
                cn == 1
                    && *d2 == channels
                    && (*d0 == 1 || *d1 == 1)
                    && (self.is_continuous() || self.step()[1] == self.step()[2] * d2)
            }
            _ => false,
        };
        fits.then(|| self.total() * cn / channels)
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    /// Address of the first element.
    #[inline]
    #[must_use]
    pub fn data(&self) -> *const u8 {
        self.base.wrapping_add(self.offset)
    }

    /// Mutable address of the first element.
    #[inline]
    pub fn data_mut(&mut self) -> *mut u8 {
        self.base.wrapping_add(self.offset)
    }

    /// Address of element `idx`.
    pub fn ptr(&self, idx: &[usize]) -> Result<*const u8> {
        let off = self.hdr.offset_of(idx)?;
        Ok(self.data().wrapping_add(off))
    }

    /// Mutable address of element `idx`.
    pub fn ptr_mut(&mut self, idx: &[usize]) -> Result<*mut u8> {
        let off = self.hdr.offset_of(idx)?;
        Ok(self.data_mut().wrapping_add(off))
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        let requested = T::array_type();
        if requested != self.array_type() {
            return Err(ArrayError::TypeMismatch {
                requested,
                actual: self.array_type(),
            });
        }
        Ok(())
    }

    /// Read element `idx`.
    pub fn at<T: Element>(&self, idx: &[usize]) -> Result<T> {
        self.check_type::<T>()?;
        let p = self.ptr(idx)?;
        // SAFETY: `p` addresses a whole element of type `T` inside the array.
        Ok(unsafe { p.cast::<T>().read_unaligned() })
    }

    /// Write element `idx`.
    pub fn set<T: Element>(&mut self, idx: &[usize], value: T) -> Result<()> {
        self.check_type::<T>()?;
        let p = self.ptr_mut(idx)?;
        // SAFETY: as in `at`.
        unsafe { p.cast::<T>().write_unaligned(value) };
        Ok(())
    }

    /// Whether no other header can reach this array's elements.
    ///
    /// Arrays over caller memory never qualify.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        match &self.storage {
            Some(storage) => storage.refcount() == 1,
            None => self.base.is_null(),
        }
    }

    fn require_exclusive(&self) -> Result<()> {
        if self.is_exclusive() {
            Ok(())
        } else {
            Err(ArrayError::Aliased)
        }
    }

    /// Mutable reference to element `idx`.
    ///
    /// Fails with [`ArrayError::Aliased`] unless this header is the only one
    /// over its storage.
    pub fn at_mut<T: Element>(&mut self, idx: &[usize]) -> Result<&mut T> {
        self.check_type::<T>()?;
        self.require_exclusive()?;
        let p = self.ptr_mut(idx)?.cast::<T>();
        if p.align_offset(std::mem::align_of::<T>()) != 0 {
            return Err(ArrayError::Unsupported("element is not aligned for typed access"));
        }
        // SAFETY: in bounds, aligned and tied to `&mut self`.
        Ok(unsafe { &mut *p })
    }

    /// All elements as one slice. Requires a continuous array.
    ///
    /// # Safety
    ///
    /// No other header over the same buffer (clones, views, arrays over the
    /// same caller memory) may write to these elements while the slice is
    /// alive.
    pub unsafe fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_type::<T>()?;
        let p = self.checked_slice_ptr::<T>()?;
        // SAFETY: continuous, aligned, `total()` elements long; the caller
        // rules out writers.
        Ok(unsafe { std::slice::from_raw_parts(p, self.total()) })
    }

    /// All elements as one mutable slice. Requires a continuous array that
    /// is the only header over its storage.
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_type::<T>()?;
        self.require_exclusive()?;
        let p = self.checked_slice_ptr::<T>()?.cast_mut();
        // SAFETY: as in `as_slice`, tied to `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(p, self.total()) })
    }

    fn checked_slice_ptr<T: Element>(&self) -> Result<*const T> {
        if self.is_empty() {
            return Ok(ptr::NonNull::<T>::dangling().as_ptr().cast_const());
        }
        if !self.is_continuous() {
            return Err(ArrayError::NotContinuous("slice access needs a gap-free array"));
        }
        let p = self.data().cast::<T>();
        if p.align_offset(std::mem::align_of::<T>()) != 0 {
            return Err(ArrayError::Unsupported("element is not aligned for typed access"));
        }
        Ok(p)
    }

    /// The array's bytes, one slice per gap-free span.
    ///
    /// A continuous array yields exactly one span.
    ///
    /// # Safety
    ///
    /// As for [`as_slice`](Self::as_slice): nothing may write these bytes
    /// through another header while the spans are alive.
    #[must_use]
    pub unsafe fn byte_spans(&self) -> Vec<&[u8]> {
        let data = self.data();
        let mut spans = Vec::new();
        walk_spans(self.size(), [self.step()], self.elem_size(), |[off], len| {
            // SAFETY: spans lie inside the array extents.
            spans.push(unsafe { std::slice::from_raw_parts(data.add(off), len) });
        });
        spans
    }

    /// Row-major iterator that copies each element out.
    ///
    /// Works on non-continuous arrays; gaps between rows are skipped.
    pub fn iter<T: Element>(&self) -> Result<Elements<'_, T>> {
        if self.dims() > 0 {
            self.check_type::<T>()?;
        }
        let mut rows = Vec::new();
        let inner = self.step().last().copied().unwrap_or(0);
        walk_rows(self.size(), [self.step()], |[off], n| rows.push((off, n)));
        Ok(Elements {
            array: self,
            rows: rows.into_iter(),
            cur: 0,
            left: 0,
            inner,
            remaining: if self.dims() == 0 { 0 } else { self.total() },
            _marker: PhantomData,
        })
    }

    /// Copy all elements out in row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.dims() == 0 {
            return Ok(Vec::new());
        }
        self.check_type::<T>()?;
        let mut out = vec![T::default(); self.total()];
        let dst = out.as_mut_ptr().cast::<u8>();
        let src = self.data();
        let mut pos = 0;
        walk_spans(self.size(), [self.step()], self.elem_size(), |[off], len| {
            // SAFETY: `out` holds exactly the array's bytes; spans are in bounds.
            unsafe { ptr::copy_nonoverlapping(src.add(off), dst.add(pos), len) };
            pos += len;
        });
        Ok(out)
    }

    /// Set every element to `value`, saturating per channel.
    ///
    /// The zero scalar clears elements of any channel count.
    pub fn set_to(&mut self, value: Scalar) -> Result<()> {
        if self.dims() == 0 {
            return Ok(());
        }
        if value.is_zero() {
            self.fill_zero();
            return Ok(());
        }
        let ty = self.array_type();
        let pattern = value.to_element_bytes(ty)?;
        let data = self.data_mut();
        walk_spans(self.size(), [self.step()], ty.elem_size(), |[off], len| {
            // SAFETY: spans lie inside the array extents.
            let span = unsafe { std::slice::from_raw_parts_mut(data.add(off), len) };
            for chunk in span.chunks_exact_mut(pattern.len()) {
                chunk.copy_from_slice(&pattern);
            }
        });
        Ok(())
    }

    pub(crate) fn fill_zero(&mut self) {
        let data = self.data_mut();
        walk_spans(self.size(), [self.step()], self.elem_size(), |[off], len| {
            // SAFETY: spans lie inside the array extents.
            unsafe { ptr::write_bytes(data.add(off), 0, len) };
        });
    }

    /// Copy into `dst`, reallocating it unless it already has this shape.
    pub fn copy_into(&self, dst: &mut DenseArray) -> Result<()> {
        if self.dims() == 0 {
            dst.release();
            return Ok(());
        }
        dst.create(self.size(), self.array_type())?;
        self.copy_bytes_into(dst);
        Ok(())
    }

    /// Byte copy into a destination of identical extents and type.
    pub(crate) fn copy_bytes_into(&self, dst: &mut DenseArray) {
        debug_assert_eq!(self.size(), dst.size());
        let src = self.data();
        let out = dst.data_mut();
        walk_spans(
            self.size(),
            [self.step(), dst.step()],
            self.elem_size(),
            |[s, d], len| {
                // SAFETY: both spans are in bounds; `copy` tolerates overlap
                // between aliases of one buffer.
                unsafe { ptr::copy(src.add(s), out.add(d), len) };
            },
        );
    }

    // ------------------------------------------------------------------
    // Conversion and masked operations
    // ------------------------------------------------------------------

    /// Write `value * alpha + beta` for every channel value into `dst` at
    /// `depth` (`None` keeps the depth), rounding and saturating.
    ///
    /// The channel count is kept. `dst` must be a dense destination.
    pub fn convert_to(
        &self,
        dst: &mut OutputArray<'_>,
        depth: Option<Depth>,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        dst.dense_mut()?;
        if self.dims() == 0 {
            dst.release();
            return Ok(());
        }
        let src_ty = self.array_type();
        let ty = ArrayType::try_new(depth.unwrap_or(src_ty.depth()), src_ty.channels())?;
        dst.ensure_shape(self.size(), ty)?;
        let out = dst.dense_mut()?;
        if ty == src_ty && alpha == 1.0 && beta == 0.0 {
            self.copy_bytes_into(out);
            return Ok(());
        }

        let (sd, dd) = (src_ty.depth(), ty.depth());
        let (s1, d1) = (sd.size(), dd.size());
        let cn = src_ty.channels();
        let k = self.dims() - 1;
        let (s_inner, d_inner) = (self.step()[k], out.step()[k]);
        let src = self.data();
        let dst_ptr = out.data_mut();
        walk_rows(self.size(), [self.step(), out.step()], |[so, doff], n| {
            for j in 0..n {
                for c in 0..cn {
                    let at = so + j * s_inner + c * s1;
                    // SAFETY: channel `c` of element `j` lies inside `self`.
                    let v = sd.read_f64(unsafe { std::slice::from_raw_parts(src.add(at), s1) });
                    let at = doff + j * d_inner + c * d1;
                    // SAFETY: as above for `out`; the read borrow has ended.
                    let b = unsafe { std::slice::from_raw_parts_mut(dst_ptr.add(at), d1) };
                    dd.write_saturating(v * alpha + beta, b);
                }
            }
        });
        Ok(())
    }

    /// Check `mask` against this array. Returns whether it masks each
    /// channel separately.
    fn check_mask(&self, mask: &DenseArray) -> Result<bool> {
        if mask.depth() != Depth::U8 {
            return Err(ArrayError::TypeMismatch {
                requested: mask.array_type(),
                actual: ArrayType::U8C1,
            });
        }
        let cn = mask.channels();
        if cn != 1 && cn != self.channels() {
            return Err(ArrayError::TypeMismatch {
                requested: mask.array_type(),
                actual: ArrayType::new(Depth::U8, self.channels()),
            });
        }
        if mask.size() != self.size() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.total(),
                actual: mask.total(),
            });
        }
        Ok(cn > 1)
    }

    /// Copy into `dst` only where `mask` is non-zero.
    ///
    /// `mask` is 8-bit unsigned with one channel (whole elements) or as many
    /// channels as this array (per channel), and has this array's extents.
    /// A destination that has to be reallocated starts out zeroed.
    pub fn copy_to_masked(&self, dst: &mut OutputArray<'_>, mask: &DenseArray) -> Result<()> {
        dst.dense_mut()?;
        if self.dims() == 0 {
            dst.release();
            return Ok(());
        }
        let per_channel = self.check_mask(mask)?;
        dst.ensure_shape(self.size(), self.array_type())?;
        let out = dst.dense_mut()?;

        let (esz, esz1) = (self.elem_size(), self.elem_size1());
        let k = self.dims() - 1;
        let inner = [self.step()[k], mask.step()[k], out.step()[k]];
        let (src, m, dst_ptr) = (self.data(), mask.data(), out.data_mut());
        walk_rows(
            self.size(),
            [self.step(), mask.step(), out.step()],
            |[so, mo, doff], n| {
                for j in 0..n {
                    let (s, mp, d) = (so + j * inner[0], mo + j * inner[1], doff + j * inner[2]);
                    // SAFETY: all offsets address element `j` inside their
                    // arrays; `copy` tolerates aliases of one buffer.
                    unsafe {
                        if per_channel {
                            for c in 0..self.channels() {
                                if *m.add(mp + c) != 0 {
                                    ptr::copy(src.add(s + c * esz1), dst_ptr.add(d + c * esz1), esz1);
                                }
                            }
                        } else if *m.add(mp) != 0 {
                            ptr::copy(src.add(s), dst_ptr.add(d), esz);
                        }
                    }
                }
            },
        );
        Ok(())
    }

    /// Set elements to `value` only where `mask` is non-zero.
    ///
    /// `mask` follows the rules of [`copy_to_masked`](Self::copy_to_masked).
    pub fn set_to_masked(&mut self, value: Scalar, mask: &DenseArray) -> Result<()> {
        if self.dims() == 0 {
            return Ok(());
        }
        let per_channel = self.check_mask(mask)?;
        let pattern = value.to_element_bytes(self.array_type())?;
        let esz1 = self.elem_size1();
        let k = self.dims() - 1;
        let inner = [self.step()[k], mask.step()[k]];
        let m = mask.data();
        let data = self.data_mut();
        walk_rows(self.size(), [self.step(), mask.step()], |[off, mo], n| {
            for j in 0..n {
                let (d, mp) = (off + j * inner[0], mo + j * inner[1]);
                // SAFETY: offsets address element `j` of each array; the
                // pattern is exactly one element long.
                unsafe {
                    if per_channel {
                        for (c, chunk) in pattern.chunks_exact(esz1).enumerate() {
                            if *m.add(mp + c) != 0 {
                                ptr::copy_nonoverlapping(chunk.as_ptr(), data.add(d + c * esz1), esz1);
                            }
                        }
                    } else if *m.add(mp) != 0 {
                        ptr::copy_nonoverlapping(pattern.as_ptr(), data.add(d), pattern.len());
                    }
                }
            }
        });
        Ok(())
    }

    /// Square matrix with `values` on the main diagonal and zeros elsewhere.
    ///
    /// `values` must be a single row or column.
    pub fn from_diag(values: &DenseArray) -> Result<DenseArray> {
        let n = match values.size() {
            [1, n] | [n, 1] => *n,
            _ => {
                return Err(ArrayError::Unsupported(
                    "diagonal values must be a single row or column",
                ))
            }
        };
        let mut out = values.empty_like();
        out.create(&[n, n], values.array_type())?;
        if n == 0 {
            return Ok(out);
        }
        let column = if values.size()[0] == 1 {
            values.reshape(0, &[n, 1])?
        } else {
            values.clone()
        };
        let mut diag = out.diag(0)?;
        column.copy_bytes_into(&mut diag);
        drop(diag);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// View of the sub-block selected by one range per dimension.
    pub fn region(&self, ranges: &[Range<usize>]) -> Result<DenseArray> {
        if ranges.len() != self.dims() {
            return Err(ArrayError::DimensionMismatch {
                expected: self.dims(),
                actual: ranges.len(),
            });
        }
        let mut view = self.clone();
        let mut narrowed = false;
        for (dim, r) in ranges.iter().enumerate() {
            let n = self.size()[dim];
            if r.start > r.end || r.end > n {
                return Err(ArrayError::RegionOutOfRange {
                    dim,
                    start: r.start,
                    end: r.end,
                    size: n,
                });
            }
            view.offset += r.start * self.step()[dim];
            view.hdr.size_mut()[dim] = r.end - r.start;
            narrowed |= r.start != 0 || r.end != n;
        }
        if narrowed {
            view.hdr.set_submatrix(true);
        }
        view.hdr.update_continuity();
        Ok(view)
    }

    /// View of rows `start..end` (outermost dimension).
    pub fn row_range(&self, start: usize, end: usize) -> Result<DenseArray> {
        self.require_dims()?;
        let mut ranges: Vec<Range<usize>> = self.size().iter().map(|&n| 0..n).collect();
        ranges[0] = start..end;
        self.region(&ranges)
    }

    /// View of row `i`.
    pub fn row(&self, i: usize) -> Result<DenseArray> {
        self.require_dims()?;
        let end = self.one_past(0, i)?;
        self.row_range(i, end)
    }

    /// View of columns `start..end` of a 2-D array.
    pub fn col_range(&self, start: usize, end: usize) -> Result<DenseArray> {
        self.require_2d()?;
        self.region(&[0..self.size()[0], start..end])
    }

    /// View of column `i` of a 2-D array.
    pub fn col(&self, i: usize) -> Result<DenseArray> {
        self.require_2d()?;
        let end = self.one_past(1, i)?;
        self.col_range(i, end)
    }

    fn one_past(&self, dim: usize, i: usize) -> Result<usize> {
        i.checked_add(1).ok_or(ArrayError::RegionOutOfRange {
            dim,
            start: i,
            end: usize::MAX,
            size: self.size()[dim],
        })
    }

    /// Column view of diagonal `d` of a 2-D array.
    ///
    /// `d = 0` is the main diagonal, positive values lie above it and
    /// negative values below.
    pub fn diag(&self, d: isize) -> Result<DenseArray> {
        self.require_2d()?;
        let (rows, cols) = (self.size()[0], self.size()[1]);
        let esz = self.elem_size();
        let step0 = self.step()[0];
        let shift = d.unsigned_abs();

        let mut view = self.clone();
        let len = if d >= 0 {
            if shift >= cols {
                return Err(ArrayError::IndexOutOfRange {
                    dim: 1,
                    index: shift,
                    size: cols,
                });
            }
            view.offset += esz * shift;
            (cols - shift).min(rows)
        } else {
            if shift >= rows {
                return Err(ArrayError::IndexOutOfRange {
                    dim: 0,
                    index: shift,
                    size: rows,
                });
            }
            view.offset += step0 * shift;
            (rows - shift).min(cols)
        };

        view.hdr.size_mut().copy_from_slice(&[len, 1]);
        if len > 1 {
            view.hdr.step_mut()[0] = step0 + esz;
        }
        view.hdr.update_continuity();
        view.hdr.set_submatrix(!(rows == 1 && cols == 1));
        Ok(view)
    }

    /// Reinterpret the same bytes with `cn` channels (0 keeps the current
    /// count) and extents `sizes`.
    ///
    /// The byte length must not change. Only the innermost dimension may be
    /// regrouped on a non-continuous array; any other reshape needs a
    /// gap-free buffer.
    pub fn reshape(&self, cn: usize, sizes: &[usize]) -> Result<DenseArray> {
        if sizes.is_empty() || sizes.len() > MAX_DIMS {
            return Err(ArrayError::InvalidDims {
                dims: sizes.len(),
                max: MAX_DIMS,
            });
        }
        let ty = self.array_type();
        let new_ty = if cn == 0 { ty } else { ty.with_channels(cn)? };
        let old_bytes = self.total() * ty.elem_size();
        let new_bytes = byte_len(sizes, new_ty.elem_size())?;
        if old_bytes != new_bytes {
            return Err(ArrayError::ShapeMismatch {
                expected: old_bytes,
                actual: new_bytes,
            });
        }

        let dims = self.dims();
        let mut view = self.clone();
        let inner_only = sizes.len() == dims && dims > 0 && sizes[..dims - 1] == self.size()[..dims - 1];
        if inner_only {
            if self.size()[dims - 1] > 1 && self.step()[dims - 1] != ty.elem_size() {
                return Err(ArrayError::NotContinuous("innermost dimension is strided"));
            }
            view.hdr.set_type(new_ty);
            view.hdr.size_mut()[dims - 1] = sizes[dims - 1];
            view.hdr.step_mut()[dims - 1] = new_ty.elem_size();
        } else {
            if !self.is_continuous() {
                return Err(ArrayError::NotContinuous(
                    "reshape across rows of a non-continuous array",
                ));
            }
            let mut hdr = ArrayHeader::new(sizes, new_ty)?;
            hdr.set_submatrix(self.is_submatrix());
            view.hdr = hdr;
        }
        view.hdr.update_continuity();
        Ok(view)
    }

    /// 2-D reshape: regroup into `cn` channels (0 keeps) and `rows` rows
    /// (0 keeps, unless the row no longer divides into `cn`).
    pub fn reshape_rows(&self, cn: usize, rows: usize) -> Result<DenseArray> {
        self.require_2d()?;
        let cur_cn = self.channels();
        let new_cn = if cn == 0 { cur_cn } else { cn };
        let new_ty = self.array_type().with_channels(new_cn)?;
        let cur_rows = self.size()[0];
        let mut total_width = self.size()[1] * cur_cn;
        let mut new_rows = rows;

        if (new_cn > total_width || total_width % new_cn != 0) && new_rows == 0 {
            new_rows = cur_rows * total_width / new_cn;
        }

        let mut view = self.clone();
        if new_rows != 0 && new_rows != cur_rows {
            let total_size = total_width * cur_rows;
            if !self.is_continuous() {
                return Err(ArrayError::NotContinuous(
                    "row count of a non-continuous array cannot change",
                ));
            }
            if new_rows > total_size {
                return Err(ArrayError::ShapeMismatch {
                    expected: total_size,
                    actual: new_rows,
                });
            }
            total_width = total_size / new_rows;
            if total_width * new_rows != total_size {
                return Err(ArrayError::ShapeMismatch {
                    expected: total_size,
                    actual: total_width * new_rows,
                });
            }
            view.hdr.size_mut()[0] = new_rows;
            view.hdr.step_mut()[0] = total_width * self.elem_size1();
        }

        let new_width = total_width / new_cn;
        if new_width * new_cn != total_width {
            return Err(ArrayError::ShapeMismatch {
                expected: total_width,
                actual: new_width * new_cn,
            });
        }
        view.hdr.size_mut()[1] = new_width;
        view.hdr.set_type(new_ty);
        view.hdr.step_mut()[1] = new_ty.elem_size();
        view.hdr.update_continuity();
        Ok(view)
    }

    /// Where this 2-D view sits inside its allocation.
    pub fn locate_roi(&self) -> Result<RoiLocation> {
        self.require_2d()?;
        let esz = self.elem_size();
        let step0 = self.step()[0].max(1);
        let (rows, cols) = (self.size()[0], self.size()[1]);

        let (oy, ox) = if self.offset == 0 {
            (0, 0)
        } else {
            let y = self.offset / step0;
            (y, (self.offset - y * step0) / esz)
        };
        let minstep = (ox + cols) * esz;
        let height = (self.end.saturating_sub(minstep) / step0 + 1).max(oy + rows);
        let width = (self.end.saturating_sub(step0 * (height - 1)) / esz).max(ox + cols);
        Ok(RoiLocation {
            whole_size: [height, width],
            offset: [oy, ox],
        })
    }

    /// Move the edges of this 2-D view outward (positive) or inward
    /// (negative), clipped to the allocation it was cut from.
    pub fn adjust_roi(&mut self, top: isize, bottom: isize, left: isize, right: isize) -> Result<()> {
        let loc = self.locate_roi()?;
        let [height, width] = loc.whole_size.map(to_isize);
        let [oy, ox] = loc.offset.map(to_isize);
        let rows = to_isize(self.size()[0]);
        let cols = to_isize(self.size()[1]);

        let mut row1 = oy.saturating_sub(top).max(0).min(height);
        let mut row2 = (oy + rows).saturating_add(bottom).min(height).max(0);
        let mut col1 = ox.saturating_sub(left).max(0).min(width);
        let mut col2 = (ox + cols).saturating_add(right).min(width).max(0);
        if row1 > row2 {
            std::mem::swap(&mut row1, &mut row2);
        }
        if col1 > col2 {
            std::mem::swap(&mut col1, &mut col2);
        }

        let [row1, row2, col1, col2] = [row1, row2, col1, col2].map(|v| v.unsigned_abs());
        self.offset = row1 * self.step()[0] + col1 * self.elem_size();
        self.hdr
            .size_mut()
            .copy_from_slice(&[row2 - row1, col2 - col1]);
        let whole = row1 == 0 && col1 == 0 && row2 == loc.whole_size[0] && col2 == loc.whole_size[1];
        self.hdr.set_submatrix(!whole);
        self.hdr.update_continuity();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Growth along the outermost dimension
    // ------------------------------------------------------------------

    /// Append one element to an n x 1 array (or start a 1 x 1 array).
    pub fn push_back<T: Element>(&mut self, value: T) -> Result<()> {
        if self.dims() == 0 {
            self.create(&[1, 1], T::array_type())?;
            return self.set(&[0, 0], value);
        }
        self.check_type::<T>()?;
        let row_elems: usize = self.size()[1..].iter().product();
        if row_elems != 1 {
            return Err(ArrayError::ShapeMismatch {
                expected: 1,
                actual: row_elems,
            });
        }
        let r = self.size()[0];
        self.grow_rows(r + 1)?;
        let mut idx = Dims::from_elem(0, self.dims());
        idx[0] = r;
        self.set(&idx, value)
    }

    /// Append the rows of `rows`, which must match this array's row shape
    /// and type. An empty array becomes a copy of `rows`.
    pub fn push_back_array(&mut self, rows: &DenseArray) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if self.dims() == 0 {
            self.create(rows.size(), rows.array_type())?;
            rows.copy_bytes_into(self);
            return Ok(());
        }
        if rows.array_type() != self.array_type() {
            return Err(ArrayError::TypeMismatch {
                requested: rows.array_type(),
                actual: self.array_type(),
            });
        }
        if rows.dims() != self.dims() {
            return Err(ArrayError::DimensionMismatch {
                expected: self.dims(),
                actual: rows.dims(),
            });
        }
        if rows.size()[1..] != self.size()[1..] {
            return Err(ArrayError::ShapeMismatch {
                expected: self.size()[1..].iter().product(),
                actual: rows.size()[1..].iter().product(),
            });
        }
        let r = self.size()[0];
        let delta = rows.size()[0];
        self.grow_rows(r + delta)?;
        let mut tail = self.row_range(r, r + delta)?;
        rows.copy_bytes_into(&mut tail);
        Ok(())
    }

    /// Remove the last `n` rows.
    pub fn pop_back(&mut self, n: usize) -> Result<()> {
        self.require_dims()?;
        let r = self.size()[0];
        if n > r {
            return Err(ArrayError::IndexOutOfRange {
                dim: 0,
                index: n,
                size: r,
            });
        }
        self.hdr.size_mut()[0] = r - n;
        if !self.is_submatrix() {
            self.end = self.end.saturating_sub(n * self.step()[0]);
        }
        self.hdr.update_continuity();
        Ok(())
    }

    /// Change the row count. New rows reuse whatever the buffer holds past
    /// the old end (zeros for fresh storage).
    pub fn resize(&mut self, rows: usize) -> Result<()> {
        self.require_dims()?;
        let r = self.size()[0];
        if rows <= r {
            return self.pop_back(r - rows);
        }
        if self.is_submatrix() {
            return Err(ArrayError::SubmatrixGrowth);
        }
        if rows > self.capacity() {
            self.reserve(rows)?;
        }
        self.set_rows(rows);
        Ok(())
    }

    /// Change the row count and fill any new rows with `value`.
    pub fn resize_with(&mut self, rows: usize, value: Scalar) -> Result<()> {
        let r = self.size().first().copied().unwrap_or(0);
        self.resize(rows)?;
        if rows > r {
            self.row_range(r, rows)?.set_to(value)?;
        }
        Ok(())
    }

    /// Make room for at least `rows` rows without further reallocation.
    pub fn reserve(&mut self, rows: usize) -> Result<()> {
        self.require_dims()?;
        let r = self.size()[0];
        if rows <= r {
            return Ok(());
        }
        if self.is_submatrix() {
            return Err(ArrayError::SubmatrixGrowth);
        }
        if rows <= self.capacity() {
            return Ok(());
        }

        let ty = self.array_type();
        let mut sizes = Dims::from_slice(self.size());
        sizes[0] = rows;
        let bytes = byte_len(&sizes, ty.elem_size())?;
        if bytes > 0 && bytes < self.min_reserve {
            sizes[0] = (self.min_reserve + bytes - 1) * rows / bytes;
        }

        let mut grown = self.empty_like();
        grown.create(&sizes, ty)?;
        if r > 0 {
            let mut head = grown.row_range(0, r)?;
            self.copy_bytes_into(&mut head);
        }
        if let Some(old) = &self.storage {
            tracing::debug!(
                rows = r,
                capacity = sizes[0],
                detached_aliases = old.refcount() - 1,
                "dense array moved to a larger buffer"
            );
        }

        let end = r * grown.step()[0];
        *self = grown;
        self.hdr.size_mut()[0] = r;
        self.end = end;
        self.hdr.update_continuity();
        Ok(())
    }

    fn grow_rows(&mut self, rows: usize) -> Result<()> {
        if self.is_submatrix() {
            return Err(ArrayError::SubmatrixGrowth);
        }
        if rows > self.capacity() {
            let r = self.size()[0];
            self.reserve(ArrayConfig::grown_rows(r).max(rows))?;
        }
        self.set_rows(rows);
        Ok(())
    }

    fn set_rows(&mut self, rows: usize) {
        let r = self.size()[0];
        let step0 = self.step()[0];
        self.hdr.size_mut()[0] = rows;
        self.end = (self.end + (rows - r) * step0).min(self.limit);
        self.hdr.update_continuity();
    }

    fn require_dims(&self) -> Result<()> {
        if self.dims() == 0 {
            return Err(ArrayError::InvalidDims {
                dims: 0,
                max: MAX_DIMS,
            });
        }
        Ok(())
    }

    fn require_2d(&self) -> Result<()> {
        if self.dims() != 2 {
            return Err(ArrayError::DimensionMismatch {
                expected: 2,
                actual: self.dims(),
            });
        }
        Ok(())
    }
}

/// Iterator returned by [`DenseArray::iter`].
pub struct Elements<'a, T> {
    array: &'a DenseArray,
    rows: std::vec::IntoIter<(usize, usize)>,
    cur: usize,
    left: usize,
    inner: usize,
    remaining: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> Iterator for Elements<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.left == 0 {
            let (off, n) = self.rows.next()?;
            self.cur = off;
            self.left = n;
        }
        let p = self.array.data().wrapping_add(self.cur);
        self.cur += self.inner;
        self.left -= 1;
        self.remaining -= 1;
        // SAFETY: `p` addresses a whole `T` inside the array; the type was
        // checked when the iterator was built.
        Some(unsafe { p.cast::<T>().read_unaligned() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Element> ExactSizeIterator for Elements<'_, T> {}

fn byte_len(sizes: &[usize], elem_size: usize) -> Result<usize> {
    sizes
        .iter()
        .try_fold(elem_size, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| AllocError::InvalidLayout("array byte size overflows usize".into()).into())
}

fn to_isize(v: usize) -> isize {
    isize::try_from(v).unwrap_or(isize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndmat_alloc::BudgetAllocator;

    fn iota_u8(rows: usize, cols: usize) -> DenseArray {
        let data: Vec<u8> = (0..rows * cols).map(|v| v as u8).collect();
        DenseArray::from_slice(&[rows, cols], &data).unwrap()
    }

    #[test]
    fn test_zeros() {
        let a = DenseArray::zeros(&[4, 4], ArrayType::U8C1).unwrap();
        assert_eq!(a.dims(), 2);
        assert_eq!(a.total(), 16);
        assert_eq!(a.refcount(), 1);
        assert!(a.is_continuous());
        assert!(!a.is_submatrix());
        assert!(a.to_vec::<u8>().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_create_same_shape_is_noop() {
        let mut a = DenseArray::zeros(&[3, 3], ArrayType::F32C1).unwrap();
        a.set(&[1, 1], 2.5f32).unwrap();
        let before = a.data();
        a.create(&[3, 3], ArrayType::F32C1).unwrap();
        assert_eq!(a.data(), before);
        assert_eq!(a.at::<f32>(&[1, 1]).unwrap(), 2.5);

        a.create(&[2, 3], ArrayType::F32C1).unwrap();
        assert_eq!(a.size(), &[2, 3]);
        assert_eq!(a.at::<f32>(&[1, 1]).unwrap(), 0.0);
    }

    #[test]
    fn test_create_failure_keeps_header() {
        let alloc: Arc<dyn Allocator> = Arc::new(BudgetAllocator::new(64));
        let mut a = DenseArray::create_in(alloc, &[4, 4], ArrayType::U8C1).unwrap();
        a.set(&[0, 0], 7u8).unwrap();

        let err = a.create(&[100, 100], ArrayType::U8C1).unwrap_err();
        assert!(!err.is_contract_violation());
        assert_eq!(a.size(), &[4, 4]);
        assert_eq!(a.at::<u8>(&[0, 0]).unwrap(), 7);
    }

    #[test]
    fn test_type_mismatch() {
        let a = DenseArray::zeros(&[2, 2], ArrayType::U8C3).unwrap();
        assert_eq!(
            a.at::<f32>(&[0, 0]),
            Err(ArrayError::TypeMismatch {
                requested: ArrayType::F32C1,
                actual: ArrayType::U8C3
            })
        );
        assert_eq!(a.at::<[u8; 3]>(&[1, 1]).unwrap(), [0, 0, 0]);
    }

    #[test]
    fn test_row_view_shares_storage() {
        let a = iota_u8(4, 4);
        let mut r = a.row(2).unwrap();
        assert_eq!(a.refcount(), 2);
        assert!(r.is_continuous());
        assert!(r.is_submatrix());
        assert_eq!(r.to_vec::<u8>().unwrap(), vec![8, 9, 10, 11]);

        r.set(&[0, 3], 99u8).unwrap();
        assert_eq!(a.at::<u8>(&[2, 3]).unwrap(), 99);
    }

    #[test]
    fn test_col_view_not_continuous() {
        let a = iota_u8(3, 4);
        let c = a.col(1).unwrap();
        assert_eq!(c.size(), &[3, 1]);
        assert!(!c.is_continuous());
        assert_eq!(c.to_vec::<u8>().unwrap(), vec![1, 5, 9]);
        // SAFETY: nothing writes `a` while the spans live.
        assert_eq!(unsafe { c.byte_spans() }.len(), 3);
    }

    #[test]
    fn test_full_range_is_not_submatrix() {
        let a = iota_u8(3, 3);
        let v = a.row_range(0, 3).unwrap();
        assert!(!v.is_submatrix());
        assert!(v.is_continuous());
    }

    #[test]
    fn test_region_out_of_range() {
        let a = iota_u8(3, 3);
        assert_eq!(
            a.region(&[0..2, 1..4]).unwrap_err(),
            ArrayError::RegionOutOfRange {
                dim: 1,
                start: 1,
                end: 4,
                size: 3
            }
        );
        assert!(a.region(&[0..1]).is_err());
    }

    #[test]
    fn test_diag() {
        let a = iota_u8(3, 4);
        let d0 = a.diag(0).unwrap();
        assert_eq!(d0.size(), &[3, 1]);
        assert_eq!(d0.to_vec::<u8>().unwrap(), vec![0, 5, 10]);
        assert!(!d0.is_continuous());
        assert!(d0.is_submatrix());

        let d1 = a.diag(2).unwrap();
        assert_eq!(d1.to_vec::<u8>().unwrap(), vec![2, 7]);

        let dm = a.diag(-1).unwrap();
        assert_eq!(dm.to_vec::<u8>().unwrap(), vec![4, 9]);

        let single = a.diag(-2).unwrap();
        assert_eq!(single.size(), &[1, 1]);
        assert!(single.is_continuous());

        assert!(a.diag(4).is_err());
        assert!(a.diag(-3).is_err());
    }

    #[test]
    fn test_reshape_continuous() {
        let a = iota_u8(4, 6);
        let b = a.reshape(0, &[2, 12]).unwrap();
        assert_eq!(b.size(), &[2, 12]);
        assert_eq!(b.at::<u8>(&[1, 0]).unwrap(), 12);
        assert!(b.shares_storage_with(&a));

        let c = a.reshape(3, &[4, 2]).unwrap();
        assert_eq!(c.array_type(), ArrayType::U8C3);
        assert_eq!(c.at::<[u8; 3]>(&[1, 1]).unwrap(), [9, 10, 11]);

        assert_eq!(
            a.reshape(0, &[5, 5]).unwrap_err(),
            ArrayError::ShapeMismatch {
                expected: 24,
                actual: 25
            }
        );
    }

    #[test]
    fn test_reshape_non_continuous() {
        let a = iota_u8(4, 6);
        let roi = a.region(&[0..4, 0..3]).unwrap();
        assert!(!roi.is_continuous());

        let cn = roi.reshape(3, &[4, 1]).unwrap();
        assert_eq!(cn.at::<[u8; 3]>(&[2, 0]).unwrap(), [12, 13, 14]);

        assert!(matches!(
            roi.reshape(0, &[2, 6]),
            Err(ArrayError::NotContinuous(_))
        ));
    }

    #[test]
    fn test_reshape_rows() {
        let a = iota_u8(4, 6);
        let b = a.reshape_rows(0, 2).unwrap();
        assert_eq!(b.size(), &[2, 12]);
        assert_eq!(b.step(), &[12, 1]);

        let c = a.reshape_rows(2, 0).unwrap();
        assert_eq!(c.size(), &[4, 3]);
        assert_eq!(c.channels(), 2);

        assert!(a.reshape_rows(0, 5).is_err());

        let roi = a.region(&[0..2, 0..4]).unwrap();
        assert!(matches!(
            roi.reshape_rows(0, 1),
            Err(ArrayError::NotContinuous(_))
        ));
        assert!(roi.reshape_rows(4, 0).is_ok());
    }

    #[test]
    fn test_locate_and_adjust_roi() {
        let a = iota_u8(6, 8);
        let mut roi = a.region(&[2..4, 3..6]).unwrap();
        let loc = roi.locate_roi().unwrap();
        assert_eq!(loc.whole_size, [6, 8]);
        assert_eq!(loc.offset, [2, 3]);

        roi.adjust_roi(1, 1, 1, 1).unwrap();
        assert_eq!(roi.size(), &[4, 5]);
        assert_eq!(roi.at::<u8>(&[0, 0]).unwrap(), 8 + 2);

        roi.adjust_roi(10, 10, 10, 10).unwrap();
        assert_eq!(roi.size(), &[6, 8]);
        assert!(!roi.is_submatrix());
        assert!(roi.is_continuous());
        assert_eq!(roi.locate_roi().unwrap().offset, [0, 0]);
    }

    #[test]
    fn test_push_back_grows() {
        let mut v = DenseArray::new();
        for i in 0..40i32 {
            v.push_back(i).unwrap();
        }
        assert_eq!(v.size(), &[40, 1]);
        assert!(v.capacity() >= 40);
        assert_eq!(v.at::<i32>(&[39, 0]).unwrap(), 39);
        assert_eq!(v.to_vec::<i32>().unwrap(), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_back_detaches_aliases() {
        let mut v = DenseArray::zeros(&[1, 1], ArrayType::I32C1).unwrap();
        v.set(&[0, 0], 1i32).unwrap();
        let alias = v.clone();
        let cap = v.capacity();
        for i in 0..=cap as i32 {
            v.push_back(i).unwrap();
        }
        v.set(&[0, 0], 5i32).unwrap();
        assert!(!v.shares_storage_with(&alias));
        assert_eq!(alias.at::<i32>(&[0, 0]).unwrap(), 1);
        assert_eq!(alias.refcount(), 1);
    }

    #[test]
    fn test_submatrix_growth_rejected() {
        let a = iota_u8(4, 1);
        let mut v = a.row_range(1, 3).unwrap();
        assert_eq!(v.push_back(3u8), Err(ArrayError::SubmatrixGrowth));
        assert_eq!(v.resize(5), Err(ArrayError::SubmatrixGrowth));
        v.pop_back(1).unwrap();
        assert_eq!(v.size(), &[1, 1]);
    }

    #[test]
    fn test_reserve_min_size() {
        let mut a = DenseArray::zeros(&[1, 1], ArrayType::I32C1).unwrap();
        a.reserve(2).unwrap();
        assert_eq!(a.size(), &[1, 1]);
        assert_eq!(a.capacity(), 17);
    }

    #[test]
    fn test_push_back_array_and_pop() {
        let mut a = iota_u8(2, 3);
        let b = iota_u8(2, 3);
        a.push_back_array(&b).unwrap();
        assert_eq!(a.size(), &[4, 3]);
        assert_eq!(a.at::<u8>(&[3, 2]).unwrap(), 5);

        let wrong = iota_u8(1, 4);
        assert!(matches!(
            a.push_back_array(&wrong),
            Err(ArrayError::ShapeMismatch { .. })
        ));

        a.pop_back(3).unwrap();
        assert_eq!(a.size(), &[1, 3]);
        assert!(a.pop_back(2).is_err());
    }

    #[test]
    fn test_resize_with() {
        let mut a = DenseArray::zeros(&[2, 2], ArrayType::I16C1).unwrap();
        a.resize_with(4, Scalar::all(-3.0)).unwrap();
        assert_eq!(a.to_vec::<i16>().unwrap(), vec![0, 0, 0, 0, -3, -3, -3, -3]);
        a.resize(1).unwrap();
        assert_eq!(a.total(), 2);
    }

    #[test]
    fn test_set_to_view() {
        let mut a = DenseArray::zeros(&[3, 3], ArrayType::U8C1).unwrap();
        a.region(&[1..3, 1..3]).unwrap().set_to(Scalar::all(4.0)).unwrap();
        assert_eq!(a.to_vec::<u8>().unwrap(), vec![0, 0, 0, 0, 4, 4, 0, 4, 4]);
    }

    #[test]
    fn test_deep_clone_independent() {
        let a = iota_u8(3, 3);
        let mut b = a.deep_clone().unwrap();
        b.set(&[0, 0], 200u8).unwrap();
        assert_eq!(a.at::<u8>(&[0, 0]).unwrap(), 0);
        assert_eq!(a.refcount(), 1);
        assert_eq!(b.refcount(), 1);

        let roi = a.region(&[1..3, 0..2]).unwrap();
        let c = roi.deep_clone().unwrap();
        assert!(c.is_continuous());
        assert!(!c.is_submatrix());
        assert_eq!(c.to_vec::<u8>().unwrap(), vec![3, 4, 6, 7]);
    }

    #[test]
    fn test_release_keeps_aliases_alive() {
        let mut a = iota_u8(2, 2);
        let v = a.row(1).unwrap();
        a.release();
        assert_eq!(a.dims(), 0);
        assert!(a.is_empty());
        assert_eq!(v.refcount(), 1);
        assert_eq!(v.to_vec::<u8>().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_from_raw_parts() {
        let mut buf = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let a = unsafe {
            DenseArray::from_raw_parts(buf.as_mut_ptr(), &[2, 3], Some(&[4, 1]), ArrayType::U8C1)
        }
        .unwrap();
        assert_eq!(a.refcount(), 0);
        assert!(!a.is_continuous());
        assert_eq!(a.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        // SAFETY: `buf` is only read while the spans live.
        assert_eq!(unsafe { a.byte_spans() }, vec![&[1u8, 2, 3][..], &[4, 5, 6][..]]);
        assert!(!a.is_exclusive());
    }

    #[test]
    fn test_check_vector() {
        let points = DenseArray::zeros(&[10, 1], ArrayType::F32C2).unwrap();
        assert_eq!(points.check_vector(2, None, true), Some(10));
        assert_eq!(points.check_vector(2, Some(Depth::F64), true), None);

        let flat = DenseArray::zeros(&[10, 2], ArrayType::F32C1).unwrap();
        assert_eq!(flat.check_vector(2, Some(Depth::F32), true), Some(10));
        assert_eq!(flat.check_vector(3, None, true), None);

        let cube = DenseArray::zeros(&[1, 5, 3], ArrayType::I32C1).unwrap();
        assert_eq!(cube.check_vector(3, None, false), Some(5));
    }

    #[test]
    fn test_as_slice() {
        let mut a = DenseArray::from_slice(&[2, 2], &[1.0f64, 2.0, 3.0, 4.0]).unwrap();
        a.as_mut_slice::<f64>().unwrap()[3] = 8.0;
        // SAFETY: `a` has no aliases.
        assert_eq!(unsafe { a.as_slice::<f64>() }.unwrap(), &[1.0, 2.0, 3.0, 8.0]);
        let col = a.col(0).unwrap();
        // SAFETY: the column view is never written.
        assert!(unsafe { col.as_slice::<f64>() }.is_err());
        *a.at_mut::<f64>(&[0, 1]).unwrap() += 1.0;
        assert_eq!(a.at::<f64>(&[0, 1]).unwrap(), 3.0);
    }

    #[test]
    fn test_mutable_borrows_need_sole_owner() {
        let mut a = iota_u8(2, 2);
        let mut b = a.clone();
        assert!(!a.is_exclusive());
        assert_eq!(a.at_mut::<u8>(&[0, 0]), Err(ArrayError::Aliased));
        assert_eq!(b.as_mut_slice::<u8>().unwrap_err(), ArrayError::Aliased);

        b.set(&[0, 0], 42u8).unwrap();
        assert_eq!(a.at::<u8>(&[0, 0]).unwrap(), 42);

        drop(b);
        assert!(a.is_exclusive());
        *a.at_mut::<u8>(&[1, 1]).unwrap() = 7;
        assert_eq!(a.as_mut_slice::<u8>().unwrap(), &[42, 1, 2, 7]);

        let row = a.row(0).unwrap();
        assert_eq!(a.as_mut_slice::<u8>().unwrap_err(), ArrayError::Aliased);
        drop(row);
        assert!(DenseArray::new().is_exclusive());
    }

    #[test]
    fn test_row_col_index_overflow() {
        let a = iota_u8(3, 3);
        assert!(matches!(
            a.row(usize::MAX),
            Err(ArrayError::RegionOutOfRange { dim: 0, .. })
        ));
        assert!(matches!(
            a.col(usize::MAX),
            Err(ArrayError::RegionOutOfRange { dim: 1, .. })
        ));
        assert!(a.row(3).is_err());

        let mut roi = a.region(&[1..2, 1..2]).unwrap();
        roi.adjust_roi(isize::MAX, isize::MAX, isize::MIN, isize::MIN).unwrap();
        assert_eq!(roi.size(), &[3, 3]);
    }

    #[test]
    fn test_wide_elements_fill() {
        let ty = ArrayType::new(Depth::U8, 5);
        let mut a = DenseArray::filled(&[2, 2], ty, Scalar::all(0.0)).unwrap();
        a.set_to(Scalar::all(0.0)).unwrap();
        assert!(a.set_to(Scalar::all(1.0)).is_err());

        let mut v = DenseArray::zeros(&[1, 1], ty).unwrap();
        v.resize_with(3, Scalar::all(0.0)).unwrap();
        assert_eq!(v.size(), &[3, 1]);
    }

    #[test]
    fn test_iter_skips_gaps() {
        let a = iota_u8(3, 4);
        let roi = a.region(&[1..3, 1..3]).unwrap();
        let it = roi.iter::<u8>().unwrap();
        assert_eq!(it.len(), 4);
        assert_eq!(it.collect::<Vec<_>>(), vec![5, 6, 9, 10]);
        assert_eq!(a.diag(0).unwrap().iter::<u8>().unwrap().collect::<Vec<_>>(), vec![0, 5, 10]);
        assert!(a.iter::<i32>().is_err());
        assert_eq!(DenseArray::new().iter::<u8>().unwrap().count(), 0);
    }

    #[test]
    fn test_convert_to() {
        let a = DenseArray::from_slice(&[2, 2], &[-1.6f32, 0.4, 100.0, 300.0]).unwrap();
        let mut b = DenseArray::new();
        a.convert_to(&mut OutputArray::from(&mut b), Some(Depth::U8), 1.0, 0.0)
            .unwrap();
        assert_eq!(b.to_vec::<u8>().unwrap(), vec![0, 0, 100, 255]);

        let roi = a.col(1).unwrap();
        let mut c = DenseArray::zeros(&[2, 1], ArrayType::I16C1).unwrap();
        let before = c.data();
        roi.convert_to(&mut OutputArray::from(&mut c), Some(Depth::I16), 2.0, 1.0)
            .unwrap();
        assert_eq!(c.data(), before);
        assert_eq!(c.to_vec::<i16>().unwrap(), vec![2, 601]);

        let mut same = DenseArray::new();
        a.convert_to(&mut OutputArray::from(&mut same), None, 1.0, 0.0)
            .unwrap();
        assert_eq!(same.to_vec::<f32>().unwrap(), a.to_vec::<f32>().unwrap());
        assert!(!same.shares_storage_with(&a));

        let px = DenseArray::from_slice(&[1, 2], &[[1u8, 2, 3], [4, 5, 6]]).unwrap();
        let mut f = DenseArray::new();
        px.convert_to(&mut OutputArray::from(&mut f), Some(Depth::F32), 0.5, 0.0)
            .unwrap();
        assert_eq!(f.array_type(), ArrayType::new(Depth::F32, 3));
        assert_eq!(f.at::<[f32; 3]>(&[0, 1]).unwrap(), [2.0, 2.5, 3.0]);
    }

    #[test]
    fn test_convert_to_rejects_non_dense_output() {
        let a = iota_u8(2, 2);
        let mut list: Vec<DenseArray> = Vec::new();
        assert!(matches!(
            a.convert_to(&mut OutputArray::from(&mut list), None, 1.0, 0.0),
            Err(ArrayError::UnsupportedKind(_))
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn test_copy_to_masked() {
        let a = iota_u8(2, 3);
        let mask = DenseArray::from_slice(&[2, 3], &[1u8, 0, 1, 0, 9, 0]).unwrap();
        let mut dst = DenseArray::filled(&[2, 3], ArrayType::U8C1, Scalar::all(7.0)).unwrap();
        a.copy_to_masked(&mut OutputArray::from(&mut dst), &mask).unwrap();
        assert_eq!(dst.to_vec::<u8>().unwrap(), vec![0, 7, 2, 7, 4, 7]);

        let mut fresh = DenseArray::new();
        a.copy_to_masked(&mut OutputArray::from(&mut fresh), &mask).unwrap();
        assert_eq!(fresh.to_vec::<u8>().unwrap(), vec![0, 0, 2, 0, 4, 0]);

        let wrong = DenseArray::zeros(&[3, 2], ArrayType::U8C1).unwrap();
        assert!(matches!(
            a.copy_to_masked(&mut OutputArray::from(&mut fresh), &wrong),
            Err(ArrayError::ShapeMismatch { .. })
        ));
        let float_mask = DenseArray::zeros(&[2, 3], ArrayType::F32C1).unwrap();
        assert!(matches!(
            a.copy_to_masked(&mut OutputArray::from(&mut fresh), &float_mask),
            Err(ArrayError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_set_to_masked() {
        let mut a = DenseArray::zeros(&[2, 2], ArrayType::U8C3).unwrap();
        let mask = DenseArray::from_slice(&[2, 2], &[0u8, 1, 0, 1]).unwrap();
        a.set_to_masked(Scalar::new(1.0, 2.0, 3.0, 0.0), &mask).unwrap();
        assert_eq!(a.at::<[u8; 3]>(&[0, 0]).unwrap(), [0, 0, 0]);
        assert_eq!(a.at::<[u8; 3]>(&[1, 1]).unwrap(), [1, 2, 3]);

        let per_channel = DenseArray::from_slice(&[2, 2], &[[1u8, 0, 1]; 4]).unwrap();
        a.set_to_masked(Scalar::all(9.0), &per_channel).unwrap();
        assert_eq!(a.at::<[u8; 3]>(&[0, 0]).unwrap(), [9, 0, 9]);
        assert_eq!(a.at::<[u8; 3]>(&[1, 1]).unwrap(), [9, 2, 9]);
    }

    #[test]
    fn test_from_diag() {
        let row = DenseArray::from_slice(&[1, 3], &[1i32, 2, 3]).unwrap();
        let d = DenseArray::from_diag(&row).unwrap();
        assert_eq!(d.size(), &[3, 3]);
        assert_eq!(d.to_vec::<i32>().unwrap(), vec![1, 0, 0, 0, 2, 0, 0, 0, 3]);
        assert_eq!(d.refcount(), 1);

        let m = DenseArray::from_slice(&[2, 2], &[5i32, 6, 7, 8]).unwrap();
        let col = m.col(1).unwrap();
        let d = DenseArray::from_diag(&col).unwrap();
        assert_eq!(d.to_vec::<i32>().unwrap(), vec![6, 0, 0, 8]);

        assert!(DenseArray::from_diag(&m).is_err());
    }
}
