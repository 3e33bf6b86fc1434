//! Array header: extents, byte strides and the packed tag.
//!
//! A header owns no memory. It describes how to walk a buffer:
//! the address of element `idx` is `data + Σ idx[i] * step[i]`.

use smallvec::SmallVec;

use crate::error::{ArrayError, Result};
use crate::tag::{ArrayType, TypeTag};

/// Largest supported number of dimensions.
pub const MAX_DIMS: usize = 32;

/// Inline storage for per-dimension values.
pub type Dims = SmallVec<[usize; 4]>;

/// Dimensions, extents, strides and tag of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayHeader {
    tag: TypeTag,
    size: Dims,
    step: Dims,
}

impl ArrayHeader {
    /// Header for a freshly allocated, gap-free array.
    pub fn new(sizes: &[usize], ty: ArrayType) -> Result<Self> {
        check_dims(sizes.len())?;
        let step = continuous_steps(sizes, ty.elem_size());
        let mut hdr = Self {
            tag: TypeTag::new(ty),
            size: Dims::from_slice(sizes),
            step,
        };
        hdr.update_continuity();
        Ok(hdr)
    }

    /// Header with caller-chosen strides.
    ///
    /// Strides must be non-increasing from outermost to innermost and the
    /// innermost stride must cover one element.
    pub fn with_steps(sizes: &[usize], steps: &[usize], ty: ArrayType) -> Result<Self> {
        check_dims(sizes.len())?;
        if steps.len() != sizes.len() {
            return Err(ArrayError::DimensionMismatch {
                expected: sizes.len(),
                actual: steps.len(),
            });
        }
        let esz = ty.elem_size();
        if steps[steps.len() - 1] < esz {
            return Err(ArrayError::ShapeMismatch {
                expected: esz,
                actual: steps[steps.len() - 1],
            });
        }
        if steps.windows(2).any(|w| w[0] < w[1]) {
            return Err(ArrayError::Unsupported("strides must be non-increasing"));
        }
        let mut hdr = Self {
            tag: TypeTag::new(ty),
            size: Dims::from_slice(sizes),
            step: Dims::from_slice(steps),
        };
        hdr.update_continuity();
        Ok(hdr)
    }

    /// Empty header (no dimensions, no data).
    pub(crate) fn empty() -> Self {
        Self {
            tag: TypeTag::new(ArrayType::U8C1),
            size: Dims::new(),
            step: Dims::new(),
        }
    }

    /// Number of dimensions.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> usize {
        self.size.len()
    }

    /// Extents.
    #[inline]
    #[must_use]
    pub fn size(&self) -> &[usize] {
        &self.size
    }

    /// Byte strides.
    #[inline]
    #[must_use]
    pub fn step(&self) -> &[usize] {
        &self.step
    }

    /// Packed tag.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Element type.
    #[inline]
    #[must_use]
    pub fn array_type(&self) -> ArrayType {
        self.tag.array_type()
    }

    /// Total number of elements.
    #[must_use]
    pub fn total(&self) -> usize {
        if self.size.is_empty() {
            0
        } else {
            self.size.iter().product()
        }
    }

    /// Bytes from the first element to the end of the last one.
    #[must_use]
    pub fn byte_extent(&self) -> usize {
        if self.total() == 0 {
            return 0;
        }
        self.size
            .iter()
            .zip(&self.step)
            .map(|(&n, &s)| (n - 1) * s)
            .sum::<usize>()
            + self.array_type().elem_size()
    }

    /// Byte offset of `idx` from the data pointer.
    pub fn offset_of(&self, idx: &[usize]) -> Result<usize> {
        if idx.len() != self.dims() {
            return Err(ArrayError::DimensionMismatch {
                expected: self.dims(),
                actual: idx.len(),
            });
        }
        let mut offset = 0;
        for (dim, ((&i, &n), &s)) in idx.iter().zip(&self.size).zip(&self.step).enumerate() {
            if i >= n {
                return Err(ArrayError::IndexOutOfRange {
                    dim,
                    index: i,
                    size: n,
                });
            }
            offset += i * s;
        }
        Ok(offset)
    }

    pub(crate) fn size_mut(&mut self) -> &mut Dims {
        &mut self.size
    }

    pub(crate) fn step_mut(&mut self) -> &mut Dims {
        &mut self.step
    }

    pub(crate) fn set_type(&mut self, ty: ArrayType) {
        self.tag = self.tag.with_type(ty);
    }

    pub(crate) fn set_submatrix(&mut self, on: bool) {
        self.tag.set_submatrix(on);
    }

    /// Recompute the continuity bit from extents and strides.
    ///
    /// Leading unit dimensions are skipped; every remaining outer stride must
    /// equal the span of the dimension inside it.
    pub(crate) fn update_continuity(&mut self) {
        let continuous = is_continuous_layout(&self.size, &self.step, self.array_type().elem_size());
        self.tag.set_continuous(continuous);
    }
}

/// Gap-free strides for `sizes`.
pub(crate) fn continuous_steps(sizes: &[usize], elem_size: usize) -> Dims {
    let mut step = Dims::from_elem(0, sizes.len());
    let mut acc = elem_size;
    for i in (0..sizes.len()).rev() {
        step[i] = acc;
        acc *= sizes[i].max(1);
    }
    step
}

pub(crate) fn is_continuous_layout(size: &[usize], step: &[usize], elem_size: usize) -> bool {
    let dims = size.len();
    if dims == 0 {
        return true;
    }
    let first = size.iter().position(|&n| n > 1).unwrap_or(dims);
    if first == dims {
        return true;
    }
    if step[dims - 1] != elem_size && size[dims - 1] > 1 {
        return false;
    }
    (first + 1..dims).all(|j| step[j] * size[j] == step[j - 1])
}

/// Visit the gap-free byte spans shared by `N` arrays of extents `size`.
///
/// Trailing dimensions are merged into one span for as long as every stride
/// set keeps them packed, so a continuous array yields a single span. `f`
/// receives the span's byte offset in each array and its length.
pub(crate) fn walk_spans<const N: usize>(
    size: &[usize],
    steps: [&[usize]; N],
    elem_size: usize,
    mut f: impl FnMut([usize; N], usize),
) {
    if size.is_empty() || size.contains(&0) {
        return;
    }
    let mut k = size.len();
    let mut span = elem_size;
    while k > 0 && (size[k - 1] == 1 || steps.iter().all(|st| st[k - 1] == span)) {
        span *= size[k - 1];
        k -= 1;
    }

    let mut counter = Dims::from_elem(0, k);
    loop {
        let mut offsets = [0usize; N];
        for (off, st) in offsets.iter_mut().zip(steps.iter()) {
            *off = counter.iter().zip(st.iter()).map(|(&c, &s)| c * s).sum();
        }
        f(offsets, span);

        let mut d = k;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            counter[d] += 1;
            if counter[d] < size[d] {
                break;
            }
            counter[d] = 0;
        }
    }
}

/// Visit the innermost rows shared by `N` arrays of extents `size` whose
/// elements may differ in width.
///
/// `f` receives the row's byte offset in each array and its element count;
/// elements inside a row are `step[dims - 1]` bytes apart in each array.
pub(crate) fn walk_rows<const N: usize>(
    size: &[usize],
    steps: [&[usize]; N],
    mut f: impl FnMut([usize; N], usize),
) {
    if size.is_empty() || size.contains(&0) {
        return;
    }
    let k = size.len() - 1;
    let mut counter = Dims::from_elem(0, k);
    loop {
        let mut offsets = [0usize; N];
        for (off, st) in offsets.iter_mut().zip(steps.iter()) {
            *off = counter.iter().zip(st.iter()).map(|(&c, &s)| c * s).sum();
        }
        f(offsets, size[k]);

        let mut d = k;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            counter[d] += 1;
            if counter[d] < size[d] {
                break;
            }
            counter[d] = 0;
        }
    }
}

fn check_dims(dims: usize) -> Result<()> {
    if dims == 0 || dims > MAX_DIMS {
        return Err(ArrayError::InvalidDims {
            dims,
            max: MAX_DIMS,
        });
    }
    Ok(())
}
