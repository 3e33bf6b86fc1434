//! Erased-type arguments for array-processing routines.
//!
//! Algorithms take their inputs as [`InputArray`] and their outputs as
//! [`OutputArray`], whatever the caller actually holds: a dense array, a
//! sparse array, a list of dense arrays, a borrowed slice of elements or a
//! scalar. A proxy borrows the caller's object for one call and is never
//! stored.
//!
//! Inputs are read through [`InputArray::resolve_dense`], which aliases a
//! dense argument instead of copying it. Outputs are shaped through
//! [`OutputArray::ensure_shape`] before any write; a destination that
//! already has the requested extents and type is written in place.
//!
//! The proxy kind and the destination constraints are separate fields. Their
//! packed legacy form (`kind << KIND_SHIFT` plus two constraint bits) is only
//! produced on request.

use smallvec::smallvec;

use crate::dense::DenseArray;
use crate::error::{ArrayError, Result};
use crate::header::Dims;
use crate::sparse::SparseArray;
use crate::tag::{as_bytes, ArrayType, Depth, DepthMask, Element, Scalar};

/// Bit position of the kind in the packed legacy form.
pub const KIND_SHIFT: u32 = 16;
/// Mask of the kind bits in the packed legacy form.
pub const KIND_MASK: u32 = 31 << KIND_SHIFT;
/// Packed legacy bit for a fixed-type destination.
pub const FIXED_TYPE: u32 = 0x8000 << KIND_SHIFT;
/// Packed legacy bit for a fixed-size destination.
pub const FIXED_SIZE: u32 = 0x4000 << KIND_SHIFT;

/// What a proxy wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// Nothing; an optional argument that was not supplied.
    None,
    /// One dense array.
    Dense,
    /// A constant of up to four channels.
    Scalar,
    /// A borrowed slice of elements.
    Elements,
    /// A list of dense arrays.
    DenseSeq,
    /// One sparse array.
    Sparse,
}

impl ProxyKind {
    /// Legacy kind code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            ProxyKind::None => 0,
            ProxyKind::Dense => 1,
            ProxyKind::Scalar => 2,
            ProxyKind::Elements => 3,
            ProxyKind::DenseSeq => 5,
            ProxyKind::Sparse => 16,
        }
    }

    /// Kind code shifted into the packed legacy position.
    #[must_use]
    pub const fn legacy_bits(self) -> u32 {
        self.code() << KIND_SHIFT
    }

    /// Decode the kind from packed legacy bits.
    #[must_use]
    pub const fn from_legacy_bits(bits: u32) -> Option<ProxyKind> {
        match (bits & KIND_MASK) >> KIND_SHIFT {
            0 => Some(ProxyKind::None),
            1 => Some(ProxyKind::Dense),
            2 => Some(ProxyKind::Scalar),
            3 => Some(ProxyKind::Elements),
            5 => Some(ProxyKind::DenseSeq),
            16 => Some(ProxyKind::Sparse),
            _ => None,
        }
    }
}

/// Restrictions on how an output may be reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DestinationConstraints {
    /// The element type may not change.
    pub fixed_type: bool,
    /// The extents may not change.
    pub fixed_size: bool,
}

impl DestinationConstraints {
    /// Packed legacy constraint bits.
    #[must_use]
    pub const fn legacy_bits(self) -> u32 {
        let mut bits = 0;
        if self.fixed_type {
            bits |= FIXED_TYPE;
        }
        if self.fixed_size {
            bits |= FIXED_SIZE;
        }
        bits
    }
}

// ============================================================================
// Input
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum InputSource<'a> {
    None,
    Dense(&'a DenseArray),
    Sparse(&'a SparseArray),
    DenseSeq(&'a [DenseArray]),
    Elements {
        bytes: &'a [u8],
        ty: ArrayType,
        len: usize,
    },
    Scalar(Scalar),
}

/// A read-only array argument.
#[derive(Debug, Clone, Copy)]
pub struct InputArray<'a> {
    source: InputSource<'a>,
}

impl<'a> InputArray<'a> {
    /// An absent argument.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            source: InputSource::None,
        }
    }

    /// Wrap a borrowed slice of elements, read as a 1 x n array.
    #[must_use]
    pub fn from_elements<T: Element>(values: &'a [T]) -> Self {
        Self {
            source: InputSource::Elements {
                bytes: as_bytes(values),
                ty: T::array_type(),
                len: values.len(),
            },
        }
    }

    /// Wrap a constant, read as a 4 x 1 array of f64.
    #[must_use]
    pub const fn from_scalar(value: Scalar) -> Self {
        Self {
            source: InputSource::Scalar(value),
        }
    }

    /// What the proxy wraps.
    #[must_use]
    pub fn kind(&self) -> ProxyKind {
        match self.source {
            InputSource::None => ProxyKind::None,
            InputSource::Dense(_) => ProxyKind::Dense,
            InputSource::Sparse(_) => ProxyKind::Sparse,
            InputSource::DenseSeq(_) => ProxyKind::DenseSeq,
            InputSource::Elements { .. } => ProxyKind::Elements,
            InputSource::Scalar(_) => ProxyKind::Scalar,
        }
    }

    /// Extents of the whole argument. A list reports `[1, len]`.
    #[must_use]
    pub fn size(&self) -> Dims {
        match self.source {
            InputSource::None => Dims::new(),
            InputSource::Dense(m) => Dims::from_slice(m.size()),
            InputSource::Sparse(s) => s.size(),
            InputSource::DenseSeq(v) => smallvec![1, v.len()],
            InputSource::Elements { len, .. } => smallvec![1, len],
            InputSource::Scalar(_) => smallvec![4, 1],
        }
    }

    /// Extents of list entry `i`; other kinds only accept `i == 0`.
    pub fn size_at(&self, i: usize) -> Result<Dims> {
        match self.source {
            InputSource::DenseSeq(v) => Ok(Dims::from_slice(seq_entry(v, i)?.size())),
            _ if i == 0 => Ok(self.size()),
            _ => Err(ArrayError::IndexOutOfRange {
                dim: 0,
                index: i,
                size: 1,
            }),
        }
    }

    /// Element count of the whole argument.
    #[must_use]
    pub fn total(&self) -> usize {
        match self.source {
            InputSource::Dense(m) => m.total(),
            InputSource::DenseSeq(v) => v.len(),
            _ => {
                let size = self.size();
                if size.is_empty() {
                    0
                } else {
                    size.iter().product()
                }
            }
        }
    }

    /// Element count of list entry `i`.
    pub fn total_at(&self, i: usize) -> Result<usize> {
        Ok(self.size_at(i)?.iter().product())
    }

    /// Element type; `None` for an absent argument or an empty list.
    #[must_use]
    pub fn array_type(&self) -> Option<ArrayType> {
        match self.source {
            InputSource::None => None,
            InputSource::Dense(m) => Some(m.array_type()),
            InputSource::Sparse(s) => Some(s.array_type()),
            InputSource::DenseSeq(v) => v.first().map(DenseArray::array_type),
            InputSource::Elements { ty, .. } => Some(ty),
            InputSource::Scalar(_) => Some(ArrayType::F64C1),
        }
    }

    /// Element type of list entry `i`.
    pub fn array_type_at(&self, i: usize) -> Result<Option<ArrayType>> {
        match self.source {
            InputSource::DenseSeq(v) => Ok(Some(seq_entry(v, i)?.array_type())),
            _ => {
                self.size_at(i)?;
                Ok(self.array_type())
            }
        }
    }

    /// Channel depth.
    #[must_use]
    pub fn depth(&self) -> Option<Depth> {
        self.array_type().map(ArrayType::depth)
    }

    /// Channels per element.
    #[must_use]
    pub fn channels(&self) -> Option<usize> {
        self.array_type().map(ArrayType::channels)
    }

    /// True when there is nothing to read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self.source {
            InputSource::None => true,
            InputSource::Dense(m) => m.is_empty(),
            InputSource::Sparse(s) => s.dims() == 0,
            InputSource::DenseSeq(v) => v.is_empty(),
            InputSource::Elements { len, .. } => len == 0,
            InputSource::Scalar(_) => false,
        }
    }

    /// The argument as one dense array.
    ///
    /// A dense argument is aliased (its reference count goes up), not
    /// copied. Elements and scalars are copied into a new array. Sparse
    /// arguments and lists cannot be read this way.
    pub fn resolve_dense(&self) -> Result<DenseArray> {
        match self.source {
            InputSource::None => Ok(DenseArray::new()),
            InputSource::Dense(m) => Ok(m.clone()),
            InputSource::Elements { bytes, ty, len } => elements_array(bytes, ty, len),
            InputSource::Scalar(s) => DenseArray::from_slice(&[4, 1], &s.0),
            InputSource::DenseSeq(_) => Err(ArrayError::UnsupportedKind(
                "a list of arrays cannot be read as one dense array",
            )),
            InputSource::Sparse(_) => Err(ArrayError::UnsupportedKind(
                "a sparse array cannot be read as a dense array",
            )),
        }
    }

    /// Entry `i` of a list, or row `i` of a dense argument, as a view.
    pub fn resolve_dense_at(&self, i: usize) -> Result<DenseArray> {
        match self.source {
            InputSource::DenseSeq(v) => Ok(seq_entry(v, i)?.clone()),
            InputSource::Dense(m) => m.row(i),
            _ => Err(ArrayError::UnsupportedKind(
                "indexed access needs a list or a dense array",
            )),
        }
    }

    /// The argument as a list of dense arrays.
    ///
    /// A dense argument yields one view per row. Elements yield one 1 x cn
    /// single-channel array each, a scalar yields four 1 x 1 arrays.
    pub fn resolve_dense_sequence(&self) -> Result<Vec<DenseArray>> {
        match self.source {
            InputSource::None => Ok(Vec::new()),
            InputSource::DenseSeq(v) => Ok(v.to_vec()),
            InputSource::Dense(m) => {
                if m.dims() == 0 {
                    return Ok(Vec::new());
                }
                (0..m.size()[0]).map(|i| m.row(i)).collect()
            }
            InputSource::Elements { bytes, ty, len } => {
                let flat = elements_array(bytes, ty, len)?;
                (0..len)
                    .map(|i| {
                        flat.region(&[0..1, i..i + 1])?
                            .reshape(1, &[1, ty.channels()])?
                            .deep_clone()
                    })
                    .collect()
            }
            InputSource::Scalar(s) => s
                .0
                .iter()
                .map(|v| DenseArray::from_slice(&[1, 1], std::slice::from_ref(v)))
                .collect(),
            InputSource::Sparse(_) => Err(ArrayError::UnsupportedKind(
                "a sparse array cannot be read as a list of dense arrays",
            )),
        }
    }

    /// The wrapped sparse array.
    pub fn resolve_sparse(&self) -> Result<SparseArray> {
        match self.source {
            InputSource::Sparse(s) => Ok(s.clone()),
            _ => Err(ArrayError::UnsupportedKind("the argument is not sparse")),
        }
    }
}

impl<'a> From<&'a DenseArray> for InputArray<'a> {
    fn from(m: &'a DenseArray) -> Self {
        Self {
            source: InputSource::Dense(m),
        }
    }
}

impl<'a> From<&'a SparseArray> for InputArray<'a> {
    fn from(s: &'a SparseArray) -> Self {
        Self {
            source: InputSource::Sparse(s),
        }
    }
}

impl<'a> From<&'a [DenseArray]> for InputArray<'a> {
    fn from(v: &'a [DenseArray]) -> Self {
        Self {
            source: InputSource::DenseSeq(v),
        }
    }
}

impl<'a> From<&'a Vec<DenseArray>> for InputArray<'a> {
    fn from(v: &'a Vec<DenseArray>) -> Self {
        Self::from(v.as_slice())
    }
}

impl From<Scalar> for InputArray<'_> {
    fn from(s: Scalar) -> Self {
        Self::from_scalar(s)
    }
}

fn seq_entry(v: &[DenseArray], i: usize) -> Result<&DenseArray> {
    v.get(i).ok_or(ArrayError::IndexOutOfRange {
        dim: 0,
        index: i,
        size: v.len(),
    })
}

fn elements_array(bytes: &[u8], ty: ArrayType, len: usize) -> Result<DenseArray> {
    let mut m = DenseArray::zeros(&[1, len], ty)?;
    if !bytes.is_empty() {
        // SAFETY: the new array is continuous and holds exactly `bytes`.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), m.data_mut(), bytes.len()) };
    }
    Ok(m)
}

// ============================================================================
// Output
// ============================================================================

/// Parameters of [`OutputArray::create`].
#[derive(Debug, Clone, Copy)]
pub struct ShapeRequest<'s> {
    /// Requested extents.
    pub sizes: &'s [usize],
    /// Requested element type.
    pub ty: ArrayType,
    /// List entry to shape; `None` shapes the whole destination.
    pub index: Option<usize>,
    /// Accept an existing 2-D destination whose rows and columns are swapped.
    pub allow_transposed: bool,
    /// Depths a fixed-type destination may keep instead of `ty`'s depth.
    pub depth_mask: DepthMask,
}

impl<'s> ShapeRequest<'s> {
    /// Request `sizes` of type `ty` for the whole destination.
    #[must_use]
    pub const fn new(sizes: &'s [usize], ty: ArrayType) -> Self {
        Self {
            sizes,
            ty,
            index: None,
            allow_transposed: false,
            depth_mask: DepthMask::NONE,
        }
    }

    /// Shape list entry `i` instead.
    #[must_use]
    pub const fn at(mut self, i: usize) -> Self {
        self.index = Some(i);
        self
    }

    /// Accept a transposed 2-D destination.
    #[must_use]
    pub const fn transposed_ok(mut self) -> Self {
        self.allow_transposed = true;
        self
    }

    /// Depths a fixed-type destination may keep.
    #[must_use]
    pub const fn keep_depths(mut self, mask: DepthMask) -> Self {
        self.depth_mask = mask;
        self
    }
}

#[derive(Debug)]
enum OutputDest<'a> {
    None,
    Dense(&'a mut DenseArray),
    DenseSeq(&'a mut Vec<DenseArray>),
    Sparse(&'a mut SparseArray),
}

/// A writable array argument.
#[derive(Debug)]
pub struct OutputArray<'a> {
    dest: OutputDest<'a>,
    constraints: DestinationConstraints,
}

impl<'a> OutputArray<'a> {
    /// An output the caller does not want.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            dest: OutputDest::None,
            constraints: DestinationConstraints {
                fixed_type: false,
                fixed_size: false,
            },
        }
    }

    /// Forbid type changes.
    #[must_use]
    pub fn with_fixed_type(mut self) -> Self {
        self.constraints.fixed_type = true;
        self
    }

    /// Forbid extent changes.
    #[must_use]
    pub fn with_fixed_size(mut self) -> Self {
        self.constraints.fixed_size = true;
        self
    }

    /// What the proxy wraps.
    #[must_use]
    pub fn kind(&self) -> ProxyKind {
        match self.dest {
            OutputDest::None => ProxyKind::None,
            OutputDest::Dense(_) => ProxyKind::Dense,
            OutputDest::DenseSeq(_) => ProxyKind::DenseSeq,
            OutputDest::Sparse(_) => ProxyKind::Sparse,
        }
    }

    /// Whether the caller wants this output at all.
    #[must_use]
    pub fn needed(&self) -> bool {
        !matches!(self.dest, OutputDest::None)
    }

    /// Constraints on reshaping.
    #[must_use]
    pub fn constraints(&self) -> DestinationConstraints {
        self.constraints
    }

    /// Whether the type is fixed.
    #[must_use]
    pub fn fixed_type(&self) -> bool {
        self.constraints.fixed_type
    }

    /// Whether the extents are fixed.
    #[must_use]
    pub fn fixed_size(&self) -> bool {
        self.constraints.fixed_size
    }

    /// Packed legacy kind, constraint and type bits.
    #[must_use]
    pub fn legacy_flags(&self) -> u32 {
        let ty = match &self.dest {
            OutputDest::Dense(m) if m.dims() > 0 => m.array_type().code(),
            OutputDest::Sparse(s) if s.dims() > 0 => s.array_type().code(),
            _ => 0,
        };
        self.kind().legacy_bits() | self.constraints.legacy_bits() | ty
    }

    /// Read-only proxy over the same destination.
    #[must_use]
    pub fn as_input(&self) -> InputArray<'_> {
        match &self.dest {
            OutputDest::None => InputArray::none(),
            OutputDest::Dense(m) => InputArray::from(&**m),
            OutputDest::DenseSeq(v) => InputArray::from(v.as_slice()),
            OutputDest::Sparse(s) => InputArray::from(&**s),
        }
    }

    /// Shorthand for [`OutputArray::create`] on the whole destination.
    pub fn ensure_shape(&mut self, sizes: &[usize], ty: ArrayType) -> Result<()> {
        self.create(ShapeRequest::new(sizes, ty))
    }

    /// Shorthand for [`OutputArray::create`] on list entry `i`.
    pub fn ensure_shape_at(&mut self, i: usize, sizes: &[usize], ty: ArrayType) -> Result<()> {
        self.create(ShapeRequest::new(sizes, ty).at(i))
    }

    /// Make the destination match `req`, reallocating only when needed.
    ///
    /// A fixed-size destination must already have the requested extents and
    /// a fixed-type destination the requested type (or a depth admitted by
    /// `req.depth_mask` with the same channel count); otherwise the call
    /// fails and the destination is untouched.
    pub fn create(&mut self, req: ShapeRequest<'_>) -> Result<()> {
        let constraints = self.constraints;
        match &mut self.dest {
            OutputDest::None => Err(ArrayError::UnsupportedKind(
                "the output was not requested",
            )),
            OutputDest::Dense(m) => match req.index {
                None => create_dense(m, &req, constraints),
                Some(_) => Err(ArrayError::UnsupportedKind(
                    "a single dense output has no entries",
                )),
            },
            OutputDest::DenseSeq(v) => match req.index {
                None => resize_seq(v, &req, constraints),
                Some(i) => {
                    let len = v.len();
                    let m = v.get_mut(i).ok_or(ArrayError::IndexOutOfRange {
                        dim: 0,
                        index: i,
                        size: len,
                    })?;
                    create_dense(m, &req, constraints)
                }
            },
            OutputDest::Sparse(s) => {
                let ty = checked_type(s.dims() > 0, s.array_type(), &req, constraints)?;
                if constraints.fixed_size && s.size().as_slice() != req.sizes {
                    return Err(ArrayError::FixedSize {
                        requested: req.sizes.to_vec(),
                        actual: s.size().to_vec(),
                    });
                }
                if s.size().as_slice() == req.sizes && s.array_type() == ty {
                    return Ok(());
                }
                tracing::debug!(sizes = ?req.sizes, %ty, "reshaping sparse output");
                s.create(req.sizes, ty)
            }
        }
    }

    /// The dense destination.
    pub fn dense_mut(&mut self) -> Result<&mut DenseArray> {
        match &mut self.dest {
            OutputDest::Dense(m) => Ok(&mut **m),
            _ => Err(ArrayError::UnsupportedKind("the output is not a dense array")),
        }
    }

    /// Entry `i` of a list destination, or the dense destination for `i == 0`.
    pub fn dense_mut_at(&mut self, i: usize) -> Result<&mut DenseArray> {
        match &mut self.dest {
            OutputDest::DenseSeq(v) => {
                let len = v.len();
                v.get_mut(i).ok_or(ArrayError::IndexOutOfRange {
                    dim: 0,
                    index: i,
                    size: len,
                })
            }
            OutputDest::Dense(m) if i == 0 => Ok(&mut **m),
            _ => Err(ArrayError::UnsupportedKind(
                "indexed output access needs a list or a dense array",
            )),
        }
    }

    /// The sparse destination.
    pub fn sparse_mut(&mut self) -> Result<&mut SparseArray> {
        match &mut self.dest {
            OutputDest::Sparse(s) => Ok(&mut **s),
            _ => Err(ArrayError::UnsupportedKind("the output is not sparse")),
        }
    }

    /// Copy `src` into the destination, shaping it first.
    ///
    /// A list destination is rejected before anything is resized.
    pub fn assign(&mut self, src: &DenseArray) -> Result<()> {
        match &mut self.dest {
            OutputDest::DenseSeq(_) => Err(ArrayError::UnsupportedKind(
                "a list output is filled one entry at a time",
            )),
            OutputDest::Sparse(s) => {
                if self.constraints.fixed_size && s.dims() > 0 && s.size().as_slice() != src.size() {
                    return Err(ArrayError::FixedSize {
                        requested: src.size().to_vec(),
                        actual: s.size().to_vec(),
                    });
                }
                if self.constraints.fixed_type && s.dims() > 0 && s.array_type() != src.array_type() {
                    return Err(ArrayError::FixedType {
                        requested: src.array_type(),
                        actual: s.array_type(),
                    });
                }
                **s = SparseArray::from_dense(src)?;
                Ok(())
            }
            _ => {
                if src.dims() == 0 {
                    self.release();
                    return Ok(());
                }
                self.ensure_shape(src.size(), src.array_type())?;
                src.copy_bytes_into(self.dense_mut()?);
                Ok(())
            }
        }
    }

    /// Fill the destination with `value`.
    pub fn set_to(&mut self, value: Scalar) -> Result<()> {
        match &mut self.dest {
            OutputDest::None => Ok(()),
            OutputDest::Dense(m) => m.set_to(value),
            OutputDest::DenseSeq(v) => v.iter_mut().try_for_each(|m| m.set_to(value)),
            OutputDest::Sparse(_) => Err(ArrayError::UnsupportedKind(
                "a sparse output cannot be filled",
            )),
        }
    }

    /// Drop the destination's data.
    pub fn release(&mut self) {
        match &mut self.dest {
            OutputDest::None => {}
            OutputDest::Dense(m) => m.release(),
            OutputDest::DenseSeq(v) => v.clear(),
            OutputDest::Sparse(s) => s.release(),
        }
    }

    /// Empty the destination: zero rows for a dense array, release otherwise.
    pub fn clear(&mut self) -> Result<()> {
        if let OutputDest::Dense(m) = &mut self.dest {
            if self.constraints.fixed_size {
                return Err(ArrayError::FixedSize {
                    requested: Vec::new(),
                    actual: m.size().to_vec(),
                });
            }
            if m.dims() > 0 {
                return m.resize(0);
            }
            return Ok(());
        }
        self.release();
        Ok(())
    }
}

impl<'a> From<&'a mut DenseArray> for OutputArray<'a> {
    fn from(m: &'a mut DenseArray) -> Self {
        Self {
            dest: OutputDest::Dense(m),
            constraints: DestinationConstraints::default(),
        }
    }
}

impl<'a> From<&'a mut Vec<DenseArray>> for OutputArray<'a> {
    fn from(v: &'a mut Vec<DenseArray>) -> Self {
        Self {
            dest: OutputDest::DenseSeq(v),
            constraints: DestinationConstraints::default(),
        }
    }
}

impl<'a> From<&'a mut SparseArray> for OutputArray<'a> {
    fn from(s: &'a mut SparseArray) -> Self {
        Self {
            dest: OutputDest::Sparse(s),
            constraints: DestinationConstraints::default(),
        }
    }
}

/// The type to allocate, honouring a fixed-type destination.
fn checked_type(
    has_type: bool,
    current: ArrayType,
    req: &ShapeRequest<'_>,
    constraints: DestinationConstraints,
) -> Result<ArrayType> {
    if !constraints.fixed_type || !has_type || current == req.ty {
        return Ok(req.ty);
    }
    if req.ty.channels() == current.channels() && req.depth_mask.contains(current.depth()) {
        return Ok(current);
    }
    Err(ArrayError::FixedType {
        requested: req.ty,
        actual: current,
    })
}

fn create_dense(
    m: &mut DenseArray,
    req: &ShapeRequest<'_>,
    constraints: DestinationConstraints,
) -> Result<()> {
    if req.allow_transposed {
        if !m.is_continuous() && m.dims() > 0 {
            if constraints.fixed_type || constraints.fixed_size {
                return Err(ArrayError::NotContinuous(
                    "a fixed destination must be continuous to accept a transposed shape",
                ));
            }
            m.release();
        }
        if let ([rows, cols], [mr, mc]) = (req.sizes, m.size()) {
            if m.array_type() == req.ty && mr == cols && mc == rows && !m.is_empty() {
                return Ok(());
            }
        }
    }

    let ty = checked_type(m.dims() > 0, m.array_type(), req, constraints)?;
    if constraints.fixed_size && m.size() != req.sizes {
        return Err(ArrayError::FixedSize {
            requested: req.sizes.to_vec(),
            actual: m.size().to_vec(),
        });
    }
    if m.dims() > 0 && m.size() == req.sizes && m.array_type() == ty {
        return Ok(());
    }
    tracing::debug!(
        from = ?m.size(),
        to = ?req.sizes,
        %ty,
        aliases = m.refcount(),
        "reallocating dense output"
    );
    m.create(req.sizes, ty)
}

fn resize_seq(
    v: &mut Vec<DenseArray>,
    req: &ShapeRequest<'_>,
    constraints: DestinationConstraints,
) -> Result<()> {
    let len = match req.sizes {
        [rows, cols] if *rows == 1 || *cols == 1 || rows * cols == 0 => {
            if rows * cols > 0 {
                rows + cols - 1
            } else {
                0
            }
        }
        [n] => *n,
        _ => {
            return Err(ArrayError::Unsupported(
                "a list output is shaped by a 1 x n or n x 1 request",
            ))
        }
    };
    if constraints.fixed_size && len != v.len() {
        return Err(ArrayError::FixedSize {
            requested: vec![len],
            actual: vec![v.len()],
        });
    }
    v.resize_with(len, DenseArray::new);
    Ok(())
}

impl DenseArray {
    /// Copy into an output proxy, reshaping it unless it already matches.
    pub fn copy_to(&self, dst: &mut OutputArray<'_>) -> Result<()> {
        dst.assign(self)
    }
}
