//! Element types and the packed header tag.
//!
//! An array's element type is a numeric [`Depth`] plus a channel count. The
//! header keeps it packed together with two status bits in a [`TypeTag`]:
//!
//! ```text
//!  31            16 15  14  13  12 11                3 2       0
//! ┌────────────────┬───┬───┬───────┬──────────────────┬─────────┐
//! │    reserved    │ C │ S │   -   │  channels - 1    │  depth  │
//! └────────────────┴───┴───┴───────┴──────────────────┴─────────┘
//!                    │   └─ submatrix: view of a larger allocation
//!                    └───── continuous: no padding between rows
//! ```
//!
//! The proxy layer keeps its own kind discriminator in a separate field
//! (see [`crate::proxy::ProxyKind`]); the reserved bits are only filled in
//! when a caller asks for the legacy packed form.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ArrayError, Result};

/// Maximum number of channels per element.
pub const MAX_CHANNELS: usize = 512;

/// Numeric kind of one channel value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    /// 8-bit unsigned.
    U8 = 0,
    /// 8-bit signed.
    I8 = 1,
    /// 16-bit unsigned.
    U16 = 2,
    /// 16-bit signed.
    I16 = 3,
    /// 32-bit signed.
    I32 = 4,
    /// 32-bit float.
    F32 = 5,
    /// 64-bit float.
    F64 = 6,
    /// 64-bit signed.
    I64 = 7,
}

impl Depth {
    /// All depths in code order.
    pub const ALL: [Depth; 8] = [
        Depth::U8,
        Depth::I8,
        Depth::U16,
        Depth::I16,
        Depth::I32,
        Depth::F32,
        Depth::F64,
        Depth::I64,
    ];

    /// Decode a 3-bit depth code.
    #[must_use]
    pub const fn from_code(code: u32) -> Depth {
        match code & 7 {
            0 => Depth::U8,
            1 => Depth::I8,
            2 => Depth::U16,
            3 => Depth::I16,
            4 => Depth::I32,
            5 => Depth::F32,
            6 => Depth::F64,
            _ => Depth::I64,
        }
    }

    /// The 3-bit depth code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Size of one channel value in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Depth::U8 | Depth::I8 => 1,
            Depth::U16 | Depth::I16 => 2,
            Depth::I32 | Depth::F32 => 4,
            Depth::F64 | Depth::I64 => 8,
        }
    }

    /// True for floating-point depths.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Depth::F32 | Depth::F64)
    }

    fn suffix(self) -> &'static str {
        match self {
            Depth::U8 => "8U",
            Depth::I8 => "8S",
            Depth::U16 => "16U",
            Depth::I16 => "16S",
            Depth::I32 => "32S",
            Depth::F32 => "32F",
            Depth::F64 => "64F",
            Depth::I64 => "64S",
        }
    }

    /// Read one channel value of this depth from the front of `bytes`.
    pub(crate) fn read_f64(self, bytes: &[u8]) -> f64 {
        fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&bytes[..N]);
            out
        }

        match self {
            Depth::U8 => f64::from(bytes[0]),
            Depth::I8 => f64::from(i8::from_ne_bytes(arr(bytes))),
            Depth::U16 => f64::from(u16::from_ne_bytes(arr(bytes))),
            Depth::I16 => f64::from(i16::from_ne_bytes(arr(bytes))),
            Depth::I32 => f64::from(i32::from_ne_bytes(arr(bytes))),
            Depth::I64 => i64::from_ne_bytes(arr(bytes)) as f64,
            Depth::F32 => f64::from(f32::from_ne_bytes(arr(bytes))),
            Depth::F64 => f64::from_ne_bytes(arr(bytes)),
        }
    }

    /// Write `value` saturated and rounded to this depth into `out`.
    pub(crate) fn write_saturating(self, value: f64, out: &mut [u8]) {
        fn clamp_round(v: f64, lo: f64, hi: f64) -> f64 {
            if v.is_nan() {
                0.0
            } else {
                v.round().clamp(lo, hi)
            }
        }

        match self {
            Depth::U8 => out[..1].copy_from_slice(&(clamp_round(value, 0.0, 255.0) as u8).to_ne_bytes()),
            Depth::I8 => {
                out[..1].copy_from_slice(&(clamp_round(value, -128.0, 127.0) as i8).to_ne_bytes());
            }
            Depth::U16 => {
                out[..2].copy_from_slice(&(clamp_round(value, 0.0, 65535.0) as u16).to_ne_bytes());
            }
            Depth::I16 => out[..2]
                .copy_from_slice(&(clamp_round(value, -32768.0, 32767.0) as i16).to_ne_bytes()),
            Depth::I32 => out[..4].copy_from_slice(
                &(clamp_round(value, f64::from(i32::MIN), f64::from(i32::MAX)) as i32).to_ne_bytes(),
            ),
            Depth::I64 => out[..8].copy_from_slice(
                &(clamp_round(value, i64::MIN as f64, i64::MAX as f64) as i64).to_ne_bytes(),
            ),
            Depth::F32 => out[..4].copy_from_slice(&(value as f32).to_ne_bytes()),
            Depth::F64 => out[..8].copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

/// Element type: a depth plus a channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayType {
    depth: Depth,
    channels: u16,
}

impl ArrayType {
    /// 8-bit unsigned, one channel.
    pub const U8C1: ArrayType = ArrayType::new(Depth::U8, 1);
    /// 8-bit unsigned, three channels.
    pub const U8C3: ArrayType = ArrayType::new(Depth::U8, 3);
    /// 16-bit signed, one channel.
    pub const I16C1: ArrayType = ArrayType::new(Depth::I16, 1);
    /// 32-bit signed, one channel.
    pub const I32C1: ArrayType = ArrayType::new(Depth::I32, 1);
    /// 32-bit float, one channel.
    pub const F32C1: ArrayType = ArrayType::new(Depth::F32, 1);
    /// 32-bit float, two channels.
    pub const F32C2: ArrayType = ArrayType::new(Depth::F32, 2);
    /// 64-bit float, one channel.
    pub const F64C1: ArrayType = ArrayType::new(Depth::F64, 1);

    /// Build a type.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is zero or exceeds [`MAX_CHANNELS`]; use
    /// [`ArrayType::try_new`] for untrusted input.
    #[must_use]
    pub const fn new(depth: Depth, channels: usize) -> Self {
        assert!(channels >= 1 && channels <= MAX_CHANNELS, "channel count out of range");
        Self {
            depth,
            channels: channels as u16,
        }
    }

    /// Build a type, reporting an invalid channel count as an error.
    pub fn try_new(depth: Depth, channels: usize) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(ArrayError::InvalidChannels(channels));
        }
        Ok(Self::new(depth, channels))
    }

    /// Decode the 12-bit type code.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        let code = code & TypeTag::TYPE_MASK;
        Self {
            depth: Depth::from_code(code),
            channels: ((code >> TypeTag::CN_SHIFT) + 1) as u16,
        }
    }

    /// The 12-bit type code: `depth | (channels - 1) << 3`.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self.depth.code() | ((self.channels as u32 - 1) << TypeTag::CN_SHIFT)
    }

    /// Channel depth.
    #[inline]
    #[must_use]
    pub const fn depth(self) -> Depth {
        self.depth
    }

    /// Number of channels.
    #[inline]
    #[must_use]
    pub const fn channels(self) -> usize {
        self.channels as usize
    }

    /// Size of one full element in bytes.
    #[inline]
    #[must_use]
    pub const fn elem_size(self) -> usize {
        self.depth.size() * self.channels as usize
    }

    /// Size of one channel value in bytes.
    #[inline]
    #[must_use]
    pub const fn elem_size1(self) -> usize {
        self.depth.size()
    }

    /// Same depth, different channel count.
    pub fn with_channels(self, channels: usize) -> Result<Self> {
        Self::try_new(self.depth, channels)
    }
}

impl fmt::Display for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}C{}", self.depth.suffix(), self.channels)
    }
}

/// Packed type code plus the submatrix and continuity bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(u32);

impl TypeTag {
    /// Mask of the type code bits.
    pub const TYPE_MASK: u32 = 0x0000_0FFF;
    /// Mask of the depth bits.
    pub const DEPTH_MASK: u32 = 7;
    /// Position of the channel bits.
    pub const CN_SHIFT: u32 = 3;
    /// Set when the header is a restricted view of a larger allocation.
    pub const SUBMATRIX_FLAG: u32 = 1 << 14;
    /// Set when rows follow each other without padding.
    pub const CONTINUOUS_FLAG: u32 = 1 << 15;
    /// Bits that belong to the tag; everything above is reserved.
    pub const VALID_MASK: u32 = Self::TYPE_MASK | Self::SUBMATRIX_FLAG | Self::CONTINUOUS_FLAG;

    /// Tag for a freshly allocated, continuous, non-view array.
    #[must_use]
    pub const fn new(ty: ArrayType) -> Self {
        Self(ty.code() | Self::CONTINUOUS_FLAG)
    }

    /// Decode a packed tag, rejecting set reserved bits.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::VALID_MASK != 0 {
            return Err(ArrayError::Unsupported("reserved tag bits are set"));
        }
        Ok(Self(bits))
    }

    /// The packed representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Element type.
    #[inline]
    #[must_use]
    pub const fn array_type(self) -> ArrayType {
        ArrayType::from_code(self.0)
    }

    /// Replace the element type, keeping the status bits.
    #[must_use]
    pub const fn with_type(self, ty: ArrayType) -> Self {
        Self((self.0 & !Self::TYPE_MASK) | ty.code())
    }

    /// Continuity bit.
    #[inline]
    #[must_use]
    pub const fn is_continuous(self) -> bool {
        self.0 & Self::CONTINUOUS_FLAG != 0
    }

    /// Submatrix bit.
    #[inline]
    #[must_use]
    pub const fn is_submatrix(self) -> bool {
        self.0 & Self::SUBMATRIX_FLAG != 0
    }

    pub(crate) fn set_continuous(&mut self, on: bool) {
        if on {
            self.0 |= Self::CONTINUOUS_FLAG;
        } else {
            self.0 &= !Self::CONTINUOUS_FLAG;
        }
    }

    pub(crate) fn set_submatrix(&mut self, on: bool) {
        if on {
            self.0 |= Self::SUBMATRIX_FLAG;
        } else {
            self.0 &= !Self::SUBMATRIX_FLAG;
        }
    }
}

/// Set of depths an output may keep when its type is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthMask(u8);

impl DepthMask {
    /// No depth accepted.
    pub const NONE: DepthMask = DepthMask(0);
    /// 8-bit unsigned.
    pub const U8: DepthMask = DepthMask(1 << 0);
    /// 8-bit signed.
    pub const I8: DepthMask = DepthMask(1 << 1);
    /// 16-bit unsigned.
    pub const U16: DepthMask = DepthMask(1 << 2);
    /// 16-bit signed.
    pub const I16: DepthMask = DepthMask(1 << 3);
    /// 32-bit signed.
    pub const I32: DepthMask = DepthMask(1 << 4);
    /// 32-bit float.
    pub const F32: DepthMask = DepthMask(1 << 5);
    /// 64-bit float.
    pub const F64: DepthMask = DepthMask(1 << 6);
    /// 64-bit signed.
    pub const I64: DepthMask = DepthMask(1 << 7);
    /// Every depth.
    pub const ALL: DepthMask = DepthMask(0xFF);
    /// Every depth except 8-bit signed.
    pub const ALL_BUT_I8: DepthMask = DepthMask(0xFF & !(1 << 1));
    /// Floating-point depths.
    pub const FLOAT: DepthMask = DepthMask((1 << 5) | (1 << 6));

    /// Mask containing exactly one depth.
    #[must_use]
    pub const fn of(depth: Depth) -> Self {
        DepthMask(1 << depth.code())
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: DepthMask) -> Self {
        DepthMask(self.0 | other.0)
    }

    /// Whether `depth` is in the mask.
    #[must_use]
    pub const fn contains(self, depth: Depth) -> bool {
        self.0 & (1 << depth.code()) != 0
    }
}

// ============================================================================
// Element trait
// ============================================================================

/// A plain numeric value of one [`Depth`].
///
/// # Safety
///
/// Implementors must be plain data with no padding and no invalid bit
/// patterns, of exactly `DEPTH.size()` bytes.
pub unsafe trait Primitive: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Depth of this type.
    const DEPTH: Depth;

    /// Lossy widening to f64.
    fn to_f64(self) -> f64;
}

/// A value that can be read from or written to an array element.
///
/// # Safety
///
/// Implementors must be plain data of exactly `CHANNELS * DEPTH.size()`
/// bytes, with alignment no larger than 8.
pub unsafe trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Depth of each channel.
    const DEPTH: Depth;
    /// Number of channels.
    const CHANNELS: usize;

    /// The array type this element maps to.
    #[must_use]
    fn array_type() -> ArrayType {
        ArrayType::new(Self::DEPTH, Self::CHANNELS)
    }
}

macro_rules! impl_primitive {
    ($($ty:ty => $depth:ident),* $(,)?) => {
        $(
            unsafe impl Primitive for $ty {
                const DEPTH: Depth = Depth::$depth;

                #[allow(clippy::cast_lossless, clippy::cast_precision_loss)]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }

            unsafe impl Element for $ty {
                const DEPTH: Depth = Depth::$depth;
                const CHANNELS: usize = 1;
            }
        )*
    };
}

impl_primitive! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    i32 => I32,
    f32 => F32,
    f64 => F64,
    i64 => I64,
}

macro_rules! impl_multichannel {
    ($($n:literal),*) => {
        $(
            unsafe impl<P: Primitive> Element for [P; $n] {
                const DEPTH: Depth = P::DEPTH;
                const CHANNELS: usize = $n;
            }
        )*
    };
}

impl_multichannel!(2, 3, 4);

/// View a slice of elements as raw bytes.
pub(crate) fn as_bytes<T: Element>(values: &[T]) -> &[u8] {
    // SAFETY: Element types are padding-free plain data.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

// ============================================================================
// Scalar
// ============================================================================

/// Up to four channel values used to fill or seed elements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scalar(pub [f64; 4]);

impl Scalar {
    /// Scalar with explicit channel values.
    #[must_use]
    pub const fn new(v0: f64, v1: f64, v2: f64, v3: f64) -> Self {
        Scalar([v0, v1, v2, v3])
    }

    /// Same value in every channel.
    #[must_use]
    pub const fn all(v: f64) -> Self {
        Scalar([v; 4])
    }

    /// True when every channel is positive zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| v.to_bits() == 0)
    }

    /// Encode as one element of `ty`, saturating each channel.
    ///
    /// Channels beyond the fourth are only representable by the zero scalar.
    pub fn to_element_bytes(&self, ty: ArrayType) -> Result<SmallVec<[u8; 32]>> {
        let cn = ty.channels();
        if cn > 4 {
            if self.is_zero() {
                return Ok(SmallVec::from_elem(0, ty.elem_size()));
            }
            return Err(ArrayError::InvalidChannels(cn));
        }
        let esz1 = ty.elem_size1();
        let mut out: SmallVec<[u8; 32]> = SmallVec::from_elem(0, ty.elem_size());
        for (c, chunk) in out.chunks_mut(esz1).enumerate() {
            ty.depth().write_saturating(self.0[c], chunk);
        }
        Ok(out)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar([v, 0.0, 0.0, 0.0])
    }
}
