//! Hash-backed sparse n-dimensional arrays.
//!
//! Only elements that have been written exist. Each one is a node in an
//! index-based arena: its coordinates live in a coordinate pool, its value in
//! an 8-byte aligned value pool, and its `next` link threads it either into
//! a bucket chain of the hash table or, once erased, into the free list.
//!
//! ```text
//!   buckets            nodes (arena)
//!  ┌──────┐         ┌──────┬──────┬──────┬──────┐
//!  │  0 ──┼────────►│ n0   │ n1   │ n2   │ n3   │
//!  │  1   │  NIL    │ next─┼──┐   │ next │ free │
//!  │  2 ──┼─────┐   └──────┴──┼───┴──▲───┴──────┘
//!  │  3   │     └─────────────┼──────┘
//!  └──────┘                   └──► n3 ──► NIL
//! ```
//!
//! Lookups compare full coordinate tuples, never hash values alone. The
//! table doubles once the number of live nodes exceeds the configured load
//! factor times the bucket count; relinking reuses each node's stored hash.
//!
//! Iteration follows bucket and chain order. It is neither coordinate order
//! nor insertion order, and it changes whenever the table is rehashed.

use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedRwLockWriteGuard, RwLock, RwLockWriteGuard};

use crate::config::ArrayConfig;
use crate::dense::DenseArray;
use crate::error::{ArrayError, Result};
use crate::header::{Dims, MAX_DIMS};
use crate::proxy::OutputArray;
use crate::tag::{ArrayType, Depth, Element};

/// Largest supported number of sparse dimensions.
pub const MAX_DIM: usize = MAX_DIMS;

const HASH_SCALE: usize = 0x5bd1_e995;
const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    hash: usize,
    next: usize,
}

/// The shared state behind a [`SparseArray`].
#[derive(Clone)]
pub struct SparseStorage {
    ty: ArrayType,
    size: Dims,
    nodes: Vec<Node>,
    coords: Vec<usize>,
    values: Vec<u64>,
    words: usize,
    buckets: Vec<usize>,
    free_head: usize,
    nzcount: usize,
    initial_buckets: usize,
    max_load: usize,
}

impl SparseStorage {
    fn new(sizes: &[usize], ty: ArrayType, config: &ArrayConfig) -> Self {
        Self {
            ty,
            size: Dims::from_slice(sizes),
            nodes: Vec::new(),
            coords: Vec::new(),
            values: Vec::new(),
            words: ty.elem_size().div_ceil(8),
            buckets: vec![NIL; config.sparse_initial_buckets],
            free_head: NIL,
            nzcount: 0,
            initial_buckets: config.sparse_initial_buckets,
            max_load: config.sparse_max_load_factor,
        }
    }

    fn dims(&self) -> usize {
        self.size.len()
    }

    fn config(&self) -> ArrayConfig {
        ArrayConfig {
            sparse_initial_buckets: self.initial_buckets,
            sparse_max_load_factor: self.max_load,
            ..ArrayConfig::default()
        }
    }

    fn hash(&self, idx: &[usize]) -> usize {
        let mut h = idx.first().copied().unwrap_or(0);
        for &i in idx.iter().skip(1) {
            h = h.wrapping_mul(HASH_SCALE).wrapping_add(i);
        }
        h ^= h >> 16;
        h = h.wrapping_mul(HASH_SCALE);
        h ^ (h >> 13)
    }

    fn check_idx(&self, idx: &[usize]) -> Result<()> {
        if self.dims() == 0 {
            return Err(ArrayError::InvalidDims {
                dims: 0,
                max: MAX_DIM,
            });
        }
        if idx.len() != self.dims() {
            return Err(ArrayError::DimensionMismatch {
                expected: self.dims(),
                actual: idx.len(),
            });
        }
        for (dim, (&i, &n)) in idx.iter().zip(&self.size).enumerate() {
            if i >= n {
                return Err(ArrayError::IndexOutOfRange {
                    dim,
                    index: i,
                    size: n,
                });
            }
        }
        Ok(())
    }

    fn node_coords(&self, slot: usize) -> &[usize] {
        let d = self.dims();
        &self.coords[slot * d..(slot + 1) * d]
    }

    fn find_slot(&self, idx: &[usize], hash: usize) -> Option<usize> {
        let mut cur = self.buckets[hash & (self.buckets.len() - 1)];
        while cur != NIL {
            let node = self.nodes[cur];
            if node.hash == hash && self.node_coords(cur) == idx {
                return Some(cur);
            }
            cur = node.next;
        }
        None
    }

    fn value_bytes(&self, slot: usize) -> &[u8] {
        let words = &self.values[slot * self.words..(slot + 1) * self.words];
        // SAFETY: u64 words reinterpret as bytes; `elem_size <= words * 8`.
        unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<u8>(), self.ty.elem_size()) }
    }

    fn value_bytes_mut(&mut self, slot: usize) -> &mut [u8] {
        let esz = self.ty.elem_size();
        let words = &mut self.values[slot * self.words..(slot + 1) * self.words];
        // SAFETY: as in `value_bytes`.
        unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), esz) }
    }

    fn insert(&mut self, idx: &[usize], hash: usize) -> usize {
        let d = self.dims();
        let slot = if self.free_head == NIL {
            self.nodes.push(Node { hash, next: NIL });
            self.coords.extend_from_slice(idx);
            self.values.resize(self.values.len() + self.words, 0);
            self.nodes.len() - 1
        } else {
            let slot = self.free_head;
            self.free_head = self.nodes[slot].next;
            self.nodes[slot] = Node { hash, next: NIL };
            self.coords[slot * d..(slot + 1) * d].copy_from_slice(idx);
            self.values[slot * self.words..(slot + 1) * self.words].fill(0);
            slot
        };

        self.nzcount += 1;
        if self.nzcount > self.buckets.len() * self.max_load {
            self.rehash((self.buckets.len() * 2).max(8));
        }
        let b = hash & (self.buckets.len() - 1);
        self.nodes[slot].next = self.buckets[b];
        self.buckets[b] = slot;
        slot
    }

    fn rehash(&mut self, new_len: usize) {
        tracing::debug!(
            from = self.buckets.len(),
            to = new_len,
            nzcount = self.nzcount,
            "rehashing sparse array"
        );
        let old = std::mem::replace(&mut self.buckets, vec![NIL; new_len]);
        let mask = new_len - 1;
        for head in old {
            let mut cur = head;
            while cur != NIL {
                let next = self.nodes[cur].next;
                let b = self.nodes[cur].hash & mask;
                self.nodes[cur].next = self.buckets[b];
                self.buckets[b] = cur;
                cur = next;
            }
        }
    }

    fn erase(&mut self, idx: &[usize], hash: usize) -> bool {
        let b = hash & (self.buckets.len() - 1);
        let mut prev = NIL;
        let mut cur = self.buckets[b];
        while cur != NIL {
            let node = self.nodes[cur];
            if node.hash == hash && self.node_coords(cur) == idx {
                if prev == NIL {
                    self.buckets[b] = node.next;
                } else {
                    self.nodes[prev].next = node.next;
                }
                self.nodes[cur].next = self.free_head;
                self.free_head = cur;
                self.nzcount -= 1;
                return true;
            }
            prev = cur;
            cur = node.next;
        }
        false
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.coords.clear();
        self.values.clear();
        self.buckets = vec![NIL; self.initial_buckets];
        self.free_head = NIL;
        self.nzcount = 0;
    }

    /// Live slots in bucket and chain order.
    fn live_slots(&self) -> Vec<usize> {
        let mut slots = Vec::with_capacity(self.nzcount);
        for &head in &self.buckets {
            let mut cur = head;
            while cur != NIL {
                slots.push(cur);
                cur = self.nodes[cur].next;
            }
        }
        slots
    }
}

impl fmt::Debug for SparseStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseStorage")
            .field("type", &self.ty)
            .field("size", &self.size)
            .field("nzcount", &self.nzcount)
            .field("buckets", &self.buckets.len())
            .field("pool", &self.nodes.len())
            .finish()
    }
}

/// A shared handle to a sparse array.
///
/// `Clone` gives another handle to the same elements; use
/// [`SparseArray::deep_clone`] for an independent copy. The storage is
/// guarded by a read-write lock, so handles may be used from several threads.
///
/// # Element guards
///
/// [`SparseArray::ref_mut`] and [`SparseArray::ptr`] return a write guard.
/// While it is alive every other call on this array, through any handle,
/// waits for the lock, and a call made on the thread that holds the guard
/// never returns. Drop the guard before the next call:
///
/// ```
/// use ndmat::{ArrayType, SparseArray};
///
/// let s = SparseArray::zeros(&[4, 4], ArrayType::I32C1)?;
/// {
///     let mut v = s.ref_mut::<i32>(&[1, 2])?;
///     *v += 3;
///     // `s.nzcount()` here would wait on the guard forever
/// }
/// assert_eq!(s.nzcount(), 1);
///
/// // single statements drop the guard at the semicolon
/// *s.ref_mut::<i32>(&[1, 2])? += 1;
/// assert_eq!(s.value::<i32>(&[1, 2])?, 4);
/// # Ok::<(), ndmat::ArrayError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SparseArray {
    inner: Arc<RwLock<SparseStorage>>,
}

impl Default for SparseArray {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseArray {
    /// An empty array with no dimensions.
    #[must_use]
    pub fn new() -> Self {
        Self::unchecked(&ArrayConfig::default())
    }

    /// An empty array whose hash table follows `config`.
    ///
    /// Fails if `config` does not pass [`ArrayConfig::validate`].
    pub fn with_config(config: &ArrayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::unchecked(config))
    }

    fn unchecked(config: &ArrayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SparseStorage::new(&[], ArrayType::U8C1, config))),
        }
    }

    /// A sparse array with extents `sizes` and element type `ty`.
    pub fn zeros(sizes: &[usize], ty: ArrayType) -> Result<Self> {
        let mut arr = Self::new();
        arr.create(sizes, ty)?;
        Ok(arr)
    }

    /// Reset to extents `sizes` and type `ty` with no elements.
    ///
    /// When this is the only handle and the shape already matches, the table
    /// is cleared in place. Otherwise this handle moves to fresh storage and
    /// other handles keep the old elements.
    pub fn create(&mut self, sizes: &[usize], ty: ArrayType) -> Result<()> {
        if sizes.is_empty() || sizes.len() > MAX_DIM {
            return Err(ArrayError::InvalidDims {
                dims: sizes.len(),
                max: MAX_DIM,
            });
        }
        if Arc::strong_count(&self.inner) == 1 {
            let mut s = self.inner.write();
            if s.ty == ty && s.size.as_slice() == sizes {
                s.clear();
                return Ok(());
            }
        }
        let config = self.config();
        self.inner = Arc::new(RwLock::new(SparseStorage::new(sizes, ty, &config)));
        Ok(())
    }

    fn config(&self) -> ArrayConfig {
        self.inner.read().config()
    }

    /// Detach this handle and leave it empty.
    pub fn release(&mut self) {
        let config = self.config();
        *self = Self::unchecked(&config);
    }

    /// Independent copy of every element.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            inner: Arc::new(RwLock::new(self.inner.read().clone())),
        }
    }

    /// Remove every element, keeping extents and type.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Number of handles sharing this storage.
    #[must_use]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.inner.read().dims()
    }

    /// Extents.
    #[must_use]
    pub fn size(&self) -> Dims {
        self.inner.read().size.clone()
    }

    /// Element type.
    #[must_use]
    pub fn array_type(&self) -> ArrayType {
        self.inner.read().ty
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

    /// Number of stored elements.
    #[must_use]
    pub fn nzcount(&self) -> usize {
        self.inner.read().nzcount
    }

    /// Current bucket count.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Hash of a coordinate tuple, reusable by `ptr` and `erase`.
    pub fn hash(&self, idx: &[usize]) -> Result<usize> {
        let s = self.inner.read();
        s.check_idx(idx)?;
        Ok(s.hash(idx))
    }

    fn check_type<T: Element>(ty: ArrayType) -> Result<()> {
        if T::array_type() != ty {
            return Err(ArrayError::TypeMismatch {
                requested: T::array_type(),
                actual: ty,
            });
        }
        Ok(())
    }

    /// Value bytes of element `idx`.
    ///
    /// Absent elements yield `None` unless `create_missing` is set, in which
    /// case a zeroed element is inserted. `hash` may carry a value from
    /// [`SparseArray::hash`].
    pub fn ptr(
        &self,
        idx: &[usize],
        create_missing: bool,
        hash: Option<usize>,
    ) -> Result<Option<MappedRwLockWriteGuard<'_, [u8]>>> {
        let mut s = self.inner.write();
        s.check_idx(idx)?;
        let h = hash.unwrap_or_else(|| s.hash(idx));
        let slot = match s.find_slot(idx, h) {
            Some(slot) => slot,
            None if create_missing => s.insert(idx, h),
            None => return Ok(None),
        };
        Ok(Some(RwLockWriteGuard::map(s, |s| s.value_bytes_mut(slot))))
    }

    /// Read element `idx` if it exists.
    pub fn find<T: Element>(&self, idx: &[usize]) -> Result<Option<T>> {
        let s = self.inner.read();
        Self::check_type::<T>(s.ty)?;
        s.check_idx(idx)?;
        let h = s.hash(idx);
        Ok(s.find_slot(idx, h).map(|slot| {
            // SAFETY: the slot holds exactly one `T`.
            unsafe { s.value_bytes(slot).as_ptr().cast::<T>().read_unaligned() }
        }))
    }

    /// Read element `idx`, or `T::default()` if it does not exist.
    pub fn value<T: Element>(&self, idx: &[usize]) -> Result<T> {
        Ok(self.find(idx)?.unwrap_or_default())
    }

    /// Mutable reference to element `idx`, inserting a zero if absent.
    pub fn ref_mut<T: Element>(&self, idx: &[usize]) -> Result<MappedRwLockWriteGuard<'_, T>> {
        let mut s = self.inner.write();
        Self::check_type::<T>(s.ty)?;
        s.check_idx(idx)?;
        let h = s.hash(idx);
        let slot = match s.find_slot(idx, h) {
            Some(slot) => slot,
            None => s.insert(idx, h),
        };
        Ok(RwLockWriteGuard::map(s, |s| {
            let bytes = s.value_bytes_mut(slot);
            // SAFETY: value slots are 8-byte aligned and `Element` types
            // need no more; the slot holds exactly one `T`.
            unsafe { &mut *bytes.as_mut_ptr().cast::<T>() }
        }))
    }

    /// Store `value` at `idx`.
    pub fn set<T: Element>(&self, idx: &[usize], value: T) -> Result<()> {
        *self.ref_mut::<T>(idx)? = value;
        Ok(())
    }

    /// Remove element `idx`. Returns whether it existed.
    pub fn erase(&self, idx: &[usize], hash: Option<usize>) -> Result<bool> {
        let mut s = self.inner.write();
        s.check_idx(idx)?;
        let h = hash.unwrap_or_else(|| s.hash(idx));
        Ok(s.erase(idx, h))
    }

    /// Snapshot of every stored element in bucket order.
    ///
    /// The order is unspecified and changes after a rehash.
    pub fn iter<T: Element>(&self) -> Result<impl Iterator<Item = (Dims, T)>> {
        let s = self.inner.read();
        Self::check_type::<T>(s.ty)?;
        let entries: Vec<(Dims, T)> = s
            .live_slots()
            .into_iter()
            .map(|slot| {
                // SAFETY: as in `find`.
                let value = unsafe { s.value_bytes(slot).as_ptr().cast::<T>().read_unaligned() };
                (Dims::from_slice(s.node_coords(slot)), value)
            })
            .collect();
        Ok(entries.into_iter())
    }

    /// Copy with every stored value multiplied by `alpha` and converted to
    /// `depth` (`None` keeps the depth), saturating.
    ///
    /// Every stored element is kept, including ones that become zero.
    pub fn convert_to(&self, depth: Option<Depth>, alpha: f64) -> Result<SparseArray> {
        let s = self.inner.read();
        let config = s.config();
        if s.dims() == 0 {
            return Ok(Self::unchecked(&config));
        }
        let src_depth = s.ty.depth();
        let ty = ArrayType::try_new(depth.unwrap_or(src_depth), s.ty.channels())?;
        let mut out = SparseStorage::new(&s.size, ty, &config);
        for slot in s.live_slots() {
            let dst_slot = out.insert(s.node_coords(slot), s.nodes[slot].hash);
            let src = s.value_bytes(slot);
            let dst = out.value_bytes_mut(dst_slot);
            for (a, b) in src
                .chunks_exact(src_depth.size())
                .zip(dst.chunks_exact_mut(ty.depth().size()))
            {
                ty.depth().write_saturating(src_depth.read_f64(a) * alpha, b);
            }
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(out)),
        })
    }

    /// Sparse copy of the non-zero elements of `src`.
    pub fn from_dense(src: &DenseArray) -> Result<Self> {
        Self::from_dense_with_config(src, &ArrayConfig::default())
    }

    /// As [`SparseArray::from_dense`], with an explicit table configuration.
    pub fn from_dense_with_config(src: &DenseArray, config: &ArrayConfig) -> Result<Self> {
        let mut out = Self::with_config(config)?;
        out.create(src.size(), src.array_type())?;
        if src.is_empty() {
            return Ok(out);
        }
        let depth = src.depth();
        let esz = src.elem_size();
        let mut s = out.inner.write();
        let mut idx = Dims::from_elem(0, src.dims());
        loop {
            let p = src.ptr(&idx)?;
            // SAFETY: `p` addresses one whole element of `src`.
            let bytes = unsafe { std::slice::from_raw_parts(p, esz) };
            if is_nonzero(bytes, depth) {
                let h = s.hash(&idx);
                let slot = s.insert(&idx, h);
                s.value_bytes_mut(slot).copy_from_slice(bytes);
            }
            if !advance(&mut idx, src.size()) {
                break;
            }
        }
        drop(s);
        Ok(out)
    }

    /// Dense copy with absent elements set to zero.
    pub fn to_dense(&self) -> Result<DenseArray> {
        let mut out = DenseArray::new();
        self.write_dense(&mut out)?;
        Ok(out)
    }

    /// Write a dense copy into `dst`, reallocating it as needed.
    pub fn copy_to_dense(&self, dst: &mut OutputArray<'_>) -> Result<()> {
        let (size, ty) = {
            let s = self.inner.read();
            (s.size.clone(), s.ty)
        };
        if size.is_empty() {
            dst.release();
            return Ok(());
        }
        dst.ensure_shape(&size, ty)?;
        self.write_dense(dst.dense_mut()?)
    }

    fn write_dense(&self, dst: &mut DenseArray) -> Result<()> {
        let s = self.inner.read();
        if s.dims() == 0 {
            dst.release();
            return Ok(());
        }
        dst.create(&s.size, s.ty)?;
        dst.fill_zero();
        let esz = s.ty.elem_size();
        for slot in s.live_slots() {
            let p = dst.ptr_mut(s.node_coords(slot))?;
            // SAFETY: `p` addresses one whole element of `dst`.
            unsafe { std::ptr::copy_nonoverlapping(s.value_bytes(slot).as_ptr(), p, esz) };
        }
        Ok(())
    }
}

fn is_nonzero(bytes: &[u8], depth: Depth) -> bool {
    match depth {
        Depth::F32 => bytes
            .chunks_exact(4)
            .any(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) != 0.0),
        Depth::F64 => bytes.chunks_exact(8).any(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_ne_bytes(b) != 0.0
        }),
        _ => bytes.iter().any(|&b| b != 0),
    }
}

/// Row-major odometer step. Returns false after the last index.
fn advance(idx: &mut [usize], size: &[usize]) -> bool {
    for d in (0..idx.len()).rev() {
        idx[d] += 1;
        if idx[d] < size[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}
