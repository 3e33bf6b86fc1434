//! Property tests for ndmat
//!
//! These tests check the aliasing, reshape and sparse-table laws over
//! randomly generated shapes, regions and coordinates.

use std::collections::HashMap;

use ndmat::{ArrayConfig, ArrayType, DenseArray, SparseArray};
use proptest::prelude::*;

fn iota_i32(rows: usize, cols: usize) -> DenseArray {
    let data: Vec<i32> = (0..(rows * cols) as i32).collect();
    DenseArray::from_slice(&[rows, cols], &data).unwrap()
}

/// A shape plus one region inside it.
fn shape_and_region() -> impl Strategy<Value = (usize, usize, usize, usize, usize, usize)> {
    (1usize..12, 1usize..12).prop_flat_map(|(rows, cols)| {
        (Just(rows), Just(cols), 0..rows, 0..cols).prop_flat_map(|(rows, cols, r0, c0)| {
            (
                Just(rows),
                Just(cols),
                Just(r0),
                Just(c0),
                r0 + 1..=rows,
                c0 + 1..=cols,
            )
        })
    })
}

// ============================================================
// Dense aliasing properties
// ============================================================

proptest! {
    // deep_clone then mutate leaves the source byte-for-byte unchanged
    #[test]
    fn deep_clone_is_independent(rows in 1usize..10, cols in 1usize..10, v in any::<i32>()) {
        let m = iota_i32(rows, cols);
        let before = m.to_vec::<i32>().unwrap();
        let mut copy = m.deep_clone().unwrap();
        copy.set(&[rows - 1, cols - 1], v).unwrap();
        copy.set(&[0, 0], v).unwrap();
        prop_assert_eq!(m.to_vec::<i32>().unwrap(), before);
        prop_assert!(!copy.shares_storage_with(&m));
    }

    // writes through a region are visible through the parent
    #[test]
    fn region_writes_through((rows, cols, r0, c0, r1, c1) in shape_and_region(), v in any::<i32>()) {
        let m = iota_i32(rows, cols);
        let mut view = m.region(&[r0..r1, c0..c1]).unwrap();
        let (i, j) = (r1 - r0 - 1, c1 - c0 - 1);
        view.set(&[i, j], v).unwrap();
        prop_assert_eq!(m.at::<i32>(&[r0 + i, c0 + j]).unwrap(), v);
        prop_assert_eq!(m.refcount(), 2);

        let loc = view.locate_roi().unwrap();
        prop_assert_eq!(loc.offset, [r0, c0]);
        prop_assert_eq!(loc.whole_size, [rows, cols]);
    }

    // the refcount equals the number of live aliasing headers
    #[test]
    fn refcount_counts_aliases(n in 0usize..8) {
        let m = DenseArray::zeros(&[3, 3], ArrayType::U8C1).unwrap();
        let views: Vec<DenseArray> = (0..n).map(|i| m.row(i % 3).unwrap()).collect();
        prop_assert_eq!(m.refcount(), n + 1);
        drop(m);
        if let Some(first) = views.first() {
            prop_assert_eq!(first.refcount(), n);
        }
    }

    // a freshly created array is continuous; a row band stays continuous
    #[test]
    fn created_arrays_are_continuous(rows in 1usize..10, cols in 1usize..10, r in 0usize..10) {
        let m = DenseArray::zeros(&[rows, cols], ArrayType::F32C1).unwrap();
        prop_assert!(m.is_continuous());
        let r = r % rows;
        prop_assert!(m.row_range(r, rows).unwrap().is_continuous());
    }

    // reshape preserves total bytes and rejects any other total
    #[test]
    fn reshape_preserves_bytes(a in 1usize..6, b in 1usize..6, c in 1usize..6) {
        let m = DenseArray::zeros(&[a * b, c], ArrayType::I16C1).unwrap();
        let r = m.reshape(0, &[a, b * c]).unwrap();
        prop_assert_eq!(r.total() * r.elem_size(), m.total() * m.elem_size());
        prop_assert!(r.shares_storage_with(&m));
        prop_assert!(m.reshape(0, &[a * b * c + 1]).is_err());
    }

    // push_back keeps every earlier element and the n x 1 shape
    #[test]
    fn push_back_keeps_prefix(values in prop::collection::vec(any::<i64>(), 1..200)) {
        let mut v = DenseArray::new();
        for &x in &values {
            v.push_back(x).unwrap();
        }
        prop_assert_eq!(v.size(), &[values.len(), 1]);
        prop_assert!(v.capacity() >= values.len());
        prop_assert_eq!(v.to_vec::<i64>().unwrap(), values);
    }
}

// ============================================================
// Sparse table properties
// ============================================================

fn coords() -> impl Strategy<Value = Vec<(usize, usize, i32)>> {
    prop::collection::vec((0usize..64, 0usize..64, any::<i32>()), 0..300)
}

proptest! {
    // set then value reads back the last write at each key
    #[test]
    fn sparse_set_then_value(entries in coords()) {
        let s = SparseArray::zeros(&[64, 64], ArrayType::I32C1).unwrap();
        let mut model = HashMap::new();
        for &(i, j, v) in &entries {
            *s.ref_mut::<i32>(&[i, j]).unwrap() = v;
            model.insert((i, j), v);
        }
        prop_assert_eq!(s.nzcount(), model.len());
        for (&(i, j), &v) in &model {
            prop_assert_eq!(s.value::<i32>(&[i, j]).unwrap(), v);
        }
    }

    // erase removes exactly the erased keys
    #[test]
    fn sparse_erase_matches_model(entries in coords(), erase in prop::collection::vec((0usize..64, 0usize..64), 0..100)) {
        let s = SparseArray::zeros(&[64, 64], ArrayType::I32C1).unwrap();
        let mut model = HashMap::new();
        for &(i, j, v) in &entries {
            s.set(&[i, j], v).unwrap();
            model.insert((i, j), v);
        }
        for &(i, j) in &erase {
            let existed = s.erase(&[i, j], None).unwrap();
            prop_assert_eq!(existed, model.remove(&(i, j)).is_some());
            prop_assert_eq!(s.find::<i32>(&[i, j]).unwrap(), None);
        }
        prop_assert_eq!(s.nzcount(), model.len());
        let mut listed: Vec<((usize, usize), i32)> = s
            .iter::<i32>()
            .unwrap()
            .map(|(idx, v)| ((idx[0], idx[1]), v))
            .collect();
        listed.sort_unstable();
        let mut expected: Vec<((usize, usize), i32)> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(listed, expected);
    }

    // growing the table across several rehashes keeps every pair
    #[test]
    fn sparse_rehash_preserves_pairs(n in 1usize..400, seed in any::<u32>()) {
        let config = ArrayConfig {
            sparse_initial_buckets: 1,
            sparse_max_load_factor: 1,
            ..ArrayConfig::default()
        };
        let mut s = SparseArray::with_config(&config).unwrap();
        s.create(&[1 << 12, 1 << 12], ArrayType::I32C1).unwrap();
        let mut model = HashMap::new();
        for k in 0..n {
            let key = (k.wrapping_mul(2_654_435_761) ^ seed as usize) & 0xFFF;
            let idx = [key, k & 0xFFF];
            s.set(&idx, k as i32).unwrap();
            model.insert(idx, k as i32);
        }
        for (idx, v) in &model {
            prop_assert_eq!(s.value::<i32>(idx).unwrap(), *v);
        }
        prop_assert_eq!(s.nzcount(), model.len());
    }

    // dense -> sparse -> dense round trip
    #[test]
    fn sparse_dense_round_trip(values in prop::collection::vec(prop_oneof![Just(0i32), any::<i32>()], 1..64)) {
        let d = DenseArray::from_slice(&[values.len(), 1], &values).unwrap();
        let s = SparseArray::from_dense(&d).unwrap();
        prop_assert_eq!(s.nzcount(), values.iter().filter(|&&v| v != 0).count());
        prop_assert_eq!(s.to_dense().unwrap().to_vec::<i32>().unwrap(), values);
    }
}

// ============================================================
// Scenarios
// ============================================================

#[test]
fn scenario_dense_row_view_and_clone() {
    let mut m = DenseArray::zeros(&[4, 4], ArrayType::U8C1).unwrap();
    m.set(&[1, 1], 5u8).unwrap();
    let row = m.row(1).unwrap();
    // SAFETY: column 1 of the row view is in bounds
    let byte = unsafe { *row.data().add(1) };
    assert_eq!(byte, 5);

    let mut copy = m.deep_clone().unwrap();
    copy.set(&[1, 1], 9u8).unwrap();
    assert_eq!(m.at::<u8>(&[1, 1]).unwrap(), 5);
}

#[test]
fn scenario_sparse_accumulate() {
    let s = SparseArray::zeros(&[10, 10], ArrayType::I32C1).unwrap();
    for _ in 0..2 {
        *s.ref_mut::<i32>(&[3, 4]).unwrap() += 1;
    }
    assert_eq!(s.value::<i32>(&[3, 4]).unwrap(), 2);
    assert_eq!(s.nzcount(), 1);
}
