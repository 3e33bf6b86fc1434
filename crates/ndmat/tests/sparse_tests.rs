//! Sparse array tests
//!
//! Tests for hash-backed sparse arrays including:
//! - Element insertion, lookup and erasure
//! - Hash reuse and rehashing
//! - Shared-handle semantics
//! - Conversion to and from dense arrays

use std::collections::HashMap;

use ndmat::{
    ArrayConfig, ArrayError, ArrayType, DenseArray, Depth, OutputArray, Scalar, SparseArray,
};

// ============================================================
// Element Tests
// ============================================================

mod element_tests {
    use super::*;

    #[test]
    fn test_scenario_accumulate_in_place() {
        let s = SparseArray::zeros(&[10, 10], ArrayType::I32C1).unwrap();
        *s.ref_mut::<i32>(&[3, 4]).unwrap() += 1;
        *s.ref_mut::<i32>(&[3, 4]).unwrap() += 1;
        assert_eq!(s.value::<i32>(&[3, 4]).unwrap(), 2);
        assert_eq!(s.nzcount(), 1);
    }

    #[test]
    fn test_value_of_missing_is_zero() {
        let s = SparseArray::zeros(&[5, 5, 5], ArrayType::F64C1).unwrap();
        assert_eq!(s.value::<f64>(&[1, 2, 3]).unwrap(), 0.0);
        assert_eq!(s.find::<f64>(&[1, 2, 3]).unwrap(), None);
        assert_eq!(s.nzcount(), 0);
    }

    #[test]
    fn test_erase() {
        let s = SparseArray::zeros(&[100], ArrayType::new(Depth::U16, 1)).unwrap();
        s.set(&[7], 70u16).unwrap();
        s.set(&[8], 80u16).unwrap();
        assert!(s.erase(&[7], None).unwrap());
        assert!(!s.erase(&[7], None).unwrap());
        assert_eq!(s.find::<u16>(&[7]).unwrap(), None);
        assert_eq!(s.value::<u16>(&[8]).unwrap(), 80);
        assert_eq!(s.nzcount(), 1);
    }

    #[test]
    fn test_precomputed_hash() {
        let s = SparseArray::zeros(&[16, 16], ArrayType::I32C1).unwrap();
        let h = s.hash(&[2, 9]).unwrap();
        {
            let mut bytes = s.ptr(&[2, 9], true, Some(h)).unwrap().unwrap();
            bytes.copy_from_slice(&41i32.to_ne_bytes());
        }
        assert!(s.ptr(&[9, 2], false, None).unwrap().is_none());
        assert_eq!(s.value::<i32>(&[2, 9]).unwrap(), 41);
        assert!(s.erase(&[2, 9], Some(h)).unwrap());
    }

    #[test]
    fn test_contract_violations() {
        let s = SparseArray::zeros(&[4, 4], ArrayType::F32C1).unwrap();
        assert!(matches!(
            s.set(&[4, 0], 1.0f32),
            Err(ArrayError::IndexOutOfRange { dim: 0, .. })
        ));
        assert!(matches!(
            s.set(&[0, 0], 1i32),
            Err(ArrayError::TypeMismatch { .. })
        ));
        assert!(s.find::<f32>(&[1]).is_err());
        assert!(SparseArray::zeros(&[], ArrayType::U8C1).is_err());
    }

    #[test]
    fn test_multichannel_elements() {
        let s = SparseArray::zeros(&[8, 8], ArrayType::F32C2).unwrap();
        s.set(&[1, 1], [0.5f32, -0.5]).unwrap();
        assert_eq!(s.value::<[f32; 2]>(&[1, 1]).unwrap(), [0.5, -0.5]);
        assert_eq!(s.channels(), 2);
    }
}

// ============================================================
// Hash Table Tests
// ============================================================

mod table_tests {
    use super::*;

    #[test]
    fn test_rehash_preserves_elements() {
        let s = SparseArray::zeros(&[1000, 1000], ArrayType::I32C1).unwrap();
        let initial = s.bucket_count();
        let mut expected = HashMap::new();
        for i in 0..500usize {
            let idx = [i * 7 % 1000, i * 13 % 1000];
            s.set(&idx, i as i32).unwrap();
            expected.insert(idx, i as i32);
        }
        assert!(s.bucket_count() > initial);
        assert_eq!(s.nzcount(), expected.len());
        for (idx, v) in &expected {
            assert_eq!(s.value::<i32>(idx).unwrap(), *v);
        }
    }

    #[test]
    fn test_iter_visits_every_element_once() {
        let s = SparseArray::zeros(&[50, 50], ArrayType::new(Depth::I64, 1)).unwrap();
        for i in 0..40usize {
            s.set(&[i, 49 - i], i as i64).unwrap();
        }
        s.erase(&[0, 49], None).unwrap();

        let mut seen: Vec<(usize, i64)> = s
            .iter::<i64>()
            .unwrap()
            .map(|(idx, v)| {
                assert_eq!(idx[0] + idx[1], 49);
                (idx[0], v)
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen.len(), 39);
        assert_eq!(seen[0], (1, 1));
        assert_eq!(seen[38], (39, 39));
    }

    #[test]
    fn test_erased_slots_are_reused() {
        let config = ArrayConfig {
            sparse_initial_buckets: 4,
            sparse_max_load_factor: 1,
            ..ArrayConfig::default()
        };
        let mut s = SparseArray::with_config(&config).unwrap();
        s.create(&[64], ArrayType::U8C1).unwrap();
        for i in 0..4 {
            s.set(&[i], 1u8).unwrap();
        }
        let buckets = s.bucket_count();
        for round in 0..10 {
            s.erase(&[round % 4], None).unwrap();
            s.set(&[round % 4], 2u8).unwrap();
        }
        assert_eq!(s.bucket_count(), buckets);
        assert_eq!(s.nzcount(), 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ArrayConfig {
            sparse_initial_buckets: 0,
            ..ArrayConfig::default()
        };
        assert!(SparseArray::with_config(&config).is_err());
        let d = DenseArray::zeros(&[2, 2], ArrayType::U8C1).unwrap();
        assert!(SparseArray::from_dense_with_config(&d, &config).is_err());
    }

    #[test]
    fn test_clear_keeps_shape() {
        let s = SparseArray::zeros(&[3, 3], ArrayType::U8C1).unwrap();
        s.set(&[1, 1], 1u8).unwrap();
        s.clear();
        assert_eq!(s.nzcount(), 0);
        assert_eq!(s.size().as_slice(), &[3, 3]);
    }
}

// ============================================================
// Sharing Tests
// ============================================================

mod sharing_tests {
    use super::*;

    #[test]
    fn test_clone_shares_elements() {
        let a = SparseArray::zeros(&[4, 4], ArrayType::I32C1).unwrap();
        let b = a.clone();
        b.set(&[0, 3], 3i32).unwrap();
        assert_eq!(a.value::<i32>(&[0, 3]).unwrap(), 3);
        assert_eq!(a.refcount(), 2);
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let a = SparseArray::zeros(&[4, 4], ArrayType::I32C1).unwrap();
        a.set(&[1, 1], 1i32).unwrap();
        let b = a.deep_clone();
        b.set(&[1, 1], 5i32).unwrap();
        assert_eq!(a.value::<i32>(&[1, 1]).unwrap(), 1);
        assert_eq!(b.refcount(), 1);
    }

    #[test]
    fn test_create_detaches_shared_handle() {
        let a = SparseArray::zeros(&[4, 4], ArrayType::I32C1).unwrap();
        a.set(&[2, 2], 2i32).unwrap();
        let mut b = a.clone();
        b.create(&[4, 4], ArrayType::I32C1).unwrap();
        assert_eq!(b.nzcount(), 0);
        assert_eq!(a.nzcount(), 1);
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn test_handles_across_threads() {
        let s = SparseArray::zeros(&[64, 64], ArrayType::I32C1).unwrap();
        std::thread::scope(|scope| {
            for t in 0..4usize {
                let s = s.clone();
                scope.spawn(move || {
                    for i in 0..16 {
                        *s.ref_mut::<i32>(&[t, i]).unwrap() += 1;
                    }
                });
            }
        });
        assert_eq!(s.nzcount(), 64);
        assert_eq!(s.value::<i32>(&[3, 15]).unwrap(), 1);
    }
}

// ============================================================
// Conversion Tests
// ============================================================

mod conversion_tests {
    use super::*;

    #[test]
    fn test_from_dense_skips_zeros() {
        let mut d = DenseArray::zeros(&[3, 4], ArrayType::F32C1).unwrap();
        d.set(&[0, 1], 1.5f32).unwrap();
        d.set(&[2, 3], -2.0f32).unwrap();
        d.set(&[1, 1], -0.0f32).unwrap();
        let s = SparseArray::from_dense(&d).unwrap();
        assert_eq!(s.nzcount(), 2);
        assert_eq!(s.value::<f32>(&[2, 3]).unwrap(), -2.0);
    }

    #[test]
    fn test_from_dense_view() {
        let data: Vec<u8> = (0..16).map(|v| (v % 3) as u8).collect();
        let d = DenseArray::from_slice(&[4, 4], &data).unwrap();
        let v = d.region(&[1..3, 1..3]).unwrap();
        let s = SparseArray::from_dense(&v).unwrap();
        assert_eq!(s.size().as_slice(), &[2, 2]);
        assert_eq!(s.to_dense().unwrap().to_vec::<u8>().unwrap(), v.to_vec::<u8>().unwrap());
    }

    #[test]
    fn test_copy_to_dense_reuses_matching_output() {
        let s = SparseArray::zeros(&[2, 3], ArrayType::I16C1).unwrap();
        s.set(&[1, 2], 12i16).unwrap();

        let mut d = DenseArray::filled(&[2, 3], ArrayType::I16C1, Scalar::all(9.0)).unwrap();
        let before = d.data();
        s.copy_to_dense(&mut OutputArray::from(&mut d)).unwrap();
        assert_eq!(d.data(), before);
        assert_eq!(d.to_vec::<i16>().unwrap(), vec![0, 0, 0, 0, 0, 12]);
    }

    #[test]
    fn test_five_channel_round_trip() {
        let ty = ArrayType::new(Depth::U8, 5);
        let s = SparseArray::zeros(&[2, 2], ty).unwrap();
        s.ptr(&[0, 1], true, None)
            .unwrap()
            .unwrap()
            .copy_from_slice(&[9u8, 8, 7, 6, 5]);

        let d = s.to_dense().unwrap();
        assert_eq!(d.array_type(), ty);
        let mut bytes = Vec::new();
        for idx in [[0usize, 0], [0, 1], [1, 0], [1, 1]] {
            let p = d.ptr(&idx).unwrap();
            // SAFETY: `p` addresses one 5-byte element of `d`.
            bytes.extend_from_slice(unsafe { std::slice::from_raw_parts(p, 5) });
        }
        assert_eq!(&bytes[5..10], &[9, 8, 7, 6, 5]);
        assert_eq!(bytes.iter().filter(|&&b| b != 0).count(), 5);

        let again = SparseArray::from_dense(&d).unwrap();
        assert_eq!(again.nzcount(), 1);
    }

    #[test]
    fn test_convert_to_other_depth() {
        let s = SparseArray::zeros(&[5, 5], ArrayType::I32C1).unwrap();
        s.set(&[1, 1], 3i32).unwrap();
        s.set(&[4, 0], -70_000i32).unwrap();
        let c = s.convert_to(Some(Depth::I16), 1.0).unwrap();
        assert_eq!(c.value::<i16>(&[1, 1]).unwrap(), 3);
        assert_eq!(c.value::<i16>(&[4, 0]).unwrap(), i16::MIN);
        assert_eq!(c.nzcount(), 2);
        assert_eq!(c.refcount(), 1);
    }

    #[test]
    fn test_copy_to_dense_reallocates() {
        let s = SparseArray::zeros(&[2, 2, 2], ArrayType::U8C1).unwrap();
        s.set(&[1, 1, 1], 1u8).unwrap();
        let mut d = DenseArray::zeros(&[5], ArrayType::F64C1).unwrap();
        s.copy_to_dense(&mut OutputArray::from(&mut d)).unwrap();
        assert_eq!(d.size(), &[2, 2, 2]);
        assert_eq!(d.at::<u8>(&[1, 1, 1]).unwrap(), 1);
    }
}
