//! Tuning knobs for array storage.

use ndmat_alloc::Alignment;
use serde::{Deserialize, Serialize};

use crate::error::{ArrayError, Result};

/// Configuration shared by dense and sparse arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayConfig {
    /// Bucket count of a freshly created sparse hash table. Power of two.
    pub sparse_initial_buckets: usize,
    /// Live nodes per bucket that trigger a rehash.
    pub sparse_max_load_factor: usize,
    /// Alignment of dense buffers.
    pub alignment: Alignment,
    /// Smallest buffer `reserve` will allocate, in bytes.
    pub min_reserve_bytes: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            sparse_initial_buckets: 8,
            sparse_max_load_factor: 3,
            alignment: Alignment::Simd128,
            min_reserve_bytes: 64,
        }
    }
}

impl ArrayConfig {
    /// Check the configuration for values the containers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.sparse_initial_buckets.is_power_of_two() {
            return Err(ArrayError::Unsupported(
                "sparse bucket count must be a power of two",
            ));
        }
        if self.sparse_max_load_factor == 0 {
            return Err(ArrayError::Unsupported("sparse load factor must be non-zero"));
        }
        Ok(())
    }

    /// Rows to reserve when an append overflows `rows` of capacity.
    #[must_use]
    pub fn grown_rows(rows: usize) -> usize {
        (rows + 1).max((rows * 3 + 1) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArrayConfig::default();
        assert_eq!(config.sparse_initial_buckets, 8);
        assert_eq!(config.sparse_max_load_factor, 3);
        assert_eq!(config.alignment.as_usize(), 16);
        assert_eq!(config.min_reserve_bytes, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_buckets() {
        let config = ArrayConfig {
            sparse_initial_buckets: 12,
            ..ArrayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ArrayConfig {
            sparse_max_load_factor: 0,
            ..ArrayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grown_rows() {
        assert_eq!(ArrayConfig::grown_rows(0), 1);
        assert_eq!(ArrayConfig::grown_rows(1), 2);
        assert_eq!(ArrayConfig::grown_rows(4), 6);
        assert_eq!(ArrayConfig::grown_rows(10), 15);
    }
}
