//! The shared, read-only input every accumulator reduces.

use std::sync::Arc;

use anyhow::{bail, Result};

/// Element count that fills one GiB with `f32` values.
pub const DEFAULT_ELEMENTS: usize = (1 << 30) / std::mem::size_of::<f32>();

/// Value every element is initialized to unless configured otherwise.
pub const DEFAULT_FILL: f32 = 1.0;

/// Immutable array of `f32` values filled with a single constant.
///
/// Cloning is cheap: all clones share one allocation, and no API hands out
/// mutable access, so every backend sees the same bytes for the whole run.
#[derive(Debug, Clone)]
pub struct Dataset {
    values: Arc<[f32]>,
    fill: f32,
}

impl Dataset {
    /// Allocate `len` elements, each set to `fill`.
    pub fn filled(len: usize, fill: f32) -> Result<Self> {
        if len == 0 {
            bail!("dataset must hold at least one element");
        }
        if !fill.is_finite() || fill == 0.0 {
            bail!("fill value must be finite and non-zero (got {})", fill);
        }

        // Take<Repeat> has an exact length, so this collects straight into the Arc
        // without an intermediate Vec.
        let values: Arc<[f32]> = std::iter::repeat(fill).take(len).collect();
        Ok(Self { values, fill })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fill(&self) -> f32 {
        self.fill
    }

    /// Exact sum of the dataset, computed analytically rather than by adding.
    pub fn expected_sum(&self) -> f64 {
        self.len() as f64 * f64::from(self.fill)
    }

    /// Size of one element in bytes.
    pub fn element_bytes(&self) -> usize {
        std::mem::size_of::<f32>()
    }

    /// Total payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_sum_is_element_count() {
        for n in [1usize, 7, 1024, 1 << 20] {
            let data = Dataset::filled(n, 1.0).unwrap();
            assert_eq!(data.expected_sum(), n as f64);
            assert_eq!(data.len(), n);
        }
    }

    #[test]
    fn test_expected_sum_scales_with_fill() {
        let data = Dataset::filled(1000, 0.5).unwrap();
        assert_eq!(data.expected_sum(), 500.0);
        assert!(data.as_slice().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_default_elements_fill_one_gib() {
        assert_eq!(DEFAULT_ELEMENTS, 268_435_456);
        assert_eq!(DEFAULT_ELEMENTS * std::mem::size_of::<f32>(), 1 << 30);
    }

    #[test]
    fn test_rejects_empty_and_degenerate_fill() {
        assert!(Dataset::filled(0, 1.0).is_err());
        assert!(Dataset::filled(16, 0.0).is_err());
        assert!(Dataset::filled(16, f32::NAN).is_err());
        assert!(Dataset::filled(16, f32::INFINITY).is_err());
    }

    #[test]
    fn test_clones_share_storage() {
        let data = Dataset::filled(64, 1.0).unwrap();
        let other = data.clone();
        assert!(std::ptr::eq(data.as_slice(), other.as_slice()));
        assert_eq!(other.byte_len(), 256);
    }
}
