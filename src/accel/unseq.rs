//! Portable SIMD reductions using `wide::f32x8`.
//!
//! Eight independent lanes accumulate in order within each lane; lanes are
//! folded together at the end. `par_unseq` splits the input into fixed chunks
//! across the rayon pool and vectorizes each chunk.

use rayon::prelude::*;
use wide::f32x8;

use crate::accel::{AccelError, Accumulator, Backend};
use crate::dataset::Dataset;

const LANES: usize = 8;

/// Elements handed to one rayon task by the parallel variant.
pub const PAR_CHUNK: usize = 1 << 16;

#[inline(always)]
fn load(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::new(lanes)
}

/// Eight-lane vector sum of `values`.
pub fn simd_sum(values: &[f32]) -> f32 {
    let mut chunks = values.chunks_exact(LANES);
    let mut acc = f32x8::ZERO;
    for chunk in chunks.by_ref() {
        acc += load(chunk);
    }

    let mut total: f32 = acc.to_array().iter().sum();
    for &v in chunks.remainder() {
        total += v;
    }
    total
}

/// Chunked parallel sum; each chunk goes through [`simd_sum`].
pub fn par_simd_sum(values: &[f32]) -> f32 {
    values.par_chunks(PAR_CHUNK).map(simd_sum).sum()
}

/// Single-thread vectorized reduction.
pub struct UnseqAccumulator {
    data: Dataset,
}

impl UnseqAccumulator {
    pub fn new(data: &Dataset) -> Self {
        Self { data: data.clone() }
    }
}

impl Accumulator for UnseqAccumulator {
    fn sum(&self) -> Result<f64, AccelError> {
        Ok(f64::from(simd_sum(self.data.as_slice())))
    }

    fn backend(&self) -> Backend {
        Backend::Unsequenced
    }
}

/// Multi-thread vectorized reduction.
pub struct ParUnseqAccumulator {
    data: Dataset,
}

impl ParUnseqAccumulator {
    pub fn new(data: &Dataset) -> Self {
        Self { data: data.clone() }
    }
}

impl Accumulator for ParUnseqAccumulator {
    fn sum(&self) -> Result<f64, AccelError> {
        Ok(f64::from(par_simd_sum(self.data.as_slice())))
    }

    fn backend(&self) -> Backend {
        Backend::Unsequenced
    }
}
