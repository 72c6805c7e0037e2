//! x86_64 AVX2 reductions over 8 f32 lanes.
//!
//! Three variants share the same load pattern:
//! - `Naive`: one `__m256` running sum per lane
//! - `Kahan`: per-lane running sum plus compensation vector
//! - `Wide`: loads widened to two `__m256d` accumulators (f64 lanes)

use crate::accel::{AccelError, Accumulator, Backend, SimdVariant};
use crate::dataset::Dataset;

/// Runtime check for AVX2 on this CPU. Always false off x86_64.
pub fn is_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

pub struct Avx2Accumulator {
    // Only the x86_64 kernels read the data.
    #[cfg_attr(not(target_arch = "x86_64"), allow(dead_code))]
    data: Dataset,
    variant: SimdVariant,
}

impl Avx2Accumulator {
    pub fn new(data: &Dataset, variant: SimdVariant) -> Result<Self, AccelError> {
        if !is_available() {
            return Err(AccelError::unavailable(
                Backend::Avx2,
                "CPU does not report AVX2",
            ));
        }
        Ok(Self {
            data: data.clone(),
            variant,
        })
    }
}

impl Accumulator for Avx2Accumulator {
    #[cfg(target_arch = "x86_64")]
    fn sum(&self) -> Result<f64, AccelError> {
        let values = self.data.as_slice();
        // SAFETY: construction fails unless AVX2 was detected at runtime.
        let total = unsafe {
            match self.variant {
                SimdVariant::Naive => kernels::sum_naive(values),
                SimdVariant::Kahan => kernels::sum_kahan(values),
                SimdVariant::Wide => kernels::sum_wide(values),
            }
        };
        Ok(total)
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn sum(&self) -> Result<f64, AccelError> {
        Err(AccelError::invocation(
            Backend::Avx2,
            format!("{:?} kernel is not compiled for this architecture", self.variant),
        ))
    }

    fn backend(&self) -> Backend {
        Backend::Avx2
    }
}

#[cfg(target_arch = "x86_64")]
mod kernels {
    use std::arch::x86_64::*;

    use crate::accel::cpu::KahanSum;

    const LANES: usize = 8;

    #[target_feature(enable = "avx2")]
    unsafe fn store_ps(v: __m256) -> [f32; LANES] {
        let mut lanes = [0.0f32; LANES];
        _mm256_storeu_ps(lanes.as_mut_ptr(), v);
        lanes
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn sum_naive(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut acc = _mm256_setzero_ps();
        for chunk in chunks.by_ref() {
            acc = _mm256_add_ps(acc, _mm256_loadu_ps(chunk.as_ptr()));
        }

        let mut total: f32 = store_ps(acc).iter().sum();
        for &v in chunks.remainder() {
            total += v;
        }
        f64::from(total)
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn sum_kahan(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut sum = _mm256_setzero_ps();
        let mut comp = _mm256_setzero_ps();
        for chunk in chunks.by_ref() {
            let y = _mm256_sub_ps(_mm256_loadu_ps(chunk.as_ptr()), comp);
            let t = _mm256_add_ps(sum, y);
            comp = _mm256_sub_ps(_mm256_sub_ps(t, sum), y);
            sum = t;
        }

        // Fold the lanes with the same compensation, carrying each lane's
        // outstanding correction.
        let sums = store_ps(sum);
        let comps = store_ps(comp);
        let mut total = KahanSum::new();
        for (s, c) in sums.iter().zip(comps.iter()) {
            total.add(*s);
            total.add(-*c);
        }
        for &v in chunks.remainder() {
            total.add(v);
        }
        f64::from(total.value())
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn sum_wide(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut lo = _mm256_setzero_pd();
        let mut hi = _mm256_setzero_pd();
        for chunk in chunks.by_ref() {
            let v = _mm256_loadu_ps(chunk.as_ptr());
            lo = _mm256_add_pd(lo, _mm256_cvtps_pd(_mm256_castps256_ps128(v)));
            hi = _mm256_add_pd(hi, _mm256_cvtps_pd(_mm256_extractf128_ps(v, 1)));
        }

        let mut lanes = [0.0f64; 4];
        _mm256_storeu_pd(lanes.as_mut_ptr(), _mm256_add_pd(lo, hi));
        let mut total: f64 = lanes.iter().sum();
        for &v in chunks.remainder() {
            total += f64::from(v);
        }
        total
    }
}
