//! aarch64 NEON (ASIMD) reductions over 4 f32 lanes.
//!
//! Mirrors the AVX2 variants: plain lane sums, Kahan-compensated lanes, and
//! f32 loads widened into two `float64x2_t` accumulators.

use crate::accel::{AccelError, Accumulator, Backend, SimdVariant};
use crate::dataset::Dataset;

/// Runtime check for ASIMD. Always false off aarch64.
pub fn is_available() -> bool {
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("neon")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        false
    }
}

pub struct NeonAccumulator {
    // Only the aarch64 kernels read the data.
    #[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
    data: Dataset,
    variant: SimdVariant,
}

impl NeonAccumulator {
    pub fn new(data: &Dataset, variant: SimdVariant) -> Result<Self, AccelError> {
        if !is_available() {
            return Err(AccelError::unavailable(
                Backend::Neon,
                "CPU does not report ASIMD",
            ));
        }
        Ok(Self {
            data: data.clone(),
            variant,
        })
    }
}

impl Accumulator for NeonAccumulator {
    #[cfg(target_arch = "aarch64")]
    fn sum(&self) -> Result<f64, AccelError> {
        let values = self.data.as_slice();
        // SAFETY: construction fails unless NEON was detected at runtime.
        let total = unsafe {
            match self.variant {
                SimdVariant::Naive => kernels::sum_naive(values),
                SimdVariant::Kahan => kernels::sum_kahan(values),
                SimdVariant::Wide => kernels::sum_wide(values),
            }
        };
        Ok(total)
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn sum(&self) -> Result<f64, AccelError> {
        Err(AccelError::invocation(
            Backend::Neon,
            format!("{:?} kernel is not compiled for this architecture", self.variant),
        ))
    }

    fn backend(&self) -> Backend {
        Backend::Neon
    }
}

#[cfg(target_arch = "aarch64")]
mod kernels {
    use std::arch::aarch64::*;

    use crate::accel::cpu::KahanSum;

    const LANES: usize = 4;

    #[target_feature(enable = "neon")]
    pub unsafe fn sum_naive(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut acc = vdupq_n_f32(0.0);
        for chunk in chunks.by_ref() {
            acc = vaddq_f32(acc, vld1q_f32(chunk.as_ptr()));
        }

        let mut total = vaddvq_f32(acc);
        for &v in chunks.remainder() {
            total += v;
        }
        f64::from(total)
    }

    #[target_feature(enable = "neon")]
    pub unsafe fn sum_kahan(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut sum = vdupq_n_f32(0.0);
        let mut comp = vdupq_n_f32(0.0);
        for chunk in chunks.by_ref() {
            let y = vsubq_f32(vld1q_f32(chunk.as_ptr()), comp);
            let t = vaddq_f32(sum, y);
            comp = vsubq_f32(vsubq_f32(t, sum), y);
            sum = t;
        }

        let mut sums = [0.0f32; LANES];
        let mut comps = [0.0f32; LANES];
        vst1q_f32(sums.as_mut_ptr(), sum);
        vst1q_f32(comps.as_mut_ptr(), comp);

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

    #[target_feature(enable = "neon")]
    pub unsafe fn sum_wide(values: &[f32]) -> f64 {
        let mut chunks = values.chunks_exact(LANES);
        let mut lo = vdupq_n_f64(0.0);
        let mut hi = vdupq_n_f64(0.0);
        for chunk in chunks.by_ref() {
            let v = vld1q_f32(chunk.as_ptr());
            lo = vaddq_f64(lo, vcvt_f64_f32(vget_low_f32(v)));
            hi = vaddq_f64(hi, vcvt_high_f64_f32(v));
        }

        let mut total = vaddvq_f64(vaddq_f64(lo, hi));
        for &v in chunks.remainder() {
            total += f64::from(v);
        }
        total
    }
}
