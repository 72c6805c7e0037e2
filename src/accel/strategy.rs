//! The fixed catalogue of accumulation strategies and how to build each one.

use half::f16;
use serde::Serialize;

use crate::accel::cpu::{KahanAccumulator, ScalarAccumulator};
use crate::accel::threaded::ThreadedAccumulator;
use crate::accel::unseq::{ParUnseqAccumulator, UnseqAccumulator};
use crate::accel::{avx, cuda, neon, AccelError, AccelerationManager, Accumulator, Backend};
use crate::dataset::Dataset;

/// Precision of the running sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F16,
    F32,
    F64,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Precision::F16 => "f16",
            Precision::F32 => "f32",
            Precision::F64 => "f64",
        })
    }
}

/// Lane arithmetic used by the architecture-specific SIMD kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimdVariant {
    /// Plain lane-wise addition
    Naive,
    /// Lane-wise Kahan compensation
    Kahan,
    /// f32 loads accumulated in f64 lanes
    Wide,
}

impl std::fmt::Display for SimdVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SimdVariant::Naive => "naive",
            SimdVariant::Kahan => "kahan",
            SimdVariant::Wide => "wide",
        })
    }
}

/// A statically known accumulation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Scalar(Precision),
    Kahan,
    Threads(Precision),
    Unseq,
    ParUnseq,
    Avx2(SimdVariant),
    Neon(SimdVariant),
    Cuda(Precision),
}

impl Strategy {
    /// CPU strategies in registration order.
    pub const CPU: &'static [Strategy] = &[
        Strategy::Scalar(Precision::F32),
        Strategy::Scalar(Precision::F64),
        Strategy::Scalar(Precision::F16),
        Strategy::Kahan,
        Strategy::Threads(Precision::F32),
        Strategy::Threads(Precision::F64),
        Strategy::Threads(Precision::F16),
        Strategy::Unseq,
        Strategy::ParUnseq,
        Strategy::Avx2(SimdVariant::Naive),
        Strategy::Avx2(SimdVariant::Kahan),
        Strategy::Avx2(SimdVariant::Wide),
        Strategy::Neon(SimdVariant::Naive),
        Strategy::Neon(SimdVariant::Kahan),
        Strategy::Neon(SimdVariant::Wide),
    ];

    /// GPU-library strategies, registered only when a CUDA device exists.
    pub const CUDA: &'static [Strategy] = &[
        Strategy::Cuda(Precision::F32),
        Strategy::Cuda(Precision::F64),
    ];

    pub fn label(&self) -> String {
        match self {
            Strategy::Scalar(p) => format!("scalar/{}", p),
            Strategy::Kahan => "kahan/f32".to_string(),
            Strategy::Threads(p) => format!("threads/{}", p),
            Strategy::Unseq => "unseq/f32".to_string(),
            Strategy::ParUnseq => "par_unseq/f32".to_string(),
            Strategy::Avx2(v) => format!("avx2/{}", v),
            Strategy::Neon(v) => format!("neon/{}", v),
            Strategy::Cuda(p) => format!("cuda/{}", p),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Strategy::Scalar(_) | Strategy::Kahan => Backend::Scalar,
            Strategy::Threads(_) => Backend::Threads,
            Strategy::Unseq | Strategy::ParUnseq => Backend::Unsequenced,
            Strategy::Avx2(_) => Backend::Avx2,
            Strategy::Neon(_) => Backend::Neon,
            Strategy::Cuda(_) => Backend::Cuda,
        }
    }

    /// Check that the hardware this strategy needs was discovered.
    ///
    /// Runs before registration so unavailable backends never become cases.
    pub fn check_available(&self, manager: &AccelerationManager) -> Result<(), AccelError> {
        let backend = self.backend();
        match self {
            Strategy::Avx2(_) if !manager.cpu().avx2 => {
                Err(AccelError::unavailable(backend, "AVX2 not detected"))
            }
            Strategy::Neon(_) if !manager.cpu().neon => {
                Err(AccelError::unavailable(backend, "NEON not detected"))
            }
            Strategy::Cuda(_) if manager.cuda_device_count() == 0 => {
                Err(AccelError::unavailable(backend, "no CUDA-capable device"))
            }
            _ => Ok(()),
        }
    }

    /// Build the accumulator for this strategy over `data`.
    pub fn build(&self, data: &Dataset) -> Result<Box<dyn Accumulator>, AccelError> {
        let acc: Box<dyn Accumulator> = match *self {
            Strategy::Scalar(Precision::F16) => Box::new(ScalarAccumulator::<f16>::new(data)),
            Strategy::Scalar(Precision::F32) => Box::new(ScalarAccumulator::<f32>::new(data)),
            Strategy::Scalar(Precision::F64) => Box::new(ScalarAccumulator::<f64>::new(data)),
            Strategy::Kahan => Box::new(KahanAccumulator::new(data)),
            Strategy::Threads(Precision::F16) => Box::new(ThreadedAccumulator::<f16>::new(data)),
            Strategy::Threads(Precision::F32) => Box::new(ThreadedAccumulator::<f32>::new(data)),
            Strategy::Threads(Precision::F64) => Box::new(ThreadedAccumulator::<f64>::new(data)),
            Strategy::Unseq => Box::new(UnseqAccumulator::new(data)),
            Strategy::ParUnseq => Box::new(ParUnseqAccumulator::new(data)),
            Strategy::Avx2(variant) => Box::new(avx::Avx2Accumulator::new(data, variant)?),
            Strategy::Neon(variant) => Box::new(neon::NeonAccumulator::new(data, variant)?),
            Strategy::Cuda(precision) => cuda::build(data, precision)?,
        };
        Ok(acc)
    }
}
