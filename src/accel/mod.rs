//! Accumulation backends -- scalar, threaded, SIMD, CUDA and OpenCL reductions.
//!
//! Every backend reduces the same read-only [`Dataset`](crate::dataset::Dataset)
//! to a single `f64` through the [`Accumulator`] trait. The measurement loop only
//! ever sees `&dyn Accumulator`, so CPU and GPU paths are interchangeable.

pub mod avx;
pub mod cpu;
pub mod cuda;
pub mod manager;
pub mod neon;
pub mod opencl;
pub mod strategy;
pub mod threaded;
pub mod unseq;

pub use manager::{AccelerationManager, ComputeTarget, CpuFeatures, FixedDiscovery, SystemDiscovery, TargetDiscovery};
pub use strategy::{Precision, SimdVariant, Strategy};

use thiserror::Error;

/// Which family of hardware/runtime executes a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Plain sequential loop on one core
    Scalar,
    /// Rayon work-stealing pool
    Threads,
    /// Portable SIMD lanes via `wide`
    Unsequenced,
    /// x86_64 AVX2 intrinsics
    Avx2,
    /// aarch64 NEON intrinsics
    Neon,
    /// NVIDIA CUDA device
    Cuda,
    /// OpenCL device
    OpenCl,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Scalar => "scalar",
            Backend::Threads => "threads",
            Backend::Unsequenced => "unsequenced",
            Backend::Avx2 => "avx2",
            Backend::Neon => "neon",
            Backend::Cuda => "cuda",
            Backend::OpenCl => "opencl",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AccelError {
    /// Hardware or runtime is absent. Detected before a case is registered.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// Hardware is present but could not be initialized for this case.
    #[error("{backend} backend failed to initialize: {reason}")]
    ConstructionFailure { backend: Backend, reason: String },

    /// A device call failed while a reduction was in flight.
    #[error("{backend} reduction failed: {reason}")]
    Invocation { backend: Backend, reason: String },
}

impl AccelError {
    pub fn unavailable(backend: Backend, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn construction(backend: Backend, reason: impl Into<String>) -> Self {
        Self::ConstructionFailure {
            backend,
            reason: reason.into(),
        }
    }

    pub fn invocation(backend: Backend, reason: impl Into<String>) -> Self {
        Self::Invocation {
            backend,
            reason: reason.into(),
        }
    }
}

/// A reduction bound to one dataset.
///
/// Implementations are built once from a shared [`Dataset`](crate::dataset::Dataset)
/// (plus backend parameters) and then invoked many times, possibly from several
/// timing threads at once. They must never write to the input; any scratch state
/// they need between invocations stays private to the implementation.
pub trait Accumulator: Send + Sync {
    /// Reduce the whole bound range and return the sum.
    fn sum(&self) -> Result<f64, AccelError>;

    /// Backend family, used for logging and reporting.
    fn backend(&self) -> Backend;
}
