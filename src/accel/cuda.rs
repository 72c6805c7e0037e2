//! CUDA reductions through `cudarc`.
//!
//! One NVRTC-compiled module holds an f32 and an f64 block reduction. Each block
//! grid-strides over the input, tree-reduces in shared memory and writes one
//! partial; the host folds the `GRID` partials in the kernel's precision.

use crate::accel::{AccelError, Accumulator, Backend, Precision};
use crate::dataset::Dataset;

#[cfg(feature = "cuda")]
pub use imp::CudaAccumulator;

/// Number of CUDA devices the driver reports. Zero when the driver is missing.
#[cfg(feature = "cuda")]
pub fn device_count() -> usize {
    match cudarc::driver::CudaDevice::count() {
        Ok(n) => usize::try_from(n).unwrap_or(0),
        Err(e) => {
            tracing::debug!(error = ?e, "CUDA driver not usable");
            0
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub fn device_count() -> usize {
    0
}

/// Upload `data` to device 0 and prepare the kernel for `precision`.
#[cfg(feature = "cuda")]
pub fn build(data: &Dataset, precision: Precision) -> Result<Box<dyn Accumulator>, AccelError> {
    Ok(Box::new(CudaAccumulator::new(data, precision)?))
}

#[cfg(not(feature = "cuda"))]
pub fn build(_data: &Dataset, precision: Precision) -> Result<Box<dyn Accumulator>, AccelError> {
    Err(AccelError::unavailable(
        Backend::Cuda,
        format!("cuda/{} needs a build with the `cuda` feature", precision),
    ))
}

#[cfg(feature = "cuda")]
mod imp {
    use std::sync::{Arc, Mutex};

    use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, LaunchAsync, LaunchConfig};
    use cudarc::nvrtc::compile_ptx;
    use tracing::debug;

    use super::*;

    const MODULE: &str = "sumbench_reduce";
    const BLOCK: u32 = 256;
    const GRID: u32 = 1024;

    const SOURCE: &str = r#"
extern "C" __global__ void reduce_f32(const float* input, float* partials, unsigned long long n)
{
    extern __shared__ float scratch_f32[];
    unsigned int tid = threadIdx.x;
    unsigned long long stride = (unsigned long long)blockDim.x * gridDim.x;
    float acc = 0.0f;
    for (unsigned long long i = (unsigned long long)blockIdx.x * blockDim.x + tid; i < n; i += stride) {
        acc += input[i];
    }
    scratch_f32[tid] = acc;
    __syncthreads();
    for (unsigned int s = blockDim.x / 2; s > 0; s >>= 1) {
        if (tid < s) {
            scratch_f32[tid] += scratch_f32[tid + s];
        }
        __syncthreads();
    }
    if (tid == 0) {
        partials[blockIdx.x] = scratch_f32[0];
    }
}

extern "C" __global__ void reduce_f64(const float* input, double* partials, unsigned long long n)
{
    extern __shared__ double scratch_f64[];
    unsigned int tid = threadIdx.x;
    unsigned long long stride = (unsigned long long)blockDim.x * gridDim.x;
    double acc = 0.0;
    for (unsigned long long i = (unsigned long long)blockIdx.x * blockDim.x + tid; i < n; i += stride) {
        acc += (double)input[i];
    }
    scratch_f64[tid] = acc;
    __syncthreads();
    for (unsigned int s = blockDim.x / 2; s > 0; s >>= 1) {
        if (tid < s) {
            scratch_f64[tid] += scratch_f64[tid + s];
        }
        __syncthreads();
    }
    if (tid == 0) {
        partials[blockIdx.x] = scratch_f64[0];
    }
}
"#;

    enum Partials {
        F32(CudaSlice<f32>),
        F64(CudaSlice<f64>),
    }

    /// Device-resident copy of the dataset plus one partial per block.
    pub struct CudaAccumulator {
        device: Arc<CudaDevice>,
        input: CudaSlice<f32>,
        // Launches write into the partial buffer, so concurrent timing threads
        // take turns on it.
        partials: Mutex<Partials>,
        kernel: CudaFunction,
        len: u64,
    }

    fn construction(what: &str, e: impl std::fmt::Debug) -> AccelError {
        AccelError::construction(Backend::Cuda, format!("{}: {:?}", what, e))
    }

    fn invocation(what: &str, e: impl std::fmt::Debug) -> AccelError {
        AccelError::invocation(Backend::Cuda, format!("{}: {:?}", what, e))
    }

    impl CudaAccumulator {
        pub fn new(data: &Dataset, precision: Precision) -> Result<Self, AccelError> {
            let kernel_name = match precision {
                Precision::F32 => "reduce_f32",
                Precision::F64 => "reduce_f64",
                Precision::F16 => {
                    return Err(AccelError::construction(
                        Backend::Cuda,
                        "no half-precision CUDA kernel",
                    ))
                }
            };

            let device = CudaDevice::new(0).map_err(|e| construction("open device 0", e))?;
            let ptx = compile_ptx(SOURCE).map_err(|e| construction("NVRTC compilation", e))?;
            device
                .load_ptx(ptx, MODULE, &["reduce_f32", "reduce_f64"])
                .map_err(|e| construction("load PTX", e))?;
            let kernel = device
                .get_func(MODULE, kernel_name)
                .ok_or_else(|| AccelError::construction(Backend::Cuda, format!("{} not found", kernel_name)))?;

            let input = device
                .htod_sync_copy(data.as_slice())
                .map_err(|e| construction("upload dataset", e))?;
            let partials = match precision {
                Precision::F64 => Partials::F64(
                    device
                        .alloc_zeros::<f64>(GRID as usize)
                        .map_err(|e| construction("allocate partials", e))?,
                ),
                _ => Partials::F32(
                    device
                        .alloc_zeros::<f32>(GRID as usize)
                        .map_err(|e| construction("allocate partials", e))?,
                ),
            };

            debug!(kernel = kernel_name, elements = data.len(), "CUDA accumulator ready");
            Ok(Self {
                device,
                input,
                partials: Mutex::new(partials),
                kernel,
                len: data.len() as u64,
            })
        }
    }

    impl Accumulator for CudaAccumulator {
        fn sum(&self) -> Result<f64, AccelError> {
            let mut partials = self
                .partials
                .lock()
                .map_err(|_| AccelError::invocation(Backend::Cuda, "partial buffer lock poisoned"))?;

            let total = match &mut *partials {
                Partials::F32(buf) => {
                    let cfg = LaunchConfig {
                        grid_dim: (GRID, 1, 1),
                        block_dim: (BLOCK, 1, 1),
                        shared_mem_bytes: BLOCK * std::mem::size_of::<f32>() as u32,
                    };
                    // SAFETY: argument types match the reduce_f32 signature and
                    // `buf` holds exactly GRID elements.
                    unsafe { self.kernel.clone().launch(cfg, (&self.input, &mut *buf, self.len)) }
                        .map_err(|e| invocation("launch reduce_f32", e))?;
                    let host = self
                        .device
                        .dtoh_sync_copy(&*buf)
                        .map_err(|e| invocation("read partials", e))?;
                    f64::from(host.iter().sum::<f32>())
                }
                Partials::F64(buf) => {
                    let cfg = LaunchConfig {
                        grid_dim: (GRID, 1, 1),
                        block_dim: (BLOCK, 1, 1),
                        shared_mem_bytes: BLOCK * std::mem::size_of::<f64>() as u32,
                    };
                    // SAFETY: argument types match the reduce_f64 signature and
                    // `buf` holds exactly GRID elements.
                    unsafe { self.kernel.clone().launch(cfg, (&self.input, &mut *buf, self.len)) }
                        .map_err(|e| invocation("launch reduce_f64", e))?;
                    let host = self
                        .device
                        .dtoh_sync_copy(&*buf)
                        .map_err(|e| invocation("read partials", e))?;
                    host.iter().sum::<f64>()
                }
            };
            Ok(total)
        }

        fn backend(&self) -> Backend {
            Backend::Cuda
        }
    }
}
