//! OpenCL reductions through `opencl3`.
//!
//! Every discovered device is crossed with each [`KernelVariant`] and a set of
//! work-group sizes. A kernel grid-strides over the input, reduces its
//! work-group in local memory and writes one partial per group; the host
//! folds the partials.

use serde::{Deserialize, Serialize};

use crate::accel::{AccelError, Accumulator, Backend, ComputeTarget};
use crate::dataset::Dataset;

#[cfg(feature = "opencl")]
pub use imp::OpenClAccumulator;

/// Work-group sizes tried on every target unless configured otherwise.
pub const DEFAULT_WORK_GROUP_SIZES: [usize; 3] = [64, 128, 256];

/// Upper bound on work-groups per launch (and partials read back per call).
pub const MAX_GROUPS: usize = 1024;

/// Device-side reduction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelVariant {
    /// Strided accumulation then local-memory tree
    ReduceTree,
    /// Two loads per work-item per step, then tree
    ReduceUnrolled,
    /// Kahan-compensated strided accumulation, then tree
    ReduceKahan,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 3] = [
        KernelVariant::ReduceTree,
        KernelVariant::ReduceUnrolled,
        KernelVariant::ReduceKahan,
    ];

    /// Kernel function name in [`KERNEL_SOURCE`].
    pub fn name(&self) -> &'static str {
        match self {
            KernelVariant::ReduceTree => "reduce_tree",
            KernelVariant::ReduceUnrolled => "reduce_unrolled",
            KernelVariant::ReduceKahan => "reduce_kahan",
        }
    }

    /// Elements each work-item consumes per grid stride.
    pub fn elements_per_item(&self) -> usize {
        match self {
            KernelVariant::ReduceUnrolled => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of work-groups to launch for `len` elements.
pub fn group_count(len: usize, work_group_size: usize, variant: KernelVariant) -> usize {
    let per_group = work_group_size * variant.elements_per_item();
    len.div_ceil(per_group).clamp(1, MAX_GROUPS)
}

pub const KERNEL_SOURCE: &str = r#"
void tree_reduce(__local float* scratch, float value, __global float* partials)
{
    const size_t lid = get_local_id(0);
    scratch[lid] = value;
    barrier(CLK_LOCAL_MEM_FENCE);
    for (size_t s = get_local_size(0) / 2; s > 0; s >>= 1) {
        if (lid < s) {
            scratch[lid] += scratch[lid + s];
        }
        barrier(CLK_LOCAL_MEM_FENCE);
    }
    if (lid == 0) {
        partials[get_group_id(0)] = scratch[0];
    }
}

__kernel void reduce_tree(__global const float* input,
                          __global float* partials,
                          __local float* scratch,
                          const ulong n)
{
    const ulong stride = get_global_size(0);
    float acc = 0.0f;
    for (ulong i = get_global_id(0); i < n; i += stride) {
        acc += input[i];
    }
    tree_reduce(scratch, acc, partials);
}

__kernel void reduce_unrolled(__global const float* input,
                              __global float* partials,
                              __local float* scratch,
                              const ulong n)
{
    const ulong local_size = get_local_size(0);
    const ulong stride = get_global_size(0) * 2;
    float acc = 0.0f;
    for (ulong i = get_group_id(0) * local_size * 2 + get_local_id(0); i < n; i += stride) {
        float v = input[i];
        if (i + local_size < n) {
            v += input[i + local_size];
        }
        acc += v;
    }
    tree_reduce(scratch, acc, partials);
}

__kernel void reduce_kahan(__global const float* input,
                           __global float* partials,
                           __local float* scratch,
                           const ulong n)
{
    const ulong stride = get_global_size(0);
    float sum = 0.0f;
    float c = 0.0f;
    for (ulong i = get_global_id(0); i < n; i += stride) {
        const float y = input[i] - c;
        const float t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    tree_reduce(scratch, sum - c, partials);
}
"#;

#[cfg(feature = "opencl")]
pub fn discover_targets() -> Vec<ComputeTarget> {
    imp::discover_targets()
}

#[cfg(not(feature = "opencl"))]
pub fn discover_targets() -> Vec<ComputeTarget> {
    Vec::new()
}

/// Open `target`, compile `kernel` and upload `data`.
#[cfg(feature = "opencl")]
pub fn build(
    data: &Dataset,
    target: &ComputeTarget,
    kernel: KernelVariant,
    work_group_size: usize,
) -> Result<Box<dyn Accumulator>, AccelError> {
    Ok(Box::new(OpenClAccumulator::new(data, target, kernel, work_group_size)?))
}

#[cfg(not(feature = "opencl"))]
pub fn build(
    _data: &Dataset,
    target: &ComputeTarget,
    _kernel: KernelVariant,
    _work_group_size: usize,
) -> Result<Box<dyn Accumulator>, AccelError> {
    Err(AccelError::unavailable(
        Backend::OpenCl,
        format!("{} needs a build with the `opencl` feature", target.name),
    ))
}

#[cfg(feature = "opencl")]
mod imp {
    use std::ptr;
    use std::sync::Mutex;

    use opencl3::command_queue::CommandQueue;
    use opencl3::context::Context;
    use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_GPU};
    use opencl3::error_codes::ClError;
    use opencl3::kernel::{ExecuteKernel, Kernel};
    use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
    use opencl3::program::Program;
    use opencl3::types::{cl_float, cl_ulong, CL_BLOCKING};
    use tracing::{debug, warn};

    use super::*;
    use crate::accel::cpu::KahanSum;

    pub fn discover_targets() -> Vec<ComputeTarget> {
        let ids = match get_all_devices(CL_DEVICE_TYPE_GPU) {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, "no OpenCL GPU platform");
                return Vec::new();
            }
        };

        ids.into_iter()
            .enumerate()
            .filter_map(|(index, id)| match describe(index, &Device::new(id)) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!(index, error = %e, "skipping OpenCL device with unreadable info");
                    None
                }
            })
            .collect()
    }

    fn describe(index: usize, device: &Device) -> Result<ComputeTarget, ClError> {
        Ok(ComputeTarget {
            index,
            name: device.name()?,
            device_version: device.version()?,
            driver_version: device.driver_version()?,
            opencl_c_version: device.opencl_c_version()?,
        })
    }

    fn construction(what: &str, e: impl std::fmt::Display) -> AccelError {
        AccelError::construction(Backend::OpenCl, format!("{}: {}", what, e))
    }

    fn invocation(what: &str, e: impl std::fmt::Display) -> AccelError {
        AccelError::invocation(Backend::OpenCl, format!("{}: {}", what, e))
    }

    /// Kernel argument state and the partial buffer it writes.
    struct Launch {
        kernel: Kernel,
        partials: Buffer<cl_float>,
    }

    pub struct OpenClAccumulator {
        queue: CommandQueue,
        input: Buffer<cl_float>,
        launch: Mutex<Launch>,
        variant: KernelVariant,
        work_group_size: usize,
        groups: usize,
        len: usize,
        _context: Context,
    }

    impl OpenClAccumulator {
        pub fn new(
            data: &Dataset,
            target: &ComputeTarget,
            variant: KernelVariant,
            work_group_size: usize,
        ) -> Result<Self, AccelError> {
            if !work_group_size.is_power_of_two() {
                return Err(AccelError::construction(
                    Backend::OpenCl,
                    format!("work-group size {} is not a power of two", work_group_size),
                ));
            }

            let ids = get_all_devices(CL_DEVICE_TYPE_GPU).map_err(|e| construction("enumerate devices", e))?;
            let id = *ids.get(target.index).ok_or_else(|| {
                AccelError::construction(Backend::OpenCl, format!("device #{} disappeared", target.index))
            })?;
            let device = Device::new(id);

            let max_wg = device
                .max_work_group_size()
                .map_err(|e| construction("query max work-group size", e))?;
            if work_group_size > max_wg {
                return Err(AccelError::construction(
                    Backend::OpenCl,
                    format!("work-group size {} exceeds device limit {}", work_group_size, max_wg),
                ));
            }

            let context = Context::from_device(&device).map_err(|e| construction("create context", e))?;
            #[allow(deprecated)]
            let queue = CommandQueue::create_default(&context, 0).map_err(|e| construction("create queue", e))?;
            let program = Program::create_and_build_from_source(&context, KERNEL_SOURCE, "")
                .map_err(|log| construction("build program", log))?;
            let kernel = Kernel::create(&program, variant.name()).map_err(|e| construction("create kernel", e))?;

            let groups = group_count(data.len(), work_group_size, variant);

            // SAFETY: buffers are created without a host pointer; the write is
            // blocking, so `data` outlives the transfer.
            let (input, partials) = unsafe {
                let mut input = Buffer::<cl_float>::create(&context, CL_MEM_READ_ONLY, data.len(), ptr::null_mut())
                    .map_err(|e| construction("allocate input", e))?;
                let partials = Buffer::<cl_float>::create(&context, CL_MEM_WRITE_ONLY, groups, ptr::null_mut())
                    .map_err(|e| construction("allocate partials", e))?;
                queue
                    .enqueue_write_buffer(&mut input, CL_BLOCKING, 0, data.as_slice(), &[])
                    .map_err(|e| construction("upload dataset", e))?;
                (input, partials)
            };

            debug!(
                device = %target.name,
                kernel = variant.name(),
                work_group_size,
                groups,
                "OpenCL accumulator ready"
            );

            Ok(Self {
                queue,
                input,
                launch: Mutex::new(Launch { kernel, partials }),
                variant,
                work_group_size,
                groups,
                len: data.len(),
                _context: context,
            })
        }
    }

    impl Accumulator for OpenClAccumulator {
        fn sum(&self) -> Result<f64, AccelError> {
            let launch = self
                .launch
                .lock()
                .map_err(|_| AccelError::invocation(Backend::OpenCl, "kernel lock poisoned"))?;

            let n = self.len as cl_ulong;
            let mut host = vec![0.0 as cl_float; self.groups];

            // SAFETY: argument order and types match the kernel signatures in
            // KERNEL_SOURCE; the read is blocking into a buffer of `groups` floats.
            unsafe {
                let event = ExecuteKernel::new(&launch.kernel)
                    .set_arg(&self.input)
                    .set_arg(&launch.partials)
                    .set_arg_local_buffer(self.work_group_size * std::mem::size_of::<cl_float>())
                    .set_arg(&n)
                    .set_global_work_size(self.groups * self.work_group_size)
                    .set_local_work_size(self.work_group_size)
                    .enqueue_nd_range(&self.queue)
                    .map_err(|e| invocation("enqueue kernel", e))?;
                event.wait().map_err(|e| invocation("wait for kernel", e))?;

                self.queue
                    .enqueue_read_buffer(&launch.partials, CL_BLOCKING, 0, &mut host, &[])
                    .map_err(|e| invocation("read partials", e))?;
            }

            let total = match self.variant {
                KernelVariant::ReduceKahan => {
                    let mut acc = KahanSum::new();
                    for &v in &host {
                        acc.add(v);
                    }
                    acc.value()
                }
                _ => host.iter().sum::<f32>(),
            };
            Ok(f64::from(total))
        }

        fn backend(&self) -> Backend {
            Backend::OpenCl
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names_present_in_source() {
        for variant in KernelVariant::ALL {
            let signature = format!("__kernel void {}(", variant.name());
            assert!(KERNEL_SOURCE.contains(&signature), "{}", variant);
        }
    }

    #[test]
    fn test_kernel_variant_config_names() {
        let parsed: Vec<KernelVariant> =
            serde_json::from_str(r#"["reduce_tree", "reduce_unrolled", "reduce_kahan"]"#).unwrap();
        assert_eq!(parsed, KernelVariant::ALL.to_vec());
    }

    #[test]
    fn test_group_count_bounds() {
        assert_eq!(group_count(1, 256, KernelVariant::ReduceTree), 1);
        assert_eq!(group_count(1024, 256, KernelVariant::ReduceTree), 4);
        assert_eq!(group_count(1024, 256, KernelVariant::ReduceUnrolled), 2);
        assert_eq!(group_count(1 << 28, 64, KernelVariant::ReduceKahan), MAX_GROUPS);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_without_feature_nothing_is_discovered() {
        assert!(discover_targets().is_empty());
        let data = Dataset::filled(16, 1.0).unwrap();
        let target = crate::accel::manager::sample_target(0, "Device A");
        assert!(matches!(
            build(&data, &target, KernelVariant::ReduceTree, 64),
            Err(AccelError::BackendUnavailable { backend: Backend::OpenCl, .. })
        ));
    }

    #[cfg(feature = "opencl")]
    #[test]
    #[ignore] // Requires an OpenCL GPU runtime
    fn test_opencl_reduction_matches_expected() {
        let data = Dataset::filled(1 << 20, 1.0).unwrap();
        for target in discover_targets() {
            for variant in KernelVariant::ALL {
                let acc = build(&data, &target, variant, 64).unwrap();
                assert_eq!(acc.sum().unwrap(), (1 << 20) as f64, "{} on {}", variant, target.name);
            }
        }
    }
}
