use serde::Serialize;
use tracing::{debug, info};

use crate::accel::{avx, cuda, neon, opencl};

/// One discovered OpenCL device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeTarget {
    /// Position in the runtime's device enumeration, used to reopen the device.
    pub index: usize,
    pub name: String,
    pub device_version: String,
    pub driver_version: String,
    pub opencl_c_version: String,
}

impl std::fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | device: {} | driver: {} | {}",
            self.name, self.device_version, self.driver_version, self.opencl_c_version
        )
    }
}

/// CPU SIMD features relevant to the architecture-specific kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuFeatures {
    pub avx2: bool,
    pub neon: bool,
}

impl CpuFeatures {
    pub fn detect() -> Self {
        Self {
            avx2: avx::is_available(),
            neon: neon::is_available(),
        }
    }
}

/// Source of GPU device information.
pub trait TargetDiscovery {
    /// Number of CUDA-capable devices. Zero disables every CUDA case.
    fn cuda_device_count(&self) -> usize;

    /// Every OpenCL device usable as a reduction target.
    fn opencl_targets(&self) -> Vec<ComputeTarget>;
}

/// Queries the installed CUDA and OpenCL runtimes.
///
/// Without the `cuda`/`opencl` features the corresponding query reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiscovery;

impl TargetDiscovery for SystemDiscovery {
    fn cuda_device_count(&self) -> usize {
        cuda::device_count()
    }

    fn opencl_targets(&self) -> Vec<ComputeTarget> {
        opencl::discover_targets()
    }
}

/// Discovery with a predetermined answer (`--cpu-only`, tests).
#[derive(Debug, Default, Clone)]
pub struct FixedDiscovery {
    pub cuda_devices: usize,
    pub targets: Vec<ComputeTarget>,
}

impl FixedDiscovery {
    /// No GPU of any kind.
    pub fn none() -> Self {
        Self::default()
    }
}

impl TargetDiscovery for FixedDiscovery {
    fn cuda_device_count(&self) -> usize {
        self.cuda_devices
    }

    fn opencl_targets(&self) -> Vec<ComputeTarget> {
        self.targets.clone()
    }
}

/// Everything discovered about the host before any case is registered.
#[derive(Debug, Clone)]
pub struct AccelerationManager {
    cpu: CpuFeatures,
    cuda_devices: usize,
    opencl_targets: Vec<ComputeTarget>,
}

impl AccelerationManager {
    /// Run CPU feature detection and GPU discovery once.
    pub fn discover(discovery: &dyn TargetDiscovery) -> Self {
        let cpu = CpuFeatures::detect();
        let cuda_devices = discovery.cuda_device_count();
        let opencl_targets = discovery.opencl_targets();

        info!(
            "AccelerationManager initialized. AVX2: {}, NEON: {}, CUDA devices: {}, OpenCL targets: {}",
            cpu.avx2,
            cpu.neon,
            cuda_devices,
            opencl_targets.len()
        );
        for target in &opencl_targets {
            debug!(index = target.index, name = %target.name, "OpenCL target");
        }

        Self::from_parts(cpu, cuda_devices, opencl_targets)
    }

    pub fn from_parts(cpu: CpuFeatures, cuda_devices: usize, opencl_targets: Vec<ComputeTarget>) -> Self {
        Self {
            cpu,
            cuda_devices,
            opencl_targets,
        }
    }

    pub fn cpu(&self) -> CpuFeatures {
        self.cpu
    }

    pub fn cuda_device_count(&self) -> usize {
        self.cuda_devices
    }

    pub fn opencl_targets(&self) -> &[ComputeTarget] {
        &self.opencl_targets
    }

    /// Human-readable startup lines: one per OpenCL target, plus a note when
    /// no CUDA device exists.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .opencl_targets
            .iter()
            .map(|t| format!("OpenCL target: {}", t))
            .collect();
        if self.cuda_devices == 0 {
            lines.push("No CUDA-capable devices found; CUDA cases will not run".to_string());
        }
        lines
    }
}

#[cfg(test)]
pub(crate) fn sample_target(index: usize, name: &str) -> ComputeTarget {
    ComputeTarget {
        index,
        name: name.to_string(),
        device_version: "OpenCL 3.0".to_string(),
        driver_version: "1.0.0".to_string(),
        opencl_c_version: "OpenCL C 1.2".to_string(),
    }
}
