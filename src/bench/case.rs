//! Case descriptors and their registration.
//!
//! Static cases come from the fixed strategy catalogue. Dynamic cases are the
//! cross product of OpenCL targets, kernels and work-group sizes, enumerated
//! into a list before anything runs. Descriptors are plain data; the
//! accumulator is only built when the case is about to be measured.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::accel::opencl::{self, KernelVariant, DEFAULT_WORK_GROUP_SIZES};
use crate::accel::{AccelError, AccelerationManager, Accumulator, Backend, ComputeTarget, Strategy};
use crate::dataset::Dataset;

/// Lifecycle of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePhase {
    Registered,
    Constructed,
    Measuring,
    Reported,
    Failed,
}

impl CasePhase {
    /// Next phase on success. Terminal phases stay where they are.
    pub fn advance(self) -> Self {
        match self {
            CasePhase::Registered => CasePhase::Constructed,
            CasePhase::Constructed => CasePhase::Measuring,
            CasePhase::Measuring => CasePhase::Reported,
            terminal => terminal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseKind {
    Static {
        strategy: Strategy,
    },
    OpenCl {
        target: ComputeTarget,
        kernel: KernelVariant,
        work_group_size: usize,
    },
}

/// An immutable, registered case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseDescriptor {
    pub label: String,
    pub kind: CaseKind,
}

impl CaseDescriptor {
    pub fn from_strategy(strategy: Strategy) -> Self {
        Self {
            label: strategy.label(),
            kind: CaseKind::Static { strategy },
        }
    }

    /// `device_name` is the target name as it should appear in the label.
    pub fn opencl(target: ComputeTarget, device_name: &str, kernel: KernelVariant, work_group_size: usize) -> Self {
        Self {
            label: format!("opencl/{}/wg:{}/{}", kernel.name(), work_group_size, device_name),
            kind: CaseKind::OpenCl {
                target,
                kernel,
                work_group_size,
            },
        }
    }

    pub fn backend(&self) -> Backend {
        match &self.kind {
            CaseKind::Static { strategy } => strategy.backend(),
            CaseKind::OpenCl { .. } => Backend::OpenCl,
        }
    }

    /// Build the accumulator. For GPU cases this opens the device and uploads
    /// the dataset.
    pub fn construct(&self, data: &Dataset) -> Result<Box<dyn Accumulator>, AccelError> {
        match &self.kind {
            CaseKind::Static { strategy } => strategy.build(data),
            CaseKind::OpenCl {
                target,
                kernel,
                work_group_size,
            } => opencl::build(data, target, *kernel, *work_group_size),
        }
    }
}

/// Kernels and work-group sizes applied to every OpenCL target.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenClMatrix {
    pub kernels: Vec<KernelVariant>,
    pub work_group_sizes: Vec<usize>,
}

impl Default for OpenClMatrix {
    fn default() -> Self {
        Self {
            kernels: KernelVariant::ALL.to_vec(),
            work_group_sizes: DEFAULT_WORK_GROUP_SIZES.to_vec(),
        }
    }
}

/// Cases for every catalogue strategy whose hardware was discovered.
pub fn static_cases(manager: &AccelerationManager) -> Vec<CaseDescriptor> {
    let mut cases = Vec::new();
    for strategy in Strategy::CPU {
        match strategy.check_available(manager) {
            Ok(()) => cases.push(CaseDescriptor::from_strategy(*strategy)),
            Err(e) => info!(case = %strategy.label(), "Skipping case: {}", e),
        }
    }

    if manager.cuda_device_count() > 0 {
        cases.extend(Strategy::CUDA.iter().copied().map(CaseDescriptor::from_strategy));
    } else {
        info!("Skipping CUDA cases: no CUDA-capable device");
    }
    cases
}

/// Every target × kernel × work-group size, in that nesting order.
///
/// Targets sharing a device name get their enumeration index appended so
/// labels stay distinct.
pub fn opencl_cases(targets: &[ComputeTarget], matrix: &OpenClMatrix) -> Vec<CaseDescriptor> {
    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for target in targets {
        *name_counts.entry(target.name.as_str()).or_default() += 1;
    }

    let mut cases = Vec::with_capacity(targets.len() * matrix.kernels.len() * matrix.work_group_sizes.len());
    for target in targets {
        let device_name = if name_counts[target.name.as_str()] > 1 {
            format!("{}#{}", target.name, target.index)
        } else {
            target.name.clone()
        };
        for &kernel in &matrix.kernels {
            for &wg in &matrix.work_group_sizes {
                cases.push(CaseDescriptor::opencl(target.clone(), &device_name, kernel, wg));
            }
        }
    }
    cases
}

/// Static cases followed by the OpenCL enumeration.
pub fn register_cases(manager: &AccelerationManager, matrix: &OpenClMatrix) -> Vec<CaseDescriptor> {
    let mut cases = static_cases(manager);
    let dynamic = opencl_cases(manager.opencl_targets(), matrix);
    info!(
        static_cases = cases.len(),
        opencl_cases = dynamic.len(),
        "Registered benchmark cases"
    );
    cases.extend(dynamic);
    cases
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::accel::manager::sample_target;
    use crate::accel::{CpuFeatures, Precision};

    fn manager(cuda: usize, targets: Vec<ComputeTarget>) -> AccelerationManager {
        AccelerationManager::from_parts(CpuFeatures::default(), cuda, targets)
    }

    #[test]
    fn test_phase_transitions() {
        let mut phase = CasePhase::Registered;
        phase = phase.advance();
        assert_eq!(phase, CasePhase::Constructed);
        phase = phase.advance().advance();
        assert_eq!(phase, CasePhase::Reported);
        assert_eq!(phase.advance(), CasePhase::Reported);
        assert_eq!(CasePhase::Failed.advance(), CasePhase::Failed);
    }

    #[test]
    fn test_no_cuda_devices_means_no_cuda_cases() {
        let cases = static_cases(&manager(0, Vec::new()));
        assert!(!cases.is_empty());
        assert!(cases.iter().all(|c| !c.label.starts_with("cuda/")));
        assert_eq!(cases[0].label, "scalar/f32");
    }

    #[test]
    fn test_cuda_devices_register_cuda_cases() {
        let cases = static_cases(&manager(1, Vec::new()));
        let labels: Vec<&str> = cases.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"cuda/f32"));
        assert!(labels.contains(&"cuda/f64"));
    }

    #[test]
    fn test_undetected_simd_is_skipped() {
        let cases = static_cases(&manager(0, Vec::new()));
        assert!(cases.iter().all(|c| !c.label.starts_with("avx2/")));
        assert!(cases.iter().all(|c| !c.label.starts_with("neon/")));
    }

    #[test]
    fn test_zero_targets_zero_dynamic_cases() {
        assert!(opencl_cases(&[], &OpenClMatrix::default()).is_empty());
    }

    #[test]
    fn test_opencl_cross_product_labels() {
        let targets = vec![sample_target(0, "Device A"), sample_target(1, "Device B")];
        let matrix = OpenClMatrix {
            kernels: KernelVariant::ALL.to_vec(),
            work_group_sizes: vec![64, 256],
        };
        let cases = opencl_cases(&targets, &matrix);
        assert_eq!(cases.len(), 12);

        let labels: HashSet<&str> = cases.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels.len(), 12);
        assert!(labels.contains("opencl/reduce_tree/wg:64/Device A"));
        assert!(labels.contains("opencl/reduce_kahan/wg:256/Device B"));
        for case in &cases {
            assert!(case.label.starts_with("opencl/reduce_"));
            assert!(case.label.contains("/wg:"));
            assert!(case.label.ends_with("Device A") || case.label.ends_with("Device B"));
            assert_eq!(case.backend(), Backend::OpenCl);
        }
    }

    #[test]
    fn test_same_named_targets_stay_distinct() {
        let targets = vec![sample_target(0, "GPU"), sample_target(1, "GPU")];
        let matrix = OpenClMatrix {
            kernels: vec![KernelVariant::ReduceTree],
            work_group_sizes: vec![128],
        };
        let labels: Vec<String> = opencl_cases(&targets, &matrix).into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["opencl/reduce_tree/wg:128/GPU#0", "opencl/reduce_tree/wg:128/GPU#1"]);
    }

    #[test]
    fn test_register_appends_dynamic_after_static() {
        let cases = register_cases(&manager(0, vec![sample_target(0, "Device A")]), &OpenClMatrix::default());
        let first_opencl = cases.iter().position(|c| c.backend() == Backend::OpenCl).unwrap();
        assert!(cases[..first_opencl].iter().all(|c| c.backend() != Backend::OpenCl));
        assert_eq!(cases.len() - first_opencl, 9);
    }

    #[test]
    fn test_construct_static_case() {
        let data = Dataset::filled(1024, 1.0).unwrap();
        let case = CaseDescriptor::from_strategy(Strategy::Scalar(Precision::F32));
        assert_eq!(case.construct(&data).unwrap().sum().unwrap(), 1024.0);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_construct_opencl_without_runtime_fails() {
        let data = Dataset::filled(1024, 1.0).unwrap();
        let case = CaseDescriptor::opencl(sample_target(0, "Device A"), "Device A", KernelVariant::ReduceTree, 64);
        assert!(case.construct(&data).is_err());
    }
}
