//! Registration and measurement driver.

pub mod case;
pub mod measure;
pub mod report;
pub mod timing;

use tracing::{debug, info, warn};

use crate::accel::AccelerationManager;
use crate::dataset::Dataset;

pub use case::{CaseDescriptor, CaseKind, CasePhase, OpenClMatrix};
pub use report::{CaseReport, RunContext};
pub use timing::TimingConfig;

/// Register every case and keep those whose label contains `filter`.
pub fn plan(manager: &AccelerationManager, matrix: &OpenClMatrix, filter: Option<&str>) -> Vec<CaseDescriptor> {
    let cases = case::register_cases(manager, matrix);
    match filter {
        Some(pattern) => {
            let total = cases.len();
            let kept: Vec<_> = cases.into_iter().filter(|c| c.label.contains(pattern)).collect();
            info!(filter = pattern, kept = kept.len(), total, "Filtered benchmark cases");
            kept
        }
        None => cases,
    }
}

/// Construct, measure and report one case. Failures end up in the report.
pub fn run_case(case: &CaseDescriptor, dataset: &Dataset, timing: &TimingConfig) -> CaseReport {
    let mut phase = CasePhase::Registered;

    let accumulator = match case.construct(dataset) {
        Ok(acc) => acc,
        Err(e) => {
            warn!(case = %case.label, error = %e, "Case construction failed");
            return CaseReport::failed(case, e.to_string());
        }
    };
    phase = phase.advance();
    debug!(case = %case.label, backend = %accumulator.backend(), ?phase, "Case constructed");

    phase = phase.advance();
    debug!(case = %case.label, ?phase, "Measuring");
    let result = timing::run_repetitions(timing, |state| measure::measure(state, accumulator.as_ref(), dataset));

    match result {
        Ok(samples) => {
            let report = CaseReport::measured(case, &samples);
            debug!(case = %case.label, phase = ?phase.advance(), "Case reported");
            report
        }
        Err(e) => {
            warn!(case = %case.label, error = %e, "Case invocation failed");
            CaseReport::failed(case, e.to_string())
        }
    }
}

/// Run every case in order. A failing case never stops the others.
pub fn measure_all(cases: &[CaseDescriptor], dataset: &Dataset, timing: &TimingConfig) -> Vec<CaseReport> {
    cases
        .iter()
        .map(|case| {
            info!(case = %case.label, "Running case");
            run_case(case, dataset, timing)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::accel::manager::sample_target;
    use crate::accel::opencl::KernelVariant;
    use crate::accel::{CpuFeatures, Precision, Strategy};
    use crate::bench::measure::{ELEMENTS_PER_SECOND, ERROR_PERCENT};

    fn quick() -> TimingConfig {
        TimingConfig {
            min_time: Duration::from_millis(1),
            ..TimingConfig::default()
        }
    }

    #[test]
    fn test_plan_filters_by_substring() {
        let manager = AccelerationManager::from_parts(CpuFeatures::default(), 0, Vec::new());
        let cases = plan(&manager, &OpenClMatrix::default(), Some("scalar/"));
        let labels: Vec<&str> = cases.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["scalar/f32", "scalar/f64", "scalar/f16"]);
    }

    #[test]
    fn test_plan_without_filter_keeps_everything() {
        let manager = AccelerationManager::from_parts(CpuFeatures::default(), 0, vec![sample_target(0, "Device A")]);
        let cases = plan(&manager, &OpenClMatrix::default(), None);
        assert_eq!(cases.len(), 9 + 9);
    }

    #[test]
    fn test_run_case_reports_metrics() {
        let data = Dataset::filled(1024, 1.0).unwrap();
        let case = CaseDescriptor::from_strategy(Strategy::Scalar(Precision::F32));
        let report = run_case(&case, &data, &quick());
        assert_eq!(report.phase, CasePhase::Reported);
        assert_eq!(report.last_sum, Some(1024.0));
        assert!(report.counter(ELEMENTS_PER_SECOND).unwrap() > 0.0);
        assert!(report.counter(ERROR_PERCENT).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_construction_failure_is_case_local() {
        let data = Dataset::filled(1024, 1.0).unwrap();
        // Zero-sized work-groups are rejected whether or not an OpenCL runtime exists.
        let broken = CaseDescriptor::opencl(sample_target(0, "Device A"), "Device A", KernelVariant::ReduceTree, 0);
        let cases = vec![broken, CaseDescriptor::from_strategy(Strategy::Kahan)];

        let reports = measure_all(&cases, &data, &quick());
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_failed());
        assert!(reports[0].error.is_some());
        assert!(!reports[1].is_failed());
        assert_eq!(reports[1].last_sum, Some(1024.0));
    }
}
