//! sumbench -- measure float-array summation across CPU, SIMD and GPU backends.
//!
//! Every accumulation strategy sums the same shared dataset. The harness times
//! each one, reports throughput, and reports how far its result drifts from the
//! exact sum.

pub mod accel;
pub mod bench;
pub mod config;
pub mod dataset;

use anyhow::{Context, Result};

use crate::accel::AccelerationManager;
use crate::bench::{CaseDescriptor, CaseReport, OpenClMatrix, RunContext, TimingConfig};
use crate::config::BenchConfig;
use crate::dataset::Dataset;

/// Everything one harness run needs besides the discovered hardware.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub elements: usize,
    pub fill: f32,
    pub timing: TimingConfig,
    pub opencl: OpenClMatrix,
    /// Keep only cases whose label contains this.
    pub filter: Option<String>,
}

impl RunOptions {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            elements: config.workload.elements,
            fill: config.workload.fill,
            timing: config.timing_config(),
            opencl: config.opencl_matrix(),
            filter: None,
        }
    }

    /// Cases this run would measure, without allocating the dataset.
    pub fn cases(&self, manager: &AccelerationManager) -> Vec<CaseDescriptor> {
        bench::plan(manager, &self.opencl, self.filter.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub context: RunContext,
    pub reports: Vec<CaseReport>,
}

/// Build the dataset, register the cases and measure them in order.
pub fn run(options: &RunOptions, manager: &AccelerationManager) -> Result<RunOutcome> {
    // 1. Workload
    tracing::info!(elements = options.elements, fill = options.fill, "Allocating dataset");
    let dataset = Dataset::filled(options.elements, options.fill).context("failed to build dataset")?;

    // 2. Registration (static catalogue, then OpenCL enumeration)
    let cases = options.cases(manager);

    // 3. Measurement
    let reports = bench::measure_all(&cases, &dataset, &options.timing);
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    tracing::info!(cases = reports.len(), failed, "Run complete");

    let context = RunContext {
        date: chrono::Utc::now(),
        host_threads: rayon::current_num_threads(),
        timing_threads: options.timing.threads,
        elements: dataset.len(),
        fill: dataset.fill(),
        expected_sum: dataset.expected_sum(),
        dataset_bytes: dataset.byte_len(),
    };
    Ok(RunOutcome { context, reports })
}
