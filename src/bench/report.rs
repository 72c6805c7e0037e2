//! Case results and their console/JSON rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::accel::Backend;
use crate::bench::case::{CaseDescriptor, CasePhase};
use crate::bench::measure::{Observation, BYTES_PER_SECOND, ELEMENTS_PER_SECOND, ERROR_PERCENT};
use crate::bench::timing::{summarize, Sample, TimingSummary};

/// Outcome of one case, measured or failed.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub backend: Backend,
    pub phase: CasePhase,
    #[serde(flatten)]
    pub timing: Option<TimingSummary>,
    /// Sum returned by the last invocation of the last repetition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sum: Option<f64>,
    /// Counters of the last repetition.
    pub counters: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseReport {
    pub fn measured(case: &CaseDescriptor, samples: &[Sample<Observation>]) -> Self {
        let last = samples.last();
        Self {
            name: case.label.clone(),
            backend: case.backend(),
            phase: CasePhase::Reported,
            timing: summarize(samples),
            last_sum: last.map(|s| s.output.sum),
            counters: last.map(|s| s.counters.clone()).unwrap_or_default(),
            error: None,
        }
    }

    pub fn failed(case: &CaseDescriptor, error: String) -> Self {
        Self {
            name: case.label.clone(),
            backend: case.backend(),
            phase: CasePhase::Failed,
            timing: None,
            last_sum: None,
            counters: BTreeMap::new(),
            error: Some(error),
        }
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    pub fn is_failed(&self) -> bool {
        self.phase == CasePhase::Failed
    }
}

/// Run-wide facts printed before the results.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub date: DateTime<Utc>,
    pub host_threads: usize,
    pub timing_threads: usize,
    pub elements: usize,
    pub fill: f32,
    pub expected_sum: f64,
    pub dataset_bytes: usize,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    context: &'a RunContext,
    benchmarks: &'a [CaseReport],
}

/// Scale `value` with an SI prefix, e.g. `1.25 G`.
pub fn format_si(value: f64) -> String {
    const PREFIXES: [(f64, &str); 4] = [(1e12, "T"), (1e9, "G"), (1e6, "M"), (1e3, "k")];
    for (scale, prefix) in PREFIXES {
        if value.abs() >= scale {
            return format!("{:.2} {}", value / scale, prefix);
        }
    }
    format!("{:.2} ", value)
}

/// Per-iteration time with a readable unit.
pub fn format_duration_ns(ns: f64) -> String {
    if ns >= 1e9 {
        format!("{:.3} s", ns / 1e9)
    } else if ns >= 1e6 {
        format!("{:.3} ms", ns / 1e6)
    } else if ns >= 1e3 {
        format!("{:.3} us", ns / 1e3)
    } else {
        format!("{:.0} ns", ns)
    }
}

pub fn format_table(context: &RunContext, reports: &[CaseReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", context.date.to_rfc3339());
    let _ = writeln!(
        out,
        "Elements: {} ({} bytes), fill: {}, expected sum: {}",
        context.elements, context.dataset_bytes, context.fill, context.expected_sum
    );
    let _ = writeln!(
        out,
        "Host threads: {}, timing threads: {}\n",
        context.host_threads, context.timing_threads
    );
    let _ = writeln!(
        out,
        "{:<40} | {:>12} | {:>10} | {:>12} | {:>12} | Error %",
        "Case", "Time/iter", "Iterations", "Elements/s", "Bytes/s"
    );
    let _ = writeln!(out, "{:-<40}-|-{:-<12}-|-{:-<10}-|-{:-<12}-|-{:-<12}-|-{:-<12}", "", "", "", "", "", "");

    for report in reports {
        match (&report.timing, &report.error) {
            (Some(timing), None) => {
                let _ = writeln!(
                    out,
                    "{:<40} | {:>12} | {:>10} | {:>12} | {:>12} | {:.6}",
                    report.name,
                    format_duration_ns(timing.mean_ns),
                    timing.iterations,
                    format!("{}/s", format_si(report.counter(ELEMENTS_PER_SECOND).unwrap_or(0.0))),
                    format!("{}B/s", format_si(report.counter(BYTES_PER_SECOND).unwrap_or(0.0))),
                    report.counter(ERROR_PERCENT).unwrap_or(0.0),
                );
            }
            _ => {
                let _ = writeln!(
                    out,
                    "{:<40} | FAILED: {}",
                    report.name,
                    report.error.as_deref().unwrap_or("no samples")
                );
            }
        }
    }
    out
}

pub fn to_json(context: &RunContext, reports: &[CaseReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        context,
        benchmarks: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{Precision, Strategy};

    fn context() -> RunContext {
        RunContext {
            date: Utc::now(),
            host_threads: 8,
            timing_threads: 1,
            elements: 1024,
            fill: 1.0,
            expected_sum: 1024.0,
            dataset_bytes: 4096,
        }
    }

    fn measured() -> CaseReport {
        let mut counters = BTreeMap::new();
        counters.insert(ELEMENTS_PER_SECOND.to_string(), 2.5e9);
        counters.insert(BYTES_PER_SECOND.to_string(), 1.0e10);
        counters.insert(ERROR_PERCENT.to_string(), 0.0);
        CaseReport {
            name: "scalar/f32".to_string(),
            backend: Backend::Scalar,
            phase: CasePhase::Reported,
            timing: Some(TimingSummary {
                iterations: 1000,
                repetitions: 1,
                mean_ns: 410.0,
                min_ns: 410.0,
                max_ns: 410.0,
            }),
            last_sum: Some(1024.0),
            counters,
            error: None,
        }
    }

    fn failed() -> CaseReport {
        let case = CaseDescriptor::from_strategy(Strategy::Cuda(Precision::F32));
        CaseReport::failed(&case, "cuda backend failed to initialize: out of memory".to_string())
    }

    #[test]
    fn test_format_si() {
        assert_eq!(format_si(2.5e9), "2.50 G");
        assert_eq!(format_si(1.0e10), "10.00 G");
        assert_eq!(format_si(1234.0), "1.23 k");
        assert_eq!(format_si(12.0), "12.00 ");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ns(410.0), "410 ns");
        assert_eq!(format_duration_ns(2_500.0), "2.500 us");
        assert_eq!(format_duration_ns(1.5e9), "1.500 s");
    }

    #[test]
    fn test_table_lists_measured_and_failed_cases() {
        let table = format_table(&context(), &[measured(), failed()]);
        assert!(table.contains("scalar/f32"));
        assert!(table.contains("2.50 G/s"));
        assert!(table.contains("10.00 GB/s"));
        assert!(table.contains("cuda/f32"));
        assert!(table.contains("FAILED: cuda backend failed to initialize"));
        assert!(table.contains("expected sum: 1024"));
    }

    #[test]
    fn test_json_document_shape() {
        let json = to_json(&context(), &[measured(), failed()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["context"]["elements"], 1024);
        let benchmarks = value["benchmarks"].as_array().unwrap();
        assert_eq!(benchmarks.len(), 2);
        assert_eq!(benchmarks[0]["name"], "scalar/f32");
        assert_eq!(benchmarks[0]["iterations"], 1000);
        assert_eq!(benchmarks[0]["counters"]["elements_per_second"], 2.5e9);
        assert_eq!(benchmarks[1]["phase"], "failed");
        assert!(benchmarks[1]["error"].as_str().unwrap().contains("out of memory"));
        assert!(benchmarks[1].get("iterations").is_none());
    }
}
