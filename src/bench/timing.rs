//! Iteration loop, wall-clock sampling and repetition handling.
//!
//! A case body receives a [`State`] and loops on [`State::keep_running`]; the
//! runner decides how many iterations that is. Calibration grows the count until
//! one run lasts at least `min_time`, and that run becomes the first sample.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::accel::AccelError;

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Minimum wall time of one measured run.
    pub min_time: Duration,
    /// Measured runs per case (after calibration picks the iteration count).
    pub repetitions: u32,
    /// Threads running the case body concurrently.
    pub threads: usize,
    /// Hard cap on iterations per run.
    pub max_iterations: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_time: Duration::from_millis(500),
            repetitions: 1,
            threads: 1,
            max_iterations: 1_000_000_000,
        }
    }
}

/// How a counter value is turned into the reported number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Reported as-is
    Plain,
    /// Per-iteration amount, reported as `value * iterations / seconds`
    /// with iterations summed over every thread of the run
    IterationInvariantRate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Counter {
    pub value: f64,
    pub kind: CounterKind,
}

impl Counter {
    pub fn plain(value: f64) -> Self {
        Self {
            value,
            kind: CounterKind::Plain,
        }
    }

    pub fn iteration_invariant_rate(value: f64) -> Self {
        Self {
            value,
            kind: CounterKind::IterationInvariantRate,
        }
    }

    pub fn finalize(&self, iterations: u64, elapsed: Duration) -> f64 {
        match self.kind {
            CounterKind::Plain => self.value,
            CounterKind::IterationInvariantRate => {
                let secs = elapsed.max(Duration::from_nanos(1)).as_secs_f64();
                self.value * iterations as f64 / secs
            }
        }
    }
}

/// Per-thread view of one timed run.
#[derive(Debug)]
pub struct State {
    iterations: u64,
    remaining: u64,
    thread_index: usize,
    started: Option<Instant>,
    elapsed: Duration,
    counters: BTreeMap<String, Counter>,
}

impl State {
    pub fn new(iterations: u64, thread_index: usize) -> Self {
        Self {
            iterations,
            remaining: iterations,
            thread_index,
            started: None,
            elapsed: Duration::ZERO,
            counters: BTreeMap::new(),
        }
    }

    /// Returns true while iterations remain. The clock starts on the first
    /// call and stops on the call that returns false.
    pub fn keep_running(&mut self) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        if self.remaining == 0 {
            self.elapsed = started.elapsed();
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn set_counter(&mut self, name: &str, counter: Counter) {
        self.counters.insert(name.to_string(), counter);
    }

    pub fn counters(&self) -> &BTreeMap<String, Counter> {
        &self.counters
    }
}

/// One measured run.
#[derive(Debug, Clone)]
pub struct Sample<T> {
    pub iterations: u64,
    pub elapsed: Duration,
    /// Finalized counters published by the lead thread.
    pub counters: BTreeMap<String, f64>,
    /// What the lead thread's body returned.
    pub output: T,
}

impl<T> Sample<T> {
    pub fn ns_per_iteration(&self) -> f64 {
        self.elapsed.as_nanos() as f64 / self.iterations.max(1) as f64
    }
}

/// Run `body` once with `iterations` on `threads` threads.
fn run_once<F, T>(iterations: u64, threads: usize, body: &F) -> Result<Sample<T>, AccelError>
where
    F: Fn(&mut State) -> Result<T, AccelError> + Sync,
    T: Send,
{
    let threads = threads.max(1);
    let mut finished: Vec<(State, T)> = if threads == 1 {
        let mut state = State::new(iterations, 0);
        let output = body(&mut state)?;
        vec![(state, output)]
    } else {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|index| {
                    scope.spawn(move || {
                        let mut state = State::new(iterations, index);
                        body(&mut state).map(|output| (state, output))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect::<Result<Vec<_>, AccelError>>()
        })?
    };

    let elapsed = finished
        .iter()
        .map(|(state, _)| state.elapsed())
        .max()
        .unwrap_or_default();
    let total_iterations: u64 = finished.iter().map(|(state, _)| state.iterations()).sum();
    let (lead, output) = finished.swap_remove(0);
    let counters = lead
        .counters()
        .iter()
        .map(|(name, c)| (name.clone(), c.finalize(total_iterations, elapsed)))
        .collect();

    Ok(Sample {
        iterations,
        elapsed,
        counters,
        output,
    })
}

/// Next iteration count to try after a run of `current` took `elapsed`.
pub fn next_iterations(current: u64, elapsed: Duration, config: &TimingConfig) -> u64 {
    let ratio = elapsed.as_secs_f64() / config.min_time.as_secs_f64().max(f64::MIN_POSITIVE);
    // Overshoot the target by 40%, but never grow more than 10x per step.
    let multiplier = if ratio > 0.1 { (1.4 / ratio).min(10.0) } else { 10.0 };
    let next = (current as f64 * multiplier).ceil() as u64;
    next.max(current + 1).min(config.max_iterations)
}

/// Calibrate, then collect `config.repetitions` samples with a fixed
/// iteration count.
pub fn run_repetitions<F, T>(config: &TimingConfig, body: F) -> Result<Vec<Sample<T>>, AccelError>
where
    F: Fn(&mut State) -> Result<T, AccelError> + Sync,
    T: Send,
{
    let mut iterations = 1u64;
    let first = loop {
        let sample = run_once(iterations, config.threads, &body)?;
        if sample.elapsed >= config.min_time || iterations >= config.max_iterations {
            break sample;
        }
        let next = next_iterations(iterations, sample.elapsed, config);
        debug!(iterations, next, elapsed_us = sample.elapsed.as_micros() as u64, "calibrating");
        iterations = next;
    };

    let repetitions = config.repetitions.max(1) as usize;
    let mut samples = Vec::with_capacity(repetitions);
    samples.push(first);
    while samples.len() < repetitions {
        samples.push(run_once(iterations, config.threads, &body)?);
    }
    Ok(samples)
}

/// Per-iteration timing aggregated over repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingSummary {
    pub iterations: u64,
    pub repetitions: usize,
    pub mean_ns: f64,
    pub min_ns: f64,
    pub max_ns: f64,
}

pub fn summarize<T>(samples: &[Sample<T>]) -> Option<TimingSummary> {
    let first = samples.first()?;
    let per_iter: Vec<f64> = samples.iter().map(Sample::ns_per_iteration).collect();
    let mean_ns = per_iter.iter().sum::<f64>() / per_iter.len() as f64;
    let min_ns = per_iter.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ns = per_iter.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(TimingSummary {
        iterations: first.iterations,
        repetitions: samples.len(),
        mean_ns,
        min_ns,
        max_ns,
    })
}
