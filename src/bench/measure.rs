//! The per-case timed loop and the metrics it publishes.

use std::hint::black_box;

use crate::accel::{AccelError, Accumulator};
use crate::bench::timing::{Counter, State};
use crate::dataset::Dataset;

pub const ELEMENTS_PER_SECOND: &str = "elements_per_second";
pub const BYTES_PER_SECOND: &str = "bytes_per_second";
pub const ERROR_PERCENT: &str = "error_percent";

/// `|expected - observed| / expected`. Zero expected sums are rejected when
/// the dataset is built, so the division is always defined.
pub fn relative_error(expected: f64, observed: f64) -> f64 {
    ((expected - observed) / expected).abs()
}

/// What the last invocation in a run produced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observation {
    pub sum: f64,
    pub relative_error: f64,
}

/// Invoke `accumulator` once per iteration, then publish the rate and error
/// counters from the lead thread.
pub fn measure(state: &mut State, accumulator: &dyn Accumulator, dataset: &Dataset) -> Result<Observation, AccelError> {
    let expected = dataset.expected_sum();
    let mut observation = Observation::default();

    while state.keep_running() {
        let sum = black_box(accumulator.sum()?);
        observation = Observation {
            sum,
            relative_error: relative_error(expected, sum),
        };
    }

    if state.thread_index() == 0 {
        state.set_counter(
            ELEMENTS_PER_SECOND,
            Counter::iteration_invariant_rate(dataset.len() as f64),
        );
        state.set_counter(
            BYTES_PER_SECOND,
            Counter::iteration_invariant_rate(dataset.byte_len() as f64),
        );
        state.set_counter(ERROR_PERCENT, Counter::plain(observation.relative_error * 100.0));
    }
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::accel::cpu::{KahanAccumulator, ScalarAccumulator};
    use crate::bench::timing::{run_repetitions, TimingConfig};

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(1024.0, 1024.0), 0.0);
        assert_eq!(relative_error(100.0, 90.0), 0.1);
        assert_eq!(relative_error(100.0, 110.0), relative_error(100.0, 90.0));
    }

    #[test]
    fn test_small_dataset_publishes_all_counters() {
        let data = Dataset::filled(1024, 1.0).unwrap();
        assert_eq!(data.expected_sum(), 1024.0);
        let acc = ScalarAccumulator::<f32>::new(&data);
        let config = TimingConfig {
            min_time: Duration::from_millis(1),
            ..TimingConfig::default()
        };

        let samples = run_repetitions(&config, |state| measure(state, &acc, &data)).unwrap();
        let sample = &samples[0];
        assert_eq!(sample.output.sum, 1024.0);
        assert!(sample.counters[ERROR_PERCENT].abs() < 1e-9);
        assert!(sample.counters[ELEMENTS_PER_SECOND] > 0.0);
        let ratio = sample.counters[BYTES_PER_SECOND] / sample.counters[ELEMENTS_PER_SECOND];
        assert!((ratio - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_percent_reflects_drift() {
        // f32 stops counting at 2^24.
        let len = (1usize << 24) + 4096;
        let data = Dataset::filled(len, 1.0).unwrap();
        let naive = ScalarAccumulator::<f32>::new(&data);
        let kahan = KahanAccumulator::new(&data);
        let config = TimingConfig {
            min_time: Duration::ZERO,
            ..TimingConfig::default()
        };

        let naive_err = run_repetitions(&config, |s| measure(s, &naive, &data)).unwrap()[0].counters[ERROR_PERCENT];
        let kahan_err = run_repetitions(&config, |s| measure(s, &kahan, &data)).unwrap()[0].counters[ERROR_PERCENT];
        assert!(naive_err > 0.0);
        assert!(kahan_err < naive_err);
    }

    #[test]
    fn test_secondary_threads_do_not_publish() {
        let data = Dataset::filled(64, 1.0).unwrap();
        let acc = ScalarAccumulator::<f64>::new(&data);
        let mut state = State::new(2, 1);
        let observation = measure(&mut state, &acc, &data).unwrap();
        assert_eq!(observation.sum, 64.0);
        assert!(state.counters().is_empty());
    }
}
