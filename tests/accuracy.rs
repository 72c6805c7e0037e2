//! Numerical properties of the accumulators, exercised through the public API.

use sumbench::accel::{AccelerationManager, FixedDiscovery, Precision, Strategy};
use sumbench::bench::measure::relative_error;
use sumbench::dataset::Dataset;

fn error_of(strategy: Strategy, data: &Dataset) -> f64 {
    let acc = strategy.build(data).unwrap();
    relative_error(data.expected_sum(), acc.sum().unwrap())
}

#[test]
fn test_expected_sum_is_element_count() {
    for n in [1usize, 7, 1024, 1 << 20] {
        assert_eq!(Dataset::filled(n, 1.0).unwrap().expected_sum(), n as f64);
    }
}

#[test]
fn test_naive_f32_error_grows_with_length() {
    let small = Dataset::filled(1 << 24, 1.0).unwrap();
    let large = Dataset::filled(1 << 25, 1.0).unwrap();
    let naive = Strategy::Scalar(Precision::F32);

    assert_eq!(error_of(naive, &small), 0.0);
    let large_err = error_of(naive, &large);
    assert!(large_err > 0.0);
    // Stalls at 2^24, so half the input is lost.
    assert!((large_err - 0.5).abs() < 1e-9);
}

#[test]
fn test_kahan_beats_naive() {
    let data = Dataset::filled((1 << 24) + (1 << 20), 1.0).unwrap();
    let naive = error_of(Strategy::Scalar(Precision::F32), &data);
    let kahan = error_of(Strategy::Kahan, &data);
    assert!(kahan < naive);
}

#[test]
fn test_fractional_fill() {
    let data = Dataset::filled(1 << 20, 0.1).unwrap();
    let naive = error_of(Strategy::Scalar(Precision::F32), &data);
    let kahan = error_of(Strategy::Kahan, &data);
    let wide = error_of(Strategy::Scalar(Precision::F64), &data);
    assert!(kahan <= naive);
    assert!(wide < 1e-6);
}

#[test]
fn test_repeated_invocation_is_stable() {
    let data = Dataset::filled(100_003, 0.25).unwrap();
    let snapshot = data.as_slice().to_vec();
    let manager = AccelerationManager::discover(&FixedDiscovery::none());

    for strategy in Strategy::CPU {
        if strategy.check_available(&manager).is_err() {
            continue;
        }
        let acc = strategy.build(&data).unwrap();
        let first = acc.sum().unwrap();
        let second = acc.sum().unwrap();
        if matches!(strategy, Strategy::Scalar(_) | Strategy::Kahan | Strategy::Unseq) {
            assert_eq!(first, second, "{}", strategy.label());
        }
        assert!(first > 0.0, "{}", strategy.label());
    }
    assert_eq!(data.as_slice(), &snapshot[..]);
}
