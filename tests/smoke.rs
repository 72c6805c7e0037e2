//! Smoke tests -- verify the binary runs and reports on a small workload.

use assert_cmd::Command;
use predicates::prelude::*;

fn sumbench() -> Command {
    let mut cmd = Command::cargo_bin("sumbench").unwrap();
    cmd.env_remove("SUMBENCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    sumbench()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("summation throughput and accuracy"))
        .stdout(predicates::str::contains("--min-time"))
        .stdout(predicates::str::contains("--filter"));
}

#[test]
fn test_cli_version() {
    sumbench()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("sumbench"));
}

#[test]
fn test_list_cpu_only() {
    sumbench()
        .args(["--list", "--cpu-only", "1024"])
        .assert()
        .success()
        .stdout(predicates::str::contains("scalar/f32"))
        .stdout(predicates::str::contains("kahan/f32"))
        .stdout(predicates::str::contains("par_unseq/f32"))
        .stdout(predicates::str::contains("No CUDA-capable devices found"))
        .stdout(predicates::str::contains("cuda/f").not())
        .stdout(predicates::str::contains("opencl/").not());
}

#[test]
fn test_list_respects_filter() {
    sumbench()
        .args(["--list", "--cpu-only", "--filter", "threads/", "1024"])
        .assert()
        .success()
        .stdout(predicates::str::contains("threads/f32"))
        .stdout(predicates::str::contains("scalar/f32").not());
}

#[test]
fn test_console_run_small_workload() {
    sumbench()
        .args(["--cpu-only", "--min-time", "0.001", "--filter", "scalar/f32", "1024"])
        .assert()
        .success()
        .stdout(predicates::str::contains("expected sum: 1024"))
        .stdout(predicates::str::contains("scalar/f32"))
        .stdout(predicates::str::contains("/s"));
}

#[test]
fn test_json_run_is_parseable() {
    let output = sumbench()
        .args([
            "--cpu-only",
            "--format",
            "json",
            "--min-time",
            "0.001",
            "--filter",
            "kahan",
            "1024",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["context"]["elements"], 1024);
    assert_eq!(value["context"]["expected_sum"], 1024.0);
    let benchmarks = value["benchmarks"].as_array().unwrap();
    assert!(!benchmarks.is_empty());
    for bench in benchmarks {
        assert!(bench["name"].as_str().unwrap().contains("kahan"));
        let counters = &bench["counters"];
        assert!(counters["elements_per_second"].as_f64().unwrap() > 0.0);
        assert!(counters["bytes_per_second"].as_f64().unwrap() > 0.0);
        assert!(counters["error_percent"].as_f64().unwrap() < 1e-9);
    }
}

#[test]
fn test_zero_elements_rejected() {
    sumbench().args(["--cpu-only", "0"]).assert().failure();
}

#[test]
fn test_config_file_sets_workload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sumbench.toml");
    std::fs::write(&path, "[workload]\nelements = 2048\n\n[timing]\nmin_time_ms = 1\n").unwrap();

    sumbench()
        .args(["--cpu-only", "--filter", "scalar/f64", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("Elements: 2048"))
        .stdout(predicates::str::contains("scalar/f64"));
}

#[test]
fn test_missing_config_file_fails() {
    sumbench()
        .args(["--cpu-only", "--list", "--config", "/nonexistent/sumbench.toml"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to read config file"));
}

#[test]
fn test_unreadable_env_config_warns_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    sumbench()
        .current_dir(dir.path())
        .env("SUMBENCH_CONFIG", "/nonexistent/sumbench.toml")
        .args(["--cpu-only", "--list", "1024"])
        .assert()
        .success()
        .stdout(predicates::str::contains("scalar/f32"))
        .stderr(predicates::str::contains("could not be loaded"));
}
