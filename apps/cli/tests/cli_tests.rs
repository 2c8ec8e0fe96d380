//! memtest-cli 端到端测试（Mock 硬件）

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

struct Cli {
    dir: TempDir,
}

impl Cli {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// 每个测试使用独立的配置文件
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("memtest-cli").unwrap();
        cmd.env("MEMTEST_CONFIG", self.dir.path().join("config.toml"));
        cmd.env_remove("RUST_LOG");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }
}

#[test]
fn test_capabilities_lists_reasons() {
    let cli = Cli::new();
    let table = cli.json(&["capabilities", "--backend", "keithley4200a"]);
    let operations = table[0]["operations"].as_array().unwrap();
    assert_eq!(operations.len(), 9);
    let sweep = operations
        .iter()
        .find(|op| op["operation"] == "width_sweep_with_reads")
        .unwrap();
    assert_eq!(sweep["supported"], false);
    assert!(sweep["reason"].as_str().unwrap().contains("staged"));

    let acquisitions = table[0]["acquisitions"].as_array().unwrap();
    assert_eq!(acquisitions.len(), 2);
    assert_eq!(acquisitions[0]["acquisition"], "two-phase acquisition");
    assert_eq!(acquisitions[0]["supported"], false);
    assert_eq!(acquisitions[1]["supported"], true);
}

#[test]
fn test_detect() {
    let cli = Cli::new();
    let detected = cli.json(&["detect", "192.168.0.10:8888"]);
    assert_eq!(detected["backend"], "keithley4200a");

    cli.cmd()
        .args(["detect", "lab-bench-7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[parameter]"));
}

#[test]
fn test_schedule_scenario() {
    let cli = Cli::new();
    let schedule = cli.json(&[
        "schedule", "--pattern", "1011", "--on", "100ms", "--off", "100ms", "--repeats", "2",
    ]);
    let starts: Vec<f64> = schedule["intervals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["start_s"].as_f64().unwrap())
        .collect();
    let expected = [0.0, 0.4, 0.6, 1.6, 2.0, 2.2];
    assert_eq!(starts.len(), expected.len());
    for (a, e) in starts.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{a} != {e}");
    }
}

#[test]
fn test_schedule_that_cannot_fit() {
    let cli = Cli::new();
    cli.cmd()
        .args(["schedule", "--pattern", "01", "--on", "1s", "--off", "1s", "--duration", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[timing]"));
}

#[test]
fn test_run_on_mock_hardware() {
    let cli = Cli::new();
    let output = cli.json(&[
        "run",
        "pulse_read_repeat",
        "--address",
        "192.168.0.10:8888",
        "--mock",
        "--param",
        "pulse_voltage=1.0",
        "--param",
        "pulse_width=100us",
        "--param",
        "delay_between=1ms",
        "--param",
        "num_cycles=5",
    ]);
    assert_eq!(output["backend"], "keithley4200a");
    assert_eq!(output["samples"], 6);
    assert_eq!(output["result"]["resistances"].as_array().unwrap().len(), 6);
}

#[test]
fn test_run_rejects_unsupported_operation() {
    let cli = Cli::new();
    cli.cmd()
        .args([
            "run",
            "retention_test",
            "--address",
            "192.168.0.10:8888",
            "--mock",
            "--param",
            "pulse_voltage=1.0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[capability]"));
}

#[test]
fn test_run_requires_mock() {
    let cli = Cli::new();
    cli.cmd()
        .args(["run", "pulse_read_repeat", "--address", "GPIB0::24::INSTR"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mock"));
}

#[test]
fn test_sync_on_mock_hardware() {
    let cli = Cli::new();
    let output = cli.json(&[
        "sync", "--pattern", "1", "--on", "100ms", "--off", "100ms", "--start-delay", "100ms",
        "--duration", "400ms", "--mock",
    ]);
    assert_eq!(output["protocol"], "two-phase");
    assert_eq!(output["fired"].as_array().unwrap().len(), 1);
    assert!(output["samples"].as_u64().unwrap() > 10);
}

#[test]
fn test_config_round_trip() {
    let cli = Cli::new();
    cli.cmd()
        .args(["config", "set", "sync.init_time_s", "0.8"])
        .assert()
        .success();
    cli.cmd()
        .args(["config", "get", "sync.init_time_s"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.8"));
    cli.cmd()
        .args(["config", "set", "sync.baseline_samples", "many"])
        .assert()
        .failure();
    cli.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_calibrate_from_file() {
    let cli = Cli::new();
    let timestamps: Vec<f64> = (0..40).map(|k| k as f64 * 0.1).collect();
    let resistances: Vec<f64> = timestamps
        .iter()
        .map(|&t| if t + 1e-9 >= 2.0 { 400.0 } else { 1000.0 })
        .collect();
    let path = cli.dir.path().join("result.json");
    std::fs::write(
        &path,
        serde_json::json!({ "timestamps": timestamps, "resistances": resistances }).to_string(),
    )
    .unwrap();

    let suggestion = cli.json(&["calibrate", path.to_str().unwrap(), "--desired", "1s"]);
    assert!((suggestion["offset_s"].as_f64().unwrap() + 1.0).abs() < 1e-9);
}
