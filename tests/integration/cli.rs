#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("weft.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn demo_runs_every_scenario() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "[cluster]\nnum_shards = 3\n");
    let output = cargo_bin_cmd!("weft")
        .arg("--config")
        .arg(&config)
        .arg("demo")
        .output()
        .expect("run weft demo");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    for scenario in 1..=5 {
        assert!(stdout.contains(&format!("scenario {scenario} ")), "{stdout}");
    }
    assert!(!stdout.contains("FAILED"), "{stdout}");
}

#[test]
fn demo_json_reports_pass() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "");
    let output = cargo_bin_cmd!("weft")
        .args(["--format", "json", "--shards", "2", "--config"])
        .arg(&config)
        .arg("demo")
        .output()
        .expect("run weft demo");
    assert!(output.status.success());
    let reports: Value = serde_json::from_slice(&output.stdout).expect("json output");
    let reports = reports.as_array().expect("array of reports");
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r["passed"] == Value::Bool(true)));
}

#[test]
fn config_prints_effective_values() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "[shard]\ncache_capacity = 64\n");
    let output = cargo_bin_cmd!("weft")
        .args(["--shards", "5", "--config"])
        .arg(&config)
        .arg("config")
        .output()
        .expect("run weft config");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("num_shards = 5"), "{stdout}");
    assert!(stdout.contains("cache_capacity = 64"), "{stdout}");
}

#[test]
fn stress_reports_totals() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "[coordinator]\ncache_update_interval_ms = 10\n");
    let output = cargo_bin_cmd!("weft")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .args([
            "stress", "--nodes", "12", "--edges", "20", "--clients", "3", "--requests", "15",
        ])
        .output()
        .expect("run weft stress");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).expect("json output");
    let answered = report["reachable"].as_u64().unwrap() + report["unreachable"].as_u64().unwrap();
    let deletes = report["deletes"].as_u64().unwrap();
    assert_eq!(answered + deletes, 45);
}

#[test]
fn bad_config_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(&dir, "[cluster]\nnum_shards = 0\n");
    let output = cargo_bin_cmd!("weft")
        .arg("--config")
        .arg(&config)
        .arg("config")
        .output()
        .expect("run weft config");
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).expect("utf8");
    assert!(stderr.contains("error: invalid config"), "{stderr}");

    let missing = dir.path().join("missing.toml");
    cargo_bin_cmd!("weft")
        .arg("--config")
        .arg(&missing)
        .arg("config")
        .assert()
        .failure();
}
