//! End-to-end tests for the pipeworker CLI.
//!
//! Commands that start engines need the `pipeworker-engine` binary next to
//! the CLI, which exists once the whole workspace has been built.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Temporary directory holding geometry files.
struct TestInputs {
    temp_dir: TempDir,
}

impl TestInputs {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn write(&self, filename: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(filename);
        fs::write(&path, contents).expect("Failed to write input");
        path
    }

    fn dimer(&self, filename: &str, distance: f64) -> PathBuf {
        self.write(
            filename,
            &format!("2\ndimer\nAr 0.0 0.0 0.0\nAr {} 0.0 0.0\n", distance),
        )
    }
}

/// The engine binary built alongside the CLI, if any.
fn engine_binary() -> Option<PathBuf> {
    let path = assert_cmd::cargo::cargo_bin("pipeworker").with_file_name("pipeworker-engine");
    path.exists().then_some(path)
}

fn pipeworker() -> Command {
    Command::cargo_bin("pipeworker").expect("Failed to find pipeworker binary")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("non UTF-8 temp path")
}

// =============================================================================
// Argument handling
// =============================================================================

#[test]
fn test_help_lists_commands() {
    pipeworker()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("parse-input")));
}

#[test]
fn test_run_requires_files() {
    pipeworker()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILES"));
}

#[test]
fn test_run_nonexistent_geometry() {
    pipeworker()
        .args(["run", "/nonexistent/geometry.xyz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read geometry"));
}

#[test]
fn test_run_malformed_geometry() {
    let inputs = TestInputs::new();
    let path = inputs.write("broken.xyz", "3\nonly one atom\nAr 0 0 0\n");

    pipeworker()
        .args(["run", path_arg(&path)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("XYZ header announces 3 atoms"));
}

#[test]
fn test_run_rejects_unknown_unit() {
    let inputs = TestInputs::new();
    let path = inputs.dimer("a.xyz", 2.0);

    pipeworker()
        .args(["run", path_arg(&path), "--unit", "furlong"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("furlong"));
}

#[test]
fn test_max_iterations_needs_optimize() {
    let inputs = TestInputs::new();
    let path = inputs.dimer("a.xyz", 2.0);

    pipeworker()
        .args(["run", path_arg(&path), "--max-iterations", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("optimizer"));
}

#[test]
fn test_missing_engine_reported() {
    let inputs = TestInputs::new();
    let path = inputs.dimer("a.xyz", 2.0);

    pipeworker()
        .args(["run", path_arg(&path), "--engine", "/nonexistent/engine"])
        .assert()
        .failure();
}

#[test]
fn test_parse_input_nonexistent_file() {
    pipeworker()
        .args(["parse-input", "/nonexistent/input.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

// =============================================================================
// Commands against the bundled engine
// =============================================================================

#[test]
fn test_run_single_points() {
    let Some(engine) = engine_binary() else {
        eprintln!("skipping: pipeworker-engine not built");
        return;
    };
    let inputs = TestInputs::new();
    let a = inputs.dimer("near.xyz", 1.9);
    let b = inputs.dimer("far.xyz", 2.4);

    let output = pipeworker()
        .args(["run", path_arg(&a), path_arg(&b), "-j", "2", "--gradients"])
        .args(["--engine", path_arg(&engine)])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "pipeworker run should succeed. stderr: {}",
        stderr
    );
    assert!(stdout.contains("near"), "stdout: {}", stdout);
    assert!(stdout.contains("far"), "stdout: {}", stdout);
    assert!(stdout.contains("max gradient"), "stdout: {}", stdout);
    assert!(
        stdout.contains("Completed 2 calculations"),
        "stdout: {}",
        stdout
    );

    // Input order is kept in the report.
    let near = stdout.find("near").unwrap_or(usize::MAX);
    let far = stdout.find("far").unwrap_or(0);
    assert!(near < far, "stdout: {}", stdout);
}

#[test]
fn test_run_json_output() {
    let Some(engine) = engine_binary() else {
        eprintln!("skipping: pipeworker-engine not built");
        return;
    };
    let inputs = TestInputs::new();
    let path = inputs.dimer("pair.xyz", 2.0);

    let output = pipeworker()
        .args(["run", path_arg(&path), "--json", "--unit", "ev"])
        .args(["--engine", path_arg(&engine)])
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report should be valid JSON");
    let entries = report.as_array().expect("report should be a list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "pair");
    assert_eq!(entries[0]["ok"], true);
    assert!(entries[0]["energy"].is_f64());
}

#[test]
fn test_run_reports_failed_optimization() {
    let Some(engine) = engine_binary() else {
        eprintln!("skipping: pipeworker-engine not built");
        return;
    };
    let inputs = TestInputs::new();
    let path = inputs.dimer("stretched.xyz", 2.4);

    pipeworker()
        .args(["run", path_arg(&path), "--optimize", "--max-iterations", "1"])
        .args(["--engine", path_arg(&engine)])
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("1 of 1 calculations failed"));
}

#[test]
fn test_parse_input() {
    let Some(engine) = engine_binary() else {
        eprintln!("skipping: pipeworker-engine not built");
        return;
    };
    let inputs = TestInputs::new();
    let path = inputs.write("settings.in", "epsilon 0.002\nsigma 3.4\n");

    let output = pipeworker()
        .args(["parse-input", path_arg(&path), "--program", "pair"])
        .args(["--engine", path_arg(&engine)])
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("output should be valid JSON");
    assert_eq!(parsed["program"], "pair");
    assert!(parsed["input"].is_object());
}
