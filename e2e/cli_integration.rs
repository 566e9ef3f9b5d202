//! E2E Test Suite 04: the `countmin` binary as a black box.
//!
//! Runs the real executable with `std::process::Command`: subcommand
//! dispatch, key streaming from files and stdin, exit codes, and the
//! `info` listing.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tempfile::TempDir;

/// Locate the `countmin` binary produced by Cargo.
fn countmin_bin() -> PathBuf {
    // CARGO_BIN_EXE_countmin is set by Cargo when running integration tests.
    // Fall back to walking up from the test binary location.
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_countmin") {
        return PathBuf::from(path);
    }
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("countmin");
    path
}

fn run(args: &[&str]) -> std::process::Output {
    Command::new(countmin_bin())
        .args(args)
        .output()
        .expect("failed to spawn countmin")
}

// ─────────────────────────────────────────────────────────────────────────────
// create / info
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn create_then_info_lists_the_header() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();

    let output = run(&["create", sketch_str, "--width", "100", "--max-value", "3"]);
    assert!(output.status.success(), "{output:?}");

    let output = run(&["info", sketch_str]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Width: 100"), "{stdout}");
    assert!(stdout.contains("Depth: 3"), "{stdout}");
    assert!(stdout.contains("MaxValue: 3"), "{stdout}");
    assert!(stdout.contains("Mode: exact"), "{stdout}");
}

#[test]
fn create_refuses_to_clobber_without_truncate() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();

    assert!(run(&["create", sketch_str]).status.success());

    let output = run(&["create", sketch_str]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error:"), "{stderr}");

    assert!(run(&["create", sketch_str, "--truncate"]).status.success());
}

#[test]
fn default_create_is_an_approx_sketch() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();

    assert!(run(&["create", sketch_str]).status.success());
    let stdout = String::from_utf8(run(&["info", sketch_str]).stdout).unwrap();
    assert!(stdout.contains("ValueSize: 19"), "{stdout}");
    assert!(stdout.contains("Mode: approx"), "{stdout}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Key streaming
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn inc_from_a_file_then_get_reports_counts() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();
    let keys = dir.path().join("keys.txt");
    std::fs::write(&keys, "apple\napple\nbanana\napple\n").unwrap();

    assert!(run(&["create", sketch_str, "--width", "1024", "--max-value", "255"])
        .status
        .success());
    assert!(run(&["inc", sketch_str, keys.to_str().unwrap()])
        .status
        .success());

    let queries = dir.path().join("queries.txt");
    std::fs::write(&queries, "apple\nbanana\ncherry\n").unwrap();
    let output = run(&["get", sketch_str, queries.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout, "apple\t3\nbanana\t1\ncherry\t0\n");
}

#[test]
fn set_and_add_parse_tab_separated_values() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();
    let pairs = dir.path().join("pairs.txt");
    std::fs::write(&pairs, "banana\t2\norange\t5\n").unwrap();

    assert!(run(&["create", sketch_str, "--width", "1024", "--max-value", "255"])
        .status
        .success());
    assert!(run(&["set", sketch_str, pairs.to_str().unwrap()])
        .status
        .success());
    assert!(run(&["add", sketch_str, pairs.to_str().unwrap()])
        .status
        .success());

    let queries = dir.path().join("queries.txt");
    std::fs::write(&queries, "banana\norange\n").unwrap();
    let stdout =
        String::from_utf8(run(&["get", sketch_str, queries.to_str().unwrap()]).stdout).unwrap();
    assert_eq!(stdout, "banana\t4\norange\t10\n");
}

#[test]
fn keys_stream_from_stdin_when_no_files_are_given() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();

    assert!(run(&["create", sketch_str, "--width", "1024", "--max-value", "255"])
        .status
        .success());

    let mut child = Command::new(countmin_bin())
        .args(["inc", sketch_str])
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"stream\nstream\n")
        .unwrap();
    assert!(child.wait().unwrap().success());

    let mut child = Command::new(countmin_bin())
        .args(["get", sketch_str])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"stream\n").unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), "stream\t2\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure paths
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn missing_sketch_file_fails_with_a_message() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.cms");

    let output = run(&["get", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("cannot open sketch"), "{stderr}");
}

#[test]
fn malformed_pair_lines_fail_the_command() {
    let dir = TempDir::new().unwrap();
    let sketch = dir.path().join("sketch.cms");
    let sketch_str = sketch.to_str().unwrap();
    let bad = dir.path().join("bad.txt");
    std::fs::write(&bad, "no-tab-here\n").unwrap();

    assert!(run(&["create", sketch_str]).status.success());
    let output = run(&["set", sketch_str, bad.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("malformed"), "{stderr}");
}

#[test]
fn unknown_subcommands_are_usage_errors() {
    let output = run(&["frobnicate"]);
    assert!(!output.status.success());
}
