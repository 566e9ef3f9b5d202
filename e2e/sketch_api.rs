//! E2E Test Suite 01: sketch persistence round trips.
//!
//! Drives the public `Sketch` API against real files: create/open/load/
//! save cycles, header validation on open, and the interaction between
//! persistence and the update operations.

use std::path::PathBuf;

use countmin::file::{FILE_PRIVATE, FILE_READONLY, FILE_TRUNCATE};
use countmin::sketch::{Sketch, SketchMode};
use tempfile::TempDir;

fn sketch_path(dir: &TempDir) -> PathBuf {
    dir.path().join("sketch.cms")
}

/// Populate a sketch with the three-fruit walk-through used across the
/// suite: banana = 2, apple = 3 (saturated), orange = 3 (saturated).
fn populate(sketch: &mut Sketch) {
    sketch.set(b"banana", 2);
    for expected in [1, 2, 3, 3] {
        assert_eq!(sketch.inc(b"apple"), expected);
    }
    assert_eq!(sketch.add(b"orange", 2), 2);
    assert_eq!(sketch.add(b"orange", 100), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Create / open cycles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn file_backed_updates_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);

    let mut sketch = Sketch::create(100, 3, Some(&path), 0, 0).unwrap();
    populate(&mut sketch);
    drop(sketch);

    let sketch = Sketch::open(&path, FILE_READONLY).unwrap();
    assert_eq!(sketch.width(), 100);
    assert_eq!(sketch.max_value(), 3);
    assert_eq!(sketch.mode(), SketchMode::Exact);
    assert_eq!(sketch.get(b"banana"), 2);
    assert_eq!(sketch.get(b"apple"), 3);
    assert_eq!(sketch.get(b"orange"), 3);
}

#[test]
fn private_open_leaves_the_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);

    let mut sketch = Sketch::create(100, 255, Some(&path), 0, 0).unwrap();
    sketch.set(b"key", 7);
    drop(sketch);

    let mut sketch = Sketch::open(&path, FILE_PRIVATE).unwrap();
    sketch.clear();
    assert_eq!(sketch.get(b"key"), 0);
    drop(sketch);

    let sketch = Sketch::open(&path, FILE_READONLY).unwrap();
    assert_eq!(sketch.get(b"key"), 7);
}

#[test]
fn duplicate_creation_needs_truncate() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);

    Sketch::create(100, 3, Some(&path), 0, 0).unwrap();
    let error = Sketch::create(100, 3, Some(&path), 0, 0).unwrap_err();
    assert_eq!(error.kind_name(), "invalid-argument");

    let sketch = Sketch::create(64, 15, Some(&path), FILE_TRUNCATE, 9).unwrap();
    assert_eq!(sketch.width(), 64);
    assert_eq!(sketch.max_value(), 15);
    assert_eq!(sketch.seed(), 9);
    assert_eq!(sketch.get(b"banana"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Save / load
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn save_then_load_answers_identically() {
    let dir = TempDir::new().unwrap();
    let saved = dir.path().join("saved.cms");

    let mut sketch = Sketch::create(100, 3, None, 0, 0).unwrap();
    populate(&mut sketch);
    sketch.save(&saved, 0).unwrap();

    let loaded = Sketch::load(&saved, 0).unwrap();
    assert_eq!(loaded.get(b"banana"), 2);
    assert_eq!(loaded.get(b"apple"), 3);
    assert_eq!(loaded.get(b"orange"), 3);

    // The loaded sketch is an in-memory copy; clearing it does not
    // disturb the file.
    let mut loaded = loaded;
    loaded.clear();
    let reloaded = Sketch::load(&saved, 0).unwrap();
    assert_eq!(reloaded.get(b"apple"), 3);
}

#[test]
fn save_respects_the_truncate_flag() {
    let dir = TempDir::new().unwrap();
    let saved = dir.path().join("saved.cms");

    let sketch = Sketch::create(100, 3, None, 0, 0).unwrap();
    sketch.save(&saved, 0).unwrap();
    assert!(sketch.save(&saved, 0).is_err());
    sketch.save(&saved, FILE_TRUNCATE).unwrap();
}

#[test]
fn filter_then_clear_persist_through_save() {
    let dir = TempDir::new().unwrap();
    let saved = dir.path().join("saved.cms");

    let mut sketch = Sketch::create(100, 3, None, 0, 0).unwrap();
    populate(&mut sketch);
    sketch.filter(Some(&|x| x / 2));
    assert_eq!(sketch.get(b"banana"), 1);
    assert_eq!(sketch.get(b"apple"), 1);
    assert_eq!(sketch.get(b"orange"), 1);

    sketch.clear();
    sketch.save(&saved, 0).unwrap();
    let loaded = Sketch::load(&saved, 0).unwrap();
    assert_eq!(loaded.get(b"banana"), 0);
    assert_eq!(loaded.get(b"apple"), 0);
    assert_eq!(loaded.get(b"orange"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Combinators against files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn copy_and_shrink_can_target_files() {
    let dir = TempDir::new().unwrap();
    let copy_path = dir.path().join("copy.cms");
    let shrink_path = dir.path().join("shrunk.cms");

    let mut source = Sketch::create(100, 3, None, 0, 0).unwrap();
    populate(&mut source);

    let copy = Sketch::copy(&source, Some(&copy_path), 0).unwrap();
    assert_eq!(copy.get(b"banana"), source.get(b"banana"));
    drop(copy);
    let copy = Sketch::open(&copy_path, FILE_READONLY).unwrap();
    assert_eq!(copy.get(b"apple"), 3);

    let shrunk = Sketch::shrink(&source, 50, 15, Some(&|x| x / 2), Some(&shrink_path), 0).unwrap();
    assert_eq!(shrunk.width(), 50);
    assert_eq!(shrunk.get(b"banana"), 1);
    drop(shrunk);
    let shrunk = Sketch::open(&shrink_path, FILE_READONLY).unwrap();
    assert_eq!(shrunk.max_value(), 15);
    assert_eq!(shrunk.get(b"banana"), 1);
}

#[test]
fn shrink_rejects_a_width_that_does_not_divide() {
    let source = Sketch::create(50, 15, None, 0, 0).unwrap();
    let error = Sketch::shrink(&source, 17, 1, None, None, 0).unwrap_err();
    assert_eq!(error.kind_name(), "invalid-argument");
}

#[test]
fn merge_combines_two_file_backed_sketches() {
    let dir = TempDir::new().unwrap();
    let left_path = dir.path().join("left.cms");
    let right_path = dir.path().join("right.cms");

    let mut left = Sketch::create(128, 0xFFFF, Some(&left_path), 0, 5).unwrap();
    left.add(b"shared", 10);
    let mut right = Sketch::create(128, 0xFFFF, Some(&right_path), 0, 5).unwrap();
    right.add(b"shared", 32);

    left.merge(&right, None, None).unwrap();
    assert_eq!(left.get(b"shared"), 42);
    drop(left);

    let reopened = Sketch::open(&left_path, FILE_READONLY).unwrap();
    assert_eq!(reopened.get(b"shared"), 42);
}

// ─────────────────────────────────────────────────────────────────────────────
// Header validation on open
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn open_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage");
    std::fs::write(&path, vec![0xAB; 4096]).unwrap();

    let error = Sketch::open(&path, 0).unwrap_err();
    assert_eq!(error.kind_name(), "corrupt-file");
}

#[test]
fn open_rejects_a_corrupted_magic() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);
    Sketch::create(100, 3, Some(&path), 0, 0).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let error = Sketch::open(&path, 0).unwrap_err();
    assert_eq!(error.kind_name(), "corrupt-file");
}

#[test]
fn open_rejects_a_truncated_file() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);
    Sketch::create(100, 3, Some(&path), 0, 0).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 64]).unwrap();

    let error = Sketch::open(&path, 0).unwrap_err();
    assert_eq!(error.kind_name(), "corrupt-file");
}

#[test]
fn open_rejects_a_header_with_tampered_shape() {
    let dir = TempDir::new().unwrap();
    let path = sketch_path(&dir);
    Sketch::create(100, 3, Some(&path), 0, 0).unwrap();

    // Claim a different width without recomputing the derived fields.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[8..16].copy_from_slice(&200u64.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let error = Sketch::open(&path, 0).unwrap_err();
    assert_eq!(error.kind_name(), "corrupt-file");
}

#[test]
fn open_of_a_missing_file_is_an_io_failure() {
    let dir = TempDir::new().unwrap();
    let error = Sketch::open(&dir.path().join("missing.cms"), 0).unwrap_err();
    assert_eq!(error.kind_name(), "io-failure");
}
