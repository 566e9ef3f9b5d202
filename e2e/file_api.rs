//! E2E Test Suite 02: backing-store behavior through the public API.
//!
//! Exercises the `FILE_*` flag surface end to end: effective-flag
//! reporting, huge-page fallback, preload, and the flag subsets each
//! entry point accepts.

use countmin::file::{
    FileMap, FILE_ANONYMOUS, FILE_CREATE, FILE_HUGETLB, FILE_PRELOAD, FILE_PRIVATE, FILE_READONLY,
    FILE_SHARED, FILE_TRUNCATE, FILE_WRITABLE,
};
use countmin::sketch::Sketch;
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// Effective flags
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn anonymous_sketches_report_anonymous_flags() {
    let sketch = Sketch::create(100, 3, None, 0, 0).unwrap();
    assert_eq!(
        sketch.flags(),
        FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS
    );
}

#[test]
fn file_backed_sketches_report_shared_flags() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sketch.cms");

    let sketch = Sketch::create(100, 3, Some(&path), 0, 0).unwrap();
    assert_eq!(sketch.flags(), FILE_CREATE | FILE_WRITABLE | FILE_SHARED);
    drop(sketch);

    let sketch = Sketch::open(&path, 0).unwrap();
    assert_eq!(sketch.flags(), FILE_WRITABLE | FILE_SHARED);
    drop(sketch);

    let sketch = Sketch::open(&path, FILE_READONLY).unwrap();
    assert_eq!(sketch.flags(), FILE_READONLY | FILE_SHARED);
    drop(sketch);

    let sketch = Sketch::open(&path, FILE_PRIVATE).unwrap();
    assert_eq!(sketch.flags(), FILE_WRITABLE | FILE_PRIVATE);

    let sketch = Sketch::load(&path, 0).unwrap();
    assert_eq!(
        sketch.flags(),
        FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Best-effort flags
// ─────────────────────────────────────────────────────────────────────────────

/// Huge pages are rarely configured in test environments; the request
/// must succeed either way, dropping the flag if the kernel refuses.
#[test]
fn hugetlb_request_falls_back_silently() {
    let sketch = Sketch::create(1 << 16, 255, None, FILE_HUGETLB, 0).unwrap();
    let flags = sketch.flags();
    assert_eq!(
        flags & !FILE_HUGETLB,
        FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS
    );
}

#[test]
fn preload_touches_every_page_without_changing_answers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sketch.cms");

    let mut sketch = Sketch::create(1 << 14, 255, Some(&path), 0, 0).unwrap();
    for i in 0..256u32 {
        sketch.add(&i.to_le_bytes(), u64::from(i) + 1);
    }
    drop(sketch);

    let plain = Sketch::open(&path, FILE_READONLY).unwrap();
    let preloaded = Sketch::open(&path, FILE_READONLY | FILE_PRELOAD).unwrap();
    assert!(preloaded.flags() & FILE_PRELOAD != 0);
    for i in 0..256u32 {
        assert_eq!(
            preloaded.get(&i.to_le_bytes()),
            plain.get(&i.to_le_bytes())
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flag subsets per entry point
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn each_entry_point_rejects_foreign_flags() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("region");
    FileMap::create(Some(&path), 4096, 0).unwrap();

    // create: no READONLY / PRIVATE / SHARED
    for flags in [FILE_READONLY, FILE_PRIVATE, FILE_SHARED] {
        let error = FileMap::create(None, 4096, flags).unwrap_err();
        assert_eq!(error.kind_name(), "invalid-argument");
    }
    // open: no TRUNCATE
    let error = FileMap::open(&path, FILE_TRUNCATE).unwrap_err();
    assert_eq!(error.kind_name(), "invalid-argument");
    // load: HUGETLB only
    let error = FileMap::load(&path, FILE_READONLY).unwrap_err();
    assert_eq!(error.kind_name(), "invalid-argument");
}

#[test]
fn sketch_constructors_propagate_flag_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sketch.cms");
    Sketch::create(100, 3, Some(&path), 0, 0).unwrap();

    assert!(Sketch::create(100, 3, None, FILE_READONLY, 0).is_err());
    assert!(Sketch::open(&path, FILE_TRUNCATE).is_err());
    assert!(Sketch::load(&path, FILE_PRELOAD).is_err());
}
