//! E2E Test Suite 03: approximate mode at scale.
//!
//! Long-running statistical checks on the 19-bit codec and on sketches
//! holding counts beyond the dense range, including the accuracy bound
//! on a Zipf-distributed workload.

use countmin::approx;
use countmin::random::Random;
use countmin::sketch::{Sketch, SketchMode};
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// Codec convergence across magnitudes
// ─────────────────────────────────────────────────────────────────────────────

/// After N probabilistic increments the decoded value stays within
/// ±2.5% of N, for N from 2¹⁵ to 2²³.
#[test]
fn codec_increment_tracks_large_counts() {
    let mut random = Random::new(20120901);
    for shift in 15..=23u32 {
        let count = 1u64 << shift;
        let mut code = 0u64;
        for _ in 0..count {
            code = approx::inc(code, &mut random);
        }
        let value = approx::decode(code) as f64;
        let n = count as f64;
        assert!(value >= n * 0.975, "count 2^{shift}: {value}");
        assert!(value <= n * 1.025, "count 2^{shift}: {value}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sketch-level accuracy
// ─────────────────────────────────────────────────────────────────────────────

/// Zipf workload with per-key counts reaching well past the dense range:
/// every estimate stays above 97.5% of the true count.
#[test]
fn zipf_workload_keeps_the_one_sided_bound() {
    const NUM_KEYS: u64 = 512;
    const TOP_COUNT: u64 = 1 << 17;

    let mut sketch = Sketch::create(NUM_KEYS * 4, 0, None, 0, 42).unwrap();
    assert_eq!(sketch.mode(), SketchMode::Approx);

    let mut counts = Vec::new();
    for i in 0..NUM_KEYS {
        let count = TOP_COUNT / (i + 1);
        for _ in 0..count {
            sketch.inc(&i.to_le_bytes());
        }
        counts.push(count);
    }
    for (i, &count) in counts.iter().enumerate() {
        let estimate = sketch.get(&(i as u64).to_le_bytes()) as f64;
        assert!(
            estimate >= count as f64 * 0.975,
            "key {i}: {estimate} vs true {count}"
        );
    }
}

/// `add` covers the whole 45-bit range without drifting more than the
/// codec's granularity.
#[test]
fn add_reaches_the_top_of_the_range() {
    let mut sketch = Sketch::create(256, 0, None, 0, 0).unwrap();
    let max_value = sketch.max_value();

    let estimate = sketch.add(b"key", max_value / 2);
    assert!(estimate as f64 >= max_value as f64 / 2.0 * 0.999);

    let estimate = sketch.add(b"key", max_value);
    assert_eq!(approx::encode(estimate), approx::encode(max_value));
    assert_eq!(
        approx::encode(sketch.get(b"key")),
        approx::encode(max_value)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence of approximate sketches
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn approx_sketches_round_trip_through_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("approx.cms");

    let mut sketch = Sketch::create(1 << 12, 0, None, 0, 7).unwrap();
    for _ in 0..(1 << 16) {
        sketch.inc(b"heavy");
    }
    sketch.add(b"medium", 40_000);
    sketch.set(b"light", 3);
    let expected: Vec<u64> = [b"heavy".as_ref(), b"medium".as_ref(), b"light".as_ref()]
        .iter()
        .map(|key| sketch.get(key))
        .collect();

    sketch.save(&path, 0).unwrap();
    let loaded = Sketch::load(&path, 0).unwrap();
    assert_eq!(loaded.value_size(), 19);
    assert_eq!(loaded.mode(), SketchMode::Approx);
    for (key, expected) in [b"heavy".as_ref(), b"medium".as_ref(), b"light".as_ref()]
        .iter()
        .zip(expected)
    {
        assert_eq!(loaded.get(key), expected);
    }
}

/// Shrinking an approximate sketch to a small max_value flips it into
/// exact mode with the clamped counts.
#[test]
fn shrink_can_cross_from_approx_to_exact() {
    let mut source = Sketch::create(1 << 10, 0, None, 0, 3).unwrap();
    sketch_fill(&mut source);

    let shrunk = Sketch::shrink(&source, 0, 15, None, None, 0).unwrap();
    assert_eq!(shrunk.mode(), SketchMode::Exact);
    assert_eq!(shrunk.max_value(), 15);
    assert_eq!(shrunk.get(b"light"), 3);
    assert_eq!(shrunk.get(b"heavy"), 15);
}

fn sketch_fill(sketch: &mut Sketch) {
    sketch.set(b"light", 3);
    sketch.add(b"heavy", 1 << 20);
}
