//! A memory-mapped Count-Min sketch with conservative update.
//!
//! The sketch upper-bounds the multiplicity of every byte-string key seen
//! in a stream, in space that does not grow with the stream. Three hashed
//! rows of bit-packed cells back each estimate; queries take the minimum
//! across the rows, and updates advance only the cells tied for that
//! minimum.
//!
//! Two cell representations cover the full counting range:
//!
//! * **exact**: 1, 2, 4, 8, 16, or 32-bit counters, chosen as the
//!   smallest width covering the configured `max_value`; estimates never
//!   undercount.
//! * **approximate**: when `max_value` exceeds 32 bits, cells hold a
//!   19-bit exponent/significand code counting to 2⁴⁵ − 1 with bounded
//!   relative error (see [`approx`]).
//!
//! Sketches live in anonymous memory or in memory-mapped files with a
//! fixed little-endian format, so a sketch built by one process can be
//! reopened, merged, or queried by another.
//!
//! ```no_run
//! use countmin::Sketch;
//!
//! let mut sketch = Sketch::create(1 << 20, 1000, None, 0, 0)?;
//! sketch.inc(b"apple");
//! sketch.add(b"orange", 2);
//! assert!(sketch.get(b"apple") >= 1);
//! # Ok::<(), countmin::Error>(())
//! ```

pub mod approx;
pub mod cli;
pub mod error;
pub mod file;
pub mod hash;
pub mod header;
pub mod random;
pub mod sketch;

#[cfg(feature = "c-abi")]
pub mod abi;

pub use error::{Error, Result};
pub use file::{
    FILE_ANONYMOUS, FILE_CREATE, FILE_HUGETLB, FILE_PRELOAD, FILE_PRIVATE, FILE_READONLY,
    FILE_SHARED, FILE_TRUNCATE, FILE_WRITABLE,
};
pub use random::Random;
pub use sketch::{
    Filter, InnerProduct, Sketch, SketchMode, SKETCH_DEFAULT_MAX_VALUE, SKETCH_DEFAULT_WIDTH,
    SKETCH_DEPTH, SKETCH_MAX_MAX_VALUE, SKETCH_MAX_WIDTH, SKETCH_MIN_WIDTH,
};
