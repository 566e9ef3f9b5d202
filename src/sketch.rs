//! The sketch engine: a three-row Count-Min sketch over a bit-packed,
//! memory-mapped counter table.
//!
//! A sketch answers "how many times has this byte string been seen" with
//! one-sided error: `get` never returns less than the true count in exact
//! mode, and tracks it within a small relative error in approximate mode.
//! Updates use the conservative rule (only the cells tied for the
//! current minimum advance), which keeps overestimation well below that
//! of a plain Count-Min sketch.
//!
//! The two modes share every code path up to a single branch on the cell
//! width: 1–32 bit cells hold plain counters; 19-bit cells hold
//! approximate codes (see [`crate::approx`]). Mode is fixed at creation
//! by `max_value`: anything beyond 32-bit counters switches to codes.
//!
//! Mutation requires `&mut Sketch`, so safe Rust rules out the torn
//! cross-word writes a concurrent C caller could observe; the library
//! itself performs no synchronization. A sketch opened with
//! [`FILE_READONLY`](crate::file::FILE_READONLY) must only be queried.

use std::path::Path;

use crate::approx::{self, APPROX_MAX_VALUE, APPROX_SIZE};
use crate::error::{Error, Result};
use crate::file::{FileMap, FILE_WRITABLE};
use crate::hash;
use crate::header::{Header, HEADER_SIZE};
use crate::random::Random;

/// Hash bits available per row index: one 128-bit hash split three ways.
pub const SKETCH_ID_SIZE: u64 = 128 / 3;
pub const SKETCH_MAX_ID: u64 = (1 << SKETCH_ID_SIZE) - 1;

pub const SKETCH_MIN_WIDTH: u64 = 1;
pub const SKETCH_MAX_WIDTH: u64 = SKETCH_MAX_ID + 1;
pub const SKETCH_DEFAULT_WIDTH: u64 = 1 << 20;

pub const SKETCH_MAX_MAX_VALUE: u64 = APPROX_MAX_VALUE;
pub const SKETCH_DEFAULT_MAX_VALUE: u64 = SKETCH_MAX_MAX_VALUE;

/// Number of rows. Fixed: the hash yields exactly three indices.
pub const SKETCH_DEPTH: u64 = 3;

/// `value_size` sentinel marking approximate mode.
pub const SKETCH_APPROX_VALUE_SIZE: u64 = APPROX_SIZE;

/// Which representation the cells use, decided once at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SketchMode {
    /// Cells are plain counters of 1, 2, 4, 8, 16, or 32 bits.
    Exact,
    /// Cells are 19-bit approximate codes.
    Approx,
}

/// Cell transform applied by [`Sketch::filter`], [`Sketch::shrink`], and
/// [`Sketch::merge`]. Receives and returns decoded counter values.
pub type Filter<'a> = &'a dyn Fn(u64) -> u64;

/// Result of [`Sketch::inner_product`]: the estimated dot product and
/// both operands' squared L2 norms, each minimized across the three rows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InnerProduct {
    pub product: f64,
    pub lhs_square_length: f64,
    pub rhs_square_length: f64,
}

/// A Count-Min sketch handle owning its backing region and PRNG.
#[derive(Debug)]
pub struct Sketch {
    file: FileMap,
    header: Header,
    table: *mut u64,
    random: Random,
}

// The handle owns the mapping and the PRNG outright.
unsafe impl Send for Sketch {}

impl Sketch {
    /// Create a sketch of `width` cells per row counting up to
    /// `max_value`, backed by a file at `path` or by anonymous memory.
    ///
    /// Zero `width` or `max_value` select the defaults (2²⁰ and 2⁴⁵ − 1);
    /// out-of-range requests are clamped, not rejected. `flags` are the
    /// creation subset of the `FILE_*` constants.
    pub fn create(
        width: u64,
        max_value: u64,
        path: Option<&Path>,
        flags: u32,
        seed: u64,
    ) -> Result<Sketch> {
        let width = if width == 0 {
            SKETCH_DEFAULT_WIDTH
        } else {
            width.clamp(SKETCH_MIN_WIDTH, SKETCH_MAX_WIDTH)
        };
        let max_value = if max_value == 0 {
            SKETCH_DEFAULT_MAX_VALUE
        } else {
            max_value.min(SKETCH_MAX_MAX_VALUE)
        };
        let header = Header::new(width, max_value, seed);
        let file = FileMap::create(path, header.file_size() as usize, flags)?;
        unsafe {
            std::ptr::copy_nonoverlapping(header.to_bytes().as_ptr(), file.addr(), HEADER_SIZE);
        }
        Ok(Sketch::assemble(file, header))
    }

    /// Map an existing sketch file. The header is fully cross-checked
    /// before the handle is returned.
    pub fn open(path: &Path, flags: u32) -> Result<Sketch> {
        Sketch::from_map(FileMap::open(path, flags)?)
    }

    /// Read a sketch file into anonymous memory: the file stays untouched
    /// no matter what is done to the sketch afterwards.
    pub fn load(path: &Path, flags: u32) -> Result<Sketch> {
        Sketch::from_map(FileMap::load(path, flags)?)
    }

    /// Write the sketch to a new file at `path` (creation flag subset).
    pub fn save(&self, path: &Path, flags: u32) -> Result<()> {
        self.file.save(path, flags)
    }

    fn from_map(file: FileMap) -> Result<Sketch> {
        let header_bytes =
            unsafe { std::slice::from_raw_parts(file.addr(), file.size().min(HEADER_SIZE)) };
        let header = Header::from_bytes(header_bytes)?;
        header.validate(file.size() as u64)?;
        Ok(Sketch::assemble(file, header))
    }

    fn assemble(file: FileMap, header: Header) -> Sketch {
        let table = unsafe { file.addr().add(HEADER_SIZE) } as *mut u64;
        let random = Random::new(header.seed());
        Sketch {
            file,
            header,
            table,
            random,
        }
    }

    pub fn width(&self) -> u64 {
        self.header.width()
    }
    pub fn width_mask(&self) -> u64 {
        self.header.width_mask()
    }
    pub fn depth(&self) -> u64 {
        self.header.depth()
    }
    pub fn max_value(&self) -> u64 {
        self.header.max_value()
    }
    pub fn value_mask(&self) -> u64 {
        self.header.value_mask()
    }
    pub fn value_size(&self) -> u64 {
        self.header.value_size()
    }
    pub fn seed(&self) -> u64 {
        self.header.seed()
    }
    pub fn table_size(&self) -> u64 {
        self.header.table_size()
    }
    pub fn file_size(&self) -> u64 {
        self.header.file_size()
    }
    /// Effective backing-store flags.
    pub fn flags(&self) -> u32 {
        self.file.flags()
    }

    pub fn mode(&self) -> SketchMode {
        if self.approx_mode() {
            SketchMode::Approx
        } else {
            SketchMode::Exact
        }
    }

    #[inline]
    fn approx_mode(&self) -> bool {
        self.header.value_size() == SKETCH_APPROX_VALUE_SIZE
    }

    /// Estimated multiplicity of `key`: the minimum of its three cells.
    pub fn get(&self, key: &[u8]) -> u64 {
        let cell_ids = self.cell_ids(key);
        if self.approx_mode() {
            self.approx_get(&cell_ids)
        } else {
            self.exact_get(&cell_ids)
        }
    }

    /// Raise `key`'s estimate to at least `value` (clamped to
    /// `max_value`). Cells already above the value are left alone: a cell
    /// may carry other keys' counts, and lowering it would damage their
    /// estimates.
    pub fn set(&mut self, key: &[u8], value: u64) {
        let cell_ids = self.cell_ids(key);
        if self.approx_mode() {
            self.approx_set(&cell_ids, value);
        } else {
            self.exact_set(&cell_ids, value);
        }
    }

    /// Count `key` once and return the new estimate. Only the cells tied
    /// for the minimum advance; the estimate saturates at `max_value`.
    pub fn inc(&mut self, key: &[u8]) -> u64 {
        let cell_ids = self.cell_ids(key);
        if self.approx_mode() {
            self.approx_inc(&cell_ids)
        } else {
            self.exact_inc(&cell_ids)
        }
    }

    /// Count `key` `value` times at once and return the new estimate.
    pub fn add(&mut self, key: &[u8], value: u64) -> u64 {
        let cell_ids = self.cell_ids(key);
        if self.approx_mode() {
            self.approx_add(&cell_ids, value)
        } else {
            self.exact_add(&cell_ids, value)
        }
    }

    /// Forget everything: zero the whole table.
    pub fn clear(&mut self) {
        debug_assert!(self.flags() & FILE_WRITABLE != 0);
        unsafe {
            std::ptr::write_bytes(
                self.table as *mut u8,
                0,
                self.header.table_size() as usize,
            );
        }
    }

    /// Rewrite every cell as `f(value)` clamped to `max_value`. In
    /// approximate mode the transform sees decoded values. `None` is the
    /// identity.
    pub fn filter(&mut self, f: Option<Filter>) {
        let Some(f) = f else { return };
        let max_value = self.header.max_value();
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..self.header.width() {
                let value = f(self.value_at(table_id, cell_id)).min(max_value);
                self.store_value(table_id, cell_id, value);
            }
        }
    }

    /// Duplicate `src` into a new sketch with the same shape and seed,
    /// optionally backed by a file at `path`.
    pub fn copy(src: &Sketch, path: Option<&Path>, flags: u32) -> Result<Sketch> {
        let target = Sketch::create(src.width(), src.max_value(), path, flags, src.seed())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.table as *const u8,
                target.table as *mut u8,
                src.header.table_size() as usize,
            );
        }
        Ok(target)
    }

    /// Rebuild `src` at a smaller `width` and/or `max_value`, optionally
    /// transforming every cell through `f` on the way.
    ///
    /// `width` must divide `src`'s width (0 keeps it; larger values are
    /// clamped down to it), so a key's cell in the target is always among
    /// the source cells folded onto it. Each target cell is the largest
    /// transformed source cell of its fold group, which preserves the
    /// one-sided upper bound for every key hashing there.
    pub fn shrink(
        src: &Sketch,
        width: u64,
        max_value: u64,
        f: Option<Filter>,
        path: Option<&Path>,
        flags: u32,
    ) -> Result<Sketch> {
        let width = match width {
            0 => src.width(),
            w => w.min(src.width()),
        };
        if src.width() % width != 0 {
            return Err(Error::InvalidArgument(
                "shrink width must divide the source width",
            ));
        }
        let max_value = match max_value {
            0 => src.max_value(),
            m => m.min(SKETCH_MAX_MAX_VALUE),
        };
        let mut target = Sketch::create(width, max_value, path, flags, src.seed())?;
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..width {
                let mut folded = 0;
                let mut source_id = cell_id;
                while source_id < src.width() {
                    let mut value = src.value_at(table_id, source_id);
                    if let Some(f) = f {
                        value = f(value);
                    }
                    folded = folded.max(value.min(max_value));
                    source_id += width;
                }
                target.store_value(table_id, cell_id, folded);
            }
        }
        Ok(target)
    }

    /// Accumulate `rhs` into `self`, cell by cell: each cell becomes the
    /// (optionally filtered) sum of the pair, clamped to `max_value`.
    /// The operands must agree on width, seed, and mode, otherwise their
    /// cells do not describe the same keys.
    pub fn merge(
        &mut self,
        rhs: &Sketch,
        lhs_filter: Option<Filter>,
        rhs_filter: Option<Filter>,
    ) -> Result<()> {
        self.check_shape(rhs)?;
        let max_value = self.header.max_value();
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..self.header.width() {
                let mut lhs_value = self.value_at(table_id, cell_id);
                if let Some(f) = lhs_filter {
                    lhs_value = f(lhs_value);
                }
                let mut rhs_value = rhs.value_at(table_id, cell_id);
                if let Some(f) = rhs_filter {
                    rhs_value = f(rhs_value);
                }
                let merged = lhs_value.saturating_add(rhs_value).min(max_value);
                self.store_value(table_id, cell_id, merged);
            }
        }
        Ok(())
    }

    /// Exchange the two handles' entire state, including backing regions
    /// and PRNG streams.
    pub fn swap(&mut self, rhs: &mut Sketch) {
        std::mem::swap(self, rhs);
    }

    /// Estimate the dot product of the two frequency vectors, along with
    /// both squared norms (for cosine similarity). Each quantity is a
    /// row-wise sum of products, minimized across the three rows.
    pub fn inner_product(&self, rhs: &Sketch) -> Result<InnerProduct> {
        self.check_shape(rhs)?;
        let mut products = [0.0f64; SKETCH_DEPTH as usize];
        let mut lhs_squares = [0.0f64; SKETCH_DEPTH as usize];
        let mut rhs_squares = [0.0f64; SKETCH_DEPTH as usize];
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..self.header.width() {
                let lhs_value = self.value_at(table_id, cell_id) as f64;
                let rhs_value = rhs.value_at(table_id, cell_id) as f64;
                products[table_id as usize] += lhs_value * rhs_value;
                lhs_squares[table_id as usize] += lhs_value * lhs_value;
                rhs_squares[table_id as usize] += rhs_value * rhs_value;
            }
        }
        let min3 = |row: [f64; 3]| row[0].min(row[1]).min(row[2]);
        Ok(InnerProduct {
            product: min3(products),
            lhs_square_length: min3(lhs_squares),
            rhs_square_length: min3(rhs_squares),
        })
    }

    fn check_shape(&self, rhs: &Sketch) -> Result<()> {
        if self.width() != rhs.width() {
            return Err(Error::InvalidArgument("operands must have equal widths"));
        }
        if self.seed() != rhs.seed() {
            return Err(Error::InvalidArgument("operands must share a seed"));
        }
        if self.mode() != rhs.mode() {
            return Err(Error::InvalidArgument("operands must be in the same mode"));
        }
        Ok(())
    }

    // ── Key → cell indices ──────────────────────────────────────────────

    #[inline]
    fn cell_ids(&self, key: &[u8]) -> [u64; 3] {
        let (low, high) = hash::hash128(key, self.header.seed());
        let mask = self.header.width_mask();
        if mask != 0 {
            [low & mask, high & mask, low.wrapping_add(high) & mask]
        } else {
            let width = self.header.width();
            [low % width, high % width, low.wrapping_add(high) % width]
        }
    }

    // ── Exact mode ──────────────────────────────────────────────────────

    fn exact_get(&self, cell_ids: &[u64; 3]) -> u64 {
        let mut value = self.read_cell(0, cell_ids[0]);
        value = value.min(self.read_cell(1, cell_ids[1]));
        value.min(self.read_cell(2, cell_ids[2]))
    }

    fn exact_set(&mut self, cell_ids: &[u64; 3], value: u64) {
        let value = value.min(self.header.max_value());
        for (table_id, &cell_id) in cell_ids.iter().enumerate() {
            if self.read_cell(table_id as u64, cell_id) < value {
                self.write_cell(table_id as u64, cell_id, value);
            }
        }
    }

    fn exact_inc(&mut self, cell_ids: &[u64; 3]) -> u64 {
        self.exact_add(cell_ids, 1)
    }

    fn exact_add(&mut self, cell_ids: &[u64; 3], value: u64) -> u64 {
        let values = [
            self.read_cell(0, cell_ids[0]),
            self.read_cell(1, cell_ids[1]),
            self.read_cell(2, cell_ids[2]),
        ];
        let old = values[0].min(values[1]).min(values[2]);
        let new = old.saturating_add(value).min(self.header.max_value());
        if new == old {
            return new;
        }
        for (table_id, &cell_value) in values.iter().enumerate() {
            if cell_value == old {
                self.write_cell(table_id as u64, cell_ids[table_id], new);
            }
        }
        new
    }

    // ── Approximate mode ────────────────────────────────────────────────

    fn approx_min_code(&self, cell_ids: &[u64; 3]) -> u64 {
        // Codes order the same way as their values, so the minimum code
        // is the minimum estimate.
        let mut code = self.read_cell(0, cell_ids[0]);
        code = code.min(self.read_cell(1, cell_ids[1]));
        code.min(self.read_cell(2, cell_ids[2]))
    }

    fn approx_get(&self, cell_ids: &[u64; 3]) -> u64 {
        approx::decode(self.approx_min_code(cell_ids))
    }

    fn approx_set(&mut self, cell_ids: &[u64; 3], value: u64) {
        let code = approx::encode(value.min(self.header.max_value()));
        for (table_id, &cell_id) in cell_ids.iter().enumerate() {
            if self.read_cell(table_id as u64, cell_id) < code {
                self.write_cell(table_id as u64, cell_id, code);
            }
        }
    }

    fn approx_inc(&mut self, cell_ids: &[u64; 3]) -> u64 {
        let codes = [
            self.read_cell(0, cell_ids[0]),
            self.read_cell(1, cell_ids[1]),
            self.read_cell(2, cell_ids[2]),
        ];
        let old = codes[0].min(codes[1]).min(codes[2]);
        let cap = approx::encode(self.header.max_value());
        let new = approx::inc(old, &mut self.random).min(cap);
        if new == old {
            return approx::decode(old);
        }
        for (table_id, &code) in codes.iter().enumerate() {
            if code == old {
                self.write_cell(table_id as u64, cell_ids[table_id], new);
            }
        }
        approx::decode(new)
    }

    fn approx_add(&mut self, cell_ids: &[u64; 3], value: u64) -> u64 {
        let codes = [
            self.read_cell(0, cell_ids[0]),
            self.read_cell(1, cell_ids[1]),
            self.read_cell(2, cell_ids[2]),
        ];
        let old = codes[0].min(codes[1]).min(codes[2]);
        let raised = approx::decode(old)
            .saturating_add(value)
            .min(self.header.max_value());
        let new = approx::encode(raised);
        if new == old {
            return approx::decode(old);
        }
        for (table_id, &code) in codes.iter().enumerate() {
            if code == old {
                self.write_cell(table_id as u64, cell_ids[table_id], new);
            }
        }
        approx::decode(new)
    }

    // ── Cell-level value access (mode-aware) ────────────────────────────

    fn value_at(&self, table_id: u64, cell_id: u64) -> u64 {
        let raw = self.read_cell(table_id, cell_id);
        if self.approx_mode() {
            approx::decode(raw)
        } else {
            raw
        }
    }

    fn store_value(&mut self, table_id: u64, cell_id: u64, value: u64) {
        let raw = if self.approx_mode() {
            approx::encode(value)
        } else {
            value
        };
        self.write_cell(table_id, cell_id, raw);
    }

    // ── Bit-packed cell I/O ─────────────────────────────────────────────
    //
    // The payload is an array of little-endian 64-bit words. A cell's
    // absolute bit offset is (table_id · width + cell_id) · value_size;
    // exact-mode widths divide 64 so only 19-bit cells ever straddle a
    // word boundary, and never more than one.

    #[inline]
    fn read_cell(&self, table_id: u64, cell_id: u64) -> u64 {
        let value_size = self.header.value_size();
        let bit = (table_id * self.header.width() + cell_id) * value_size;
        let index = (bit >> 6) as usize;
        let shift = bit & 63;
        let mask = (1u64 << value_size) - 1;
        unsafe {
            let low = *self.table.add(index) >> shift;
            if shift + value_size > 64 {
                (low | (*self.table.add(index + 1) << (64 - shift))) & mask
            } else {
                low & mask
            }
        }
    }

    #[inline]
    fn write_cell(&mut self, table_id: u64, cell_id: u64, value: u64) {
        debug_assert!(self.flags() & FILE_WRITABLE != 0);
        let value_size = self.header.value_size();
        let bit = (table_id * self.header.width() + cell_id) * value_size;
        let index = (bit >> 6) as usize;
        let shift = bit & 63;
        let mask = (1u64 << value_size) - 1;
        let value = value & mask;
        unsafe {
            let word = self.table.add(index);
            *word = (*word & !(mask << shift)) | (value << shift);
            if shift + value_size > 64 {
                let spill = 64 - shift;
                let next = self.table.add(index + 1);
                *next = (*next & !(mask >> spill)) | (value >> spill);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous(width: u64, max_value: u64) -> Sketch {
        Sketch::create(width, max_value, None, 0, 0).unwrap()
    }

    #[test]
    fn create_fills_in_the_derived_shape() {
        let sketch = anonymous(100, 3);
        assert_eq!(sketch.width(), 100);
        assert_eq!(sketch.width_mask(), 0);
        assert_eq!(sketch.depth(), 3);
        assert_eq!(sketch.max_value(), 3);
        assert_eq!(sketch.value_mask(), 3);
        assert_eq!(sketch.value_size(), 2);
        assert_eq!(sketch.table_size() % 64, 0);
        assert_eq!(sketch.file_size(), sketch.table_size() + HEADER_SIZE as u64);
        assert_eq!(sketch.mode(), SketchMode::Exact);
    }

    #[test]
    fn zero_arguments_select_the_defaults() {
        let sketch = anonymous(0, 0);
        assert_eq!(sketch.width(), SKETCH_DEFAULT_WIDTH);
        assert_eq!(sketch.width_mask(), SKETCH_DEFAULT_WIDTH - 1);
        assert_eq!(sketch.max_value(), SKETCH_MAX_MAX_VALUE);
        assert_eq!(sketch.value_size(), SKETCH_APPROX_VALUE_SIZE);
        assert_eq!(sketch.mode(), SketchMode::Approx);
    }

    #[test]
    fn set_inc_add_walk_through() {
        let mut sketch = anonymous(100, 3);

        sketch.set(b"banana", 2);
        assert_eq!(sketch.get(b"banana"), 2);

        assert_eq!(sketch.inc(b"apple"), 1);
        assert_eq!(sketch.inc(b"apple"), 2);
        assert_eq!(sketch.inc(b"apple"), 3);
        assert_eq!(sketch.inc(b"apple"), 3);

        assert_eq!(sketch.add(b"orange", 2), 2);
        assert_eq!(sketch.add(b"orange", 100), 3);

        assert_eq!(sketch.get(b"banana"), 2);
    }

    #[test]
    fn set_never_lowers_a_cell() {
        let mut sketch = anonymous(64, 255);
        sketch.set(b"key", 9);
        sketch.set(b"key", 4);
        assert_eq!(sketch.get(b"key"), 9);
        sketch.set(b"key", 200);
        assert_eq!(sketch.get(b"key"), 200);
    }

    #[test]
    fn inc_saturates_and_leaves_cells_alone() {
        let mut sketch = anonymous(64, 15);
        sketch.set(b"key", 15);
        assert_eq!(sketch.inc(b"key"), 15);
        assert_eq!(sketch.add(b"key", 100), 15);
        assert_eq!(sketch.get(b"key"), 15);
    }

    #[test]
    fn max_value_one_behaves_like_a_bloom_filter() {
        let mut sketch = anonymous(256, 1);
        assert_eq!(sketch.value_size(), 1);
        for i in 0..64u32 {
            assert_eq!(sketch.inc(&i.to_le_bytes()), 1);
        }
        for i in 0..64u32 {
            assert_eq!(sketch.get(&i.to_le_bytes()), 1);
        }
        assert!(sketch.get(b"never inserted") <= 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut sketch = anonymous(100, 255);
        for i in 0..100u32 {
            sketch.add(&i.to_le_bytes(), 7);
        }
        sketch.clear();
        for i in 0..100u32 {
            assert_eq!(sketch.get(&i.to_le_bytes()), 0);
        }
    }

    #[test]
    fn estimates_never_undercount() {
        // Zipf-flavored workload: key i is inserted 1024 / (i + 1) times.
        let mut sketch = anonymous(512, 0xFFFF);
        let mut counts = Vec::new();
        for i in 0..256u32 {
            let count = 1024 / (i as u64 + 1);
            for _ in 0..count {
                sketch.inc(&i.to_le_bytes());
            }
            counts.push(count);
        }
        for (i, &count) in counts.iter().enumerate() {
            assert!(sketch.get(&(i as u32).to_le_bytes()) >= count);
        }
    }

    #[test]
    fn non_power_of_two_width_answers_identically_shaped_queries() {
        for width in [100, 127, 128] {
            let mut sketch = anonymous(width, 255);
            assert_eq!(sketch.width_mask(), if width == 128 { 127 } else { 0 });
            for i in 0..32u32 {
                sketch.add(&i.to_le_bytes(), u64::from(i) + 1);
            }
            for i in 0..32u32 {
                assert!(sketch.get(&i.to_le_bytes()) >= u64::from(i) + 1);
            }
        }
    }

    #[test]
    fn every_exact_cell_width_round_trips_at_the_row_seams() {
        // Odd widths put the later rows at unaligned bit offsets; the
        // first and last cells of each row exercise the packing math.
        for max_value in [1, 3, 15, 255, 0xFFFF, 0xFFFF_FFFF] {
            let mut sketch = anonymous(101, max_value);
            for table_id in 0..SKETCH_DEPTH {
                for cell_id in [0, 1, 99, 100] {
                    sketch.write_cell(table_id, cell_id, max_value);
                    assert_eq!(sketch.read_cell(table_id, cell_id), max_value);
                }
            }
            // Neighbors were not clobbered.
            for table_id in 0..SKETCH_DEPTH {
                for cell_id in [2, 50, 98] {
                    assert_eq!(sketch.read_cell(table_id, cell_id), 0);
                }
            }
        }
    }

    #[test]
    fn nineteen_bit_cells_straddle_word_boundaries_cleanly() {
        let mut sketch = anonymous(101, SKETCH_MAX_MAX_VALUE);
        assert_eq!(sketch.value_size(), 19);
        let all_ones = (1 << 19) - 1;
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..101 {
                sketch.write_cell(table_id, cell_id, all_ones);
            }
        }
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..101 {
                assert_eq!(sketch.read_cell(table_id, cell_id), all_ones);
            }
        }
        // Alternating pattern: no write bleeds into a neighbor.
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..101 {
                sketch.write_cell(table_id, cell_id, if cell_id % 2 == 0 { 0 } else { all_ones });
            }
        }
        for table_id in 0..SKETCH_DEPTH {
            for cell_id in 0..101 {
                let expected = if cell_id % 2 == 0 { 0 } else { all_ones };
                assert_eq!(sketch.read_cell(table_id, cell_id), expected);
            }
        }
    }

    #[test]
    fn filter_none_is_the_identity() {
        let mut sketch = anonymous(100, 255);
        for i in 0..50u32 {
            sketch.add(&i.to_le_bytes(), u64::from(i));
        }
        let before: Vec<u64> = (0..50u32).map(|i| sketch.get(&i.to_le_bytes())).collect();
        sketch.filter(None);
        let after: Vec<u64> = (0..50u32).map(|i| sketch.get(&i.to_le_bytes())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn halving_twice_is_quartering() {
        let mut first = anonymous(100, 0xFFFF);
        for i in 0..64u32 {
            first.add(&i.to_le_bytes(), u64::from(i) * 3 + 1);
        }
        let mut second = Sketch::copy(&first, None, 0).unwrap();

        first.filter(Some(&|x| x / 2));
        first.filter(Some(&|x| x / 2));
        second.filter(Some(&|x| x / 4));

        for i in 0..64u32 {
            let a = first.get(&i.to_le_bytes());
            let b = second.get(&i.to_le_bytes());
            assert!(a.abs_diff(b) <= 1, "key {i}: {a} vs {b}");
        }
    }

    #[test]
    fn filter_then_clear_walk_through() {
        let mut sketch = anonymous(100, 3);
        sketch.set(b"banana", 2);
        for _ in 0..4 {
            sketch.inc(b"apple");
        }
        sketch.add(b"orange", 100);

        sketch.filter(Some(&|x| x / 2));
        assert_eq!(sketch.get(b"banana"), 1);
        assert_eq!(sketch.get(b"apple"), 1);
        assert_eq!(sketch.get(b"orange"), 1);

        sketch.clear();
        assert_eq!(sketch.get(b"banana"), 0);
        assert_eq!(sketch.get(b"apple"), 0);
        assert_eq!(sketch.get(b"orange"), 0);
    }

    #[test]
    fn copy_answers_identically() {
        let mut sketch = anonymous(100, 255);
        for i in 0..64u32 {
            sketch.add(&i.to_le_bytes(), u64::from(i) + 1);
        }
        let copy = Sketch::copy(&sketch, None, 0).unwrap();
        assert_eq!(copy.width(), sketch.width());
        assert_eq!(copy.max_value(), sketch.max_value());
        assert_eq!(copy.seed(), sketch.seed());
        for i in 0..64u32 {
            assert_eq!(copy.get(&i.to_le_bytes()), sketch.get(&i.to_le_bytes()));
        }
    }

    #[test]
    fn shrink_walk_through() {
        let mut src = anonymous(100, 3);
        src.set(b"banana", 2);
        for _ in 0..4 {
            src.inc(b"apple");
        }
        src.add(b"orange", 100);

        let mut sketch = Sketch::shrink(&src, 50, 15, Some(&|x| x / 2), None, 0).unwrap();
        assert_eq!(sketch.width(), 50);
        assert_eq!(sketch.max_value(), 15);
        assert_eq!(sketch.seed(), src.seed());

        assert_eq!(sketch.get(b"banana"), 1);
        sketch.set(b"banana", 10);
        assert_eq!(sketch.get(b"banana"), 10);

        assert_eq!(sketch.inc(b"apple"), 2);
        assert_eq!(sketch.inc(b"apple"), 3);
        assert_eq!(sketch.inc(b"apple"), 4);

        assert_eq!(sketch.add(b"orange", 10), 11);
        assert_eq!(sketch.add(b"orange", 100), 15);
    }

    #[test]
    fn shrink_keeps_the_upper_bound() {
        let mut src = anonymous(128, 0xFFFF);
        let mut counts = Vec::new();
        for i in 0..96u32 {
            let count = 96 / (i as u64 + 1);
            for _ in 0..count {
                src.inc(&i.to_le_bytes());
            }
            counts.push(count);
        }
        let shrunk = Sketch::shrink(&src, 32, 0, None, None, 0).unwrap();
        for (i, &count) in counts.iter().enumerate() {
            assert!(shrunk.get(&(i as u32).to_le_bytes()) >= count);
        }
    }

    #[test]
    fn shrink_with_defaults_is_a_copy() {
        let mut src = anonymous(100, 255);
        for i in 0..64u32 {
            src.add(&i.to_le_bytes(), u64::from(i) + 1);
        }
        let same = Sketch::shrink(&src, 0, 0, None, None, 0).unwrap();
        assert_eq!(same.width(), src.width());
        assert_eq!(same.max_value(), src.max_value());
        for i in 0..64u32 {
            assert_eq!(same.get(&i.to_le_bytes()), src.get(&i.to_le_bytes()));
        }
    }

    #[test]
    fn shrink_rejects_a_non_dividing_width() {
        let src = anonymous(50, 15);
        let result = Sketch::shrink(&src, 17, 1, None, None, 0);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn shrink_to_a_threshold_bitmap() {
        let mut src = anonymous(100, 255);
        src.add(b"heavy", 40);
        src.add(b"light", 2);
        let shrunk = Sketch::shrink(&src, 0, 1, Some(&|x| u64::from(x > 10)), None, 0).unwrap();
        assert_eq!(shrunk.max_value(), 1);
        assert_eq!(shrunk.get(b"heavy"), 1);
        assert_eq!(shrunk.get(b"light"), 0);
    }

    #[test]
    fn merge_sums_cellwise() {
        let mut lhs = anonymous(100, 0xFFFF);
        for i in 0..64u32 {
            lhs.add(&i.to_le_bytes(), u64::from(i) + 1);
        }
        let rhs = Sketch::copy(&lhs, None, 0).unwrap();
        let expected: Vec<u64> = (0..64u32).map(|i| lhs.get(&i.to_le_bytes())).collect();

        lhs.merge(&rhs, None, None).unwrap();
        for (i, &value) in expected.iter().enumerate() {
            assert_eq!(lhs.get(&(i as u32).to_le_bytes()), value * 2);
        }
    }

    #[test]
    fn merge_applies_both_filters() {
        let mut lhs = anonymous(100, 0xFFFF);
        lhs.add(b"key", 8);
        let rhs = Sketch::copy(&lhs, None, 0).unwrap();

        lhs.merge(&rhs, Some(&|x| x / 2), Some(&|x| x * 3)).unwrap();
        assert_eq!(lhs.get(b"key"), 8 / 2 + 8 * 3);
    }

    #[test]
    fn merge_saturates_at_max_value() {
        let mut lhs = anonymous(100, 15);
        lhs.add(b"key", 12);
        let rhs = Sketch::copy(&lhs, None, 0).unwrap();
        lhs.merge(&rhs, None, None).unwrap();
        assert_eq!(lhs.get(b"key"), 15);
    }

    #[test]
    fn merge_rejects_mismatched_operands() {
        let mut base = anonymous(100, 255);

        let narrower = anonymous(50, 255);
        assert!(base.merge(&narrower, None, None).is_err());

        let reseeded = Sketch::create(100, 255, None, 0, 1).unwrap();
        assert!(base.merge(&reseeded, None, None).is_err());

        let approx = Sketch::create(100, SKETCH_MAX_MAX_VALUE, None, 0, 0).unwrap();
        assert!(base.merge(&approx, None, None).is_err());
    }

    #[test]
    fn inner_product_of_a_sketch_with_itself_is_its_squared_norm() {
        let mut sketch = anonymous(100, 0xFFFF);
        for i in 0..32u32 {
            sketch.add(&i.to_le_bytes(), u64::from(i) + 1);
        }
        let result = sketch.inner_product(&sketch).unwrap();
        assert_eq!(result.product, result.lhs_square_length);
        assert_eq!(result.lhs_square_length, result.rhs_square_length);
        assert!(result.product > 0.0);
    }

    #[test]
    fn scaled_operands_have_cosine_one() {
        let mut lhs = anonymous(100, 0xFFFF);
        for i in 0..32u32 {
            lhs.add(&i.to_le_bytes(), (u64::from(i) + 1) * 2);
        }
        let mut rhs = Sketch::copy(&lhs, None, 0).unwrap();
        rhs.filter(Some(&|x| x / 2));

        let result = lhs.inner_product(&rhs).unwrap();
        let cosine = result.product
            / result.lhs_square_length.sqrt()
            / result.rhs_square_length.sqrt();
        assert!(cosine > 0.999 && cosine <= 1.0 + 1e-9, "cosine {cosine}");
    }

    #[test]
    fn double_swap_restores_both_sketches() {
        let mut lhs = anonymous(100, 255);
        lhs.add(b"left", 5);
        let mut rhs = anonymous(128, 15);
        rhs.add(b"right", 9);

        lhs.swap(&mut rhs);
        assert_eq!(lhs.width(), 128);
        assert_eq!(lhs.get(b"right"), 9);
        assert_eq!(rhs.get(b"left"), 5);

        lhs.swap(&mut rhs);
        assert_eq!(lhs.width(), 100);
        assert_eq!(lhs.get(b"left"), 5);
        assert_eq!(rhs.get(b"right"), 9);
    }

    #[test]
    fn approx_sketch_tracks_heavy_counts() {
        let mut sketch = Sketch::create(1 << 10, 0, None, 0, 0).unwrap();
        assert_eq!(sketch.mode(), SketchMode::Approx);
        let count = 1u64 << 17;
        for _ in 0..count {
            sketch.inc(b"heavy");
        }
        let estimate = sketch.get(b"heavy") as f64;
        let n = count as f64;
        assert!(estimate >= n * 0.975, "estimate {estimate}");
        assert!(estimate <= n * 1.025, "estimate {estimate}");
    }

    #[test]
    fn approx_set_and_saturation_compare_at_code_granularity() {
        let mut sketch = Sketch::create(256, 0, None, 0, 0).unwrap();
        let max_value = sketch.max_value();
        sketch.set(b"query", max_value);
        assert_eq!(
            approx::encode(sketch.get(b"query")),
            approx::encode(max_value)
        );
        assert_eq!(
            approx::encode(sketch.inc(b"query")),
            approx::encode(max_value)
        );
        assert_eq!(
            approx::encode(sketch.get(b"query")),
            approx::encode(max_value)
        );
    }

    #[test]
    fn approx_add_matches_the_encoded_sum() {
        // One key in a wide sketch: the stored code is exactly the
        // re-encoded running sum, with no jitter on the add path.
        let mut sketch = Sketch::create(256, 0, None, 0, 0).unwrap();
        let max_value = sketch.max_value();
        let mut model = 0u64;
        for step in [1, 10, 1000, 1 << 20, 1 << 33] {
            model = approx::decode(approx::encode(
                model.saturating_add(step).min(max_value),
            ));
            assert_eq!(sketch.add(b"key", step), model);
        }
    }
}
