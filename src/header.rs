//! The fixed 80-byte on-disk header.
//!
//! Ten little-endian `u64` fields, in file order: magic, width,
//! width_mask, depth, max_value, value_mask, value_size, seed,
//! table_size, file_size. Every derived field is stored redundantly so a
//! reader can cross-check them; [`Header::validate`] is the single place
//! that decides whether a byte blob is a sketch.

use crate::approx::{APPROX_MAX_VALUE, APPROX_SIZE};
use crate::error::{Error, Result};
use crate::sketch::{SKETCH_DEPTH, SKETCH_MAX_WIDTH, SKETCH_MIN_WIDTH};

/// Identifies the file format. First eight bytes of every sketch file.
pub const SKETCH_MAGIC: u64 = u64::from_le_bytes(*b"countmin");

/// Serialized header size in bytes. The payload starts at this offset.
pub const HEADER_SIZE: usize = 80;

/// Parsed (or to-be-written) header. Plain data; the sketch engine keeps
/// a copy next to the mapping so hot paths never re-parse the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    magic: u64,
    width: u64,
    width_mask: u64,
    depth: u64,
    max_value: u64,
    value_mask: u64,
    value_size: u64,
    seed: u64,
    table_size: u64,
    file_size: u64,
}

/// `width − 1` when `width` is a power of two, else 0. A zero mask tells
/// the cell-index path to take the generic modulo.
pub fn width_mask_for(width: u64) -> u64 {
    if width.is_power_of_two() {
        width - 1
    } else {
        0
    }
}

/// Smallest supported cell width covering `[0, max_value]`, or the
/// 19-bit approximate code when the range outgrows 32-bit cells.
pub fn value_size_for(max_value: u64) -> u64 {
    match max_value {
        0..=0x1 => 1,
        0x2..=0x3 => 2,
        0x4..=0xF => 4,
        0x10..=0xFF => 8,
        0x100..=0xFFFF => 16,
        0x1_0000..=0xFFFF_FFFF => 32,
        _ => APPROX_SIZE,
    }
}

/// Payload size in bytes for a three-row table of `width` cells of
/// `value_size` bits, rounded up to a 64-byte boundary.
pub fn table_size_for(width: u64, value_size: u64) -> u64 {
    let bits = width * value_size * SKETCH_DEPTH;
    bits.div_ceil(512) * 64
}

impl Header {
    /// Build the header for a fresh sketch. `width` and `max_value` must
    /// already be defaulted and clamped by the caller.
    pub fn new(width: u64, max_value: u64, seed: u64) -> Header {
        let value_size = value_size_for(max_value);
        let table_size = table_size_for(width, value_size);
        Header {
            magic: SKETCH_MAGIC,
            width,
            width_mask: width_mask_for(width),
            depth: SKETCH_DEPTH,
            max_value,
            value_mask: max_value,
            value_size,
            seed,
            table_size,
            file_size: HEADER_SIZE as u64 + table_size,
        }
    }

    pub fn width(&self) -> u64 {
        self.width
    }
    pub fn width_mask(&self) -> u64 {
        self.width_mask
    }
    pub fn depth(&self) -> u64 {
        self.depth
    }
    pub fn max_value(&self) -> u64 {
        self.max_value
    }
    pub fn value_mask(&self) -> u64 {
        self.value_mask
    }
    pub fn value_size(&self) -> u64 {
        self.value_size
    }
    pub fn seed(&self) -> u64 {
        self.seed
    }
    pub fn table_size(&self) -> u64 {
        self.table_size
    }
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Serialize in file order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let fields = [
            self.magic,
            self.width,
            self.width_mask,
            self.depth,
            self.max_value,
            self.value_mask,
            self.value_size,
            self.seed,
            self.table_size,
            self.file_size,
        ];
        let mut bytes = [0u8; HEADER_SIZE];
        for (chunk, field) in bytes.chunks_exact_mut(8).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    /// Parse the first [`HEADER_SIZE`] bytes of a mapped file. Only the
    /// length is checked here; call [`Header::validate`] afterwards.
    pub fn from_bytes(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::CorruptFile("file shorter than the header"));
        }
        let mut fields = [0u64; 10];
        for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *field = u64::from_le_bytes(word);
        }
        Ok(Header {
            magic: fields[0],
            width: fields[1],
            width_mask: fields[2],
            depth: fields[3],
            max_value: fields[4],
            value_mask: fields[5],
            value_size: fields[6],
            seed: fields[7],
            table_size: fields[8],
            file_size: fields[9],
        })
    }

    /// Cross-check every stored field against the derived value and the
    /// actual mapped length. Rejecting here is what keeps the in-memory
    /// operations infallible afterwards.
    pub fn validate(&self, actual_size: u64) -> Result<()> {
        if self.magic != SKETCH_MAGIC {
            return Err(Error::CorruptFile("magic mismatch"));
        }
        if self.depth != SKETCH_DEPTH {
            return Err(Error::CorruptFile("depth is not 3"));
        }
        if self.width < SKETCH_MIN_WIDTH || self.width > SKETCH_MAX_WIDTH {
            return Err(Error::CorruptFile("width out of range"));
        }
        if self.max_value == 0 || self.max_value > APPROX_MAX_VALUE {
            return Err(Error::CorruptFile("max_value out of range"));
        }
        if self.width_mask != width_mask_for(self.width) {
            return Err(Error::CorruptFile("width_mask inconsistent with width"));
        }
        if self.value_mask != self.max_value {
            return Err(Error::CorruptFile("value_mask inconsistent with max_value"));
        }
        if self.value_size != value_size_for(self.max_value) {
            return Err(Error::CorruptFile("value_size inconsistent with max_value"));
        }
        if self.table_size != table_size_for(self.width, self.value_size) {
            return Err(Error::CorruptFile("table_size inconsistent with shape"));
        }
        if self.file_size != HEADER_SIZE as u64 + self.table_size {
            return Err(Error::CorruptFile("file_size inconsistent with table_size"));
        }
        if self.file_size != actual_size {
            return Err(Error::CorruptFile("file length does not match header"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_width_gets_a_mask() {
        let header = Header::new(1 << 30, (1 << 28) - 1, 123_456_789);
        assert_eq!(header.width(), 1 << 30);
        assert_eq!(header.width_mask(), (1 << 30) - 1);
        assert_eq!(header.depth(), 3);
        assert_eq!(header.max_value(), (1 << 28) - 1);
        assert_eq!(header.seed(), 123_456_789);
    }

    #[test]
    fn other_widths_take_the_slow_path() {
        let header = Header::new(123_456_789, 255, 0);
        assert_eq!(header.width_mask(), 0);
    }

    #[test]
    fn value_size_is_the_smallest_covering_width() {
        assert_eq!(value_size_for(0), 1);
        assert_eq!(value_size_for(1), 1);
        assert_eq!(value_size_for(3), 2);
        assert_eq!(value_size_for(4), 4);
        assert_eq!(value_size_for(255), 8);
        assert_eq!(value_size_for(256), 16);
        assert_eq!(value_size_for(65536), 32);
        assert_eq!(value_size_for(u32::MAX as u64), 32);
        assert_eq!(value_size_for(u32::MAX as u64 + 1), APPROX_SIZE);
        assert_eq!(value_size_for(APPROX_MAX_VALUE), APPROX_SIZE);
    }

    #[test]
    fn table_size_is_64_byte_aligned_and_sufficient() {
        for (width, value_size) in [(1, 1), (100, 2), (100, 19), (50, 4), (1 << 20, 32)] {
            let size = table_size_for(width, value_size);
            assert_eq!(size % 64, 0);
            assert!(size * 8 >= width * value_size * 3);
            assert!((size - 64) * 8 < width * value_size * 3 + 512);
        }
    }

    #[test]
    fn byte_round_trip() {
        let header = Header::new(100, 3, 42);
        let parsed = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        parsed.validate(header.file_size()).unwrap();
    }

    #[test]
    fn validate_rejects_a_flipped_magic() {
        let header = Header::new(100, 3, 42);
        let mut bytes = header.to_bytes();
        bytes[0] ^= 0xFF;
        let parsed = Header::from_bytes(&bytes).unwrap();
        assert!(parsed.validate(header.file_size()).is_err());
    }

    #[test]
    fn validate_rejects_a_truncated_file() {
        let header = Header::new(100, 3, 42);
        assert!(header.validate(header.file_size() - 64).is_err());
    }

    #[test]
    fn validate_rejects_inconsistent_derived_fields() {
        let header = Header::new(100, 3, 42);
        let mut bytes = header.to_bytes();
        // width_mask claims 100 is a power of two
        bytes[16..24].copy_from_slice(&99u64.to_le_bytes());
        let parsed = Header::from_bytes(&bytes).unwrap();
        assert!(parsed.validate(header.file_size()).is_err());
    }
}
