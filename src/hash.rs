//! Thin wrapper around the `xxhash-rust` crate providing the one keyed
//! 128-bit hash the sketch needs.
//!
//! The sketch derives all three row indices for a key from a single
//! XXH3-128 evaluation, so this is the only hashing entry point. Any
//! well-distributed keyed 128-bit hash would satisfy the sketch; XXH3 is
//! used for its avalanche quality and speed on short keys. The mapping is
//! deterministic in `(seed, key)`, which is what makes sketches with equal
//! seeds mergeable.

/// One-shot keyed 128-bit hash, split into (low, high) 64-bit halves.
#[inline]
pub fn hash128(key: &[u8], seed: u64) -> (u64, u64) {
    let h = xxhash_rust::xxh3::xxh3_128_with_seed(key, seed);
    (h as u64, (h >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_seed_and_key() {
        assert_eq!(hash128(b"banana", 7), hash128(b"banana", 7));
    }

    #[test]
    fn seed_changes_both_halves() {
        let (lo_a, hi_a) = hash128(b"banana", 0);
        let (lo_b, hi_b) = hash128(b"banana", 1);
        assert_ne!(lo_a, lo_b);
        assert_ne!(hi_a, hi_b);
    }

    #[test]
    fn key_changes_both_halves() {
        let (lo_a, hi_a) = hash128(b"banana", 0);
        let (lo_b, hi_b) = hash128(b"bananb", 0);
        assert_ne!(lo_a, lo_b);
        assert_ne!(hi_a, hi_b);
    }

    #[test]
    fn empty_key_hashes() {
        let (lo, hi) = hash128(b"", 42);
        assert!(lo != 0 || hi != 0);
    }
}
