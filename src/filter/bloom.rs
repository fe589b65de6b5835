//! Insert-only membership filter.
//!
//! Every key is reduced to one integer, the sum of its codepoints, and five
//! bit positions are derived from it: one modulo the filter size and four
//! modulo fixed constants. A key is "probably present" only when all five
//! bits are set.
//!
//! The fixed moduli mean the low 19793 bits absorb four of the five probes,
//! so the false-positive rate grows faster than a textbook Bloom filter of
//! the same size. The gate must treat a hit accordingly.

use super::error::FilterError;
use crate::rendezvous::codepoint_sum;

/// Number of probes per key.
pub const PROBE_COUNT: usize = 5;

/// Fixed moduli used for probes two through five.
pub const FIXED_MODULI: [u64; PROBE_COUNT - 1] = [677, 367, 9949, 19793];

/// Default filter size in bits (128 KiB of words).
pub const DEFAULT_FILTER_BITS: usize = 1 << 20;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-size bit array with a deterministic five-probe test.
///
/// Bits are only ever set. Once loading completes the filter is shared
/// read-only between connection handlers.
#[derive(Debug, Clone)]
pub struct MembershipFilter {
    words: Vec<u64>,
    bits: usize,
    inserted: usize,
}

impl MembershipFilter {
    /// Create an empty filter with `bits` positions.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TooSmall`] unless `bits` exceeds the largest
    /// fixed modulus; smaller filters would index out of range.
    pub fn new(bits: usize) -> Result<Self, FilterError> {
        let minimum = FIXED_MODULI.iter().copied().max().unwrap_or(0) as usize;
        if bits <= minimum {
            return Err(FilterError::TooSmall {
                requested: bits,
                minimum,
            });
        }

        Ok(Self {
            words: vec![0; bits.div_ceil(WORD_BITS)],
            bits,
            inserted: 0,
        })
    }

    /// Number of bit positions.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Number of keys inserted so far (duplicates counted).
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// The five bit positions probed for `key`.
    pub fn probe_indices(&self, key: &str) -> [usize; PROBE_COUNT] {
        let h = codepoint_sum(key);
        let mut indices = [0usize; PROBE_COUNT];
        indices[0] = (h % self.bits as u64) as usize;
        for (slot, modulus) in indices[1..].iter_mut().zip(FIXED_MODULI) {
            *slot = (h % modulus) as usize;
        }
        indices
    }

    /// Set the five probe bits for `key`.
    pub fn insert(&mut self, key: &str) {
        for index in self.probe_indices(key) {
            self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        }
        self.inserted += 1;
    }

    /// True when all five probe bits for `key` are set.
    ///
    /// Never false for an inserted key; may be true for keys that were
    /// never inserted.
    pub fn probably_contains(&self, key: &str) -> bool {
        self.probe_indices(key).into_iter().all(|index| self.bit(index))
    }

    /// Fraction of bits currently set.
    pub fn fill_ratio(&self) -> f64 {
        let set: u32 = self.words.iter().map(|w| w.count_ones()).sum();
        f64::from(set) / self.bits as f64
    }

    fn bit(&self, index: usize) -> bool {
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }
}
