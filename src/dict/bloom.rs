//! Bitset and bloom filter used to pre-filter slice scans

use crate::error::{Error, Result};
use crate::hash::{probe_hashes, BLOOM_PROBES};

/// Fixed-size bit array
#[derive(Debug, Clone)]
pub struct Bitset {
    words: Box<[u64]>,
    num_bits: usize,
}

impl Bitset {
    /// Create a zeroed bitset holding `num_bits` bits
    pub fn new(num_bits: usize) -> Result<Self> {
        if num_bits == 0 {
            return Err(Error::NullArgument("num_bits"));
        }
        let words = vec![0u64; num_bits.div_ceil(64)].into_boxed_slice();
        Ok(Self { words, num_bits })
    }

    #[inline]
    pub fn get(&self, bit: usize) -> bool {
        debug_assert!(bit < self.num_bits);
        self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.num_bits);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Bloom filter with four independent probes
///
/// No false negatives: every key passed to [`BloomFilter::test_and_set`]
/// or [`BloomFilter::insert`] is reported present by [`BloomFilter::test`]
/// until the filter is cleared.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Bitset,
}

impl BloomFilter {
    pub fn new(num_bits: usize) -> Result<Self> {
        Ok(Self {
            bits: Bitset::new(num_bits)?,
        })
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    #[inline]
    fn positions(&self, key: &[u8]) -> [usize; BLOOM_PROBES] {
        let n = self.bits.len() as u64;
        probe_hashes(key).map(|h| (h % n) as usize)
    }

    /// Test membership and insert the key.
    ///
    /// Returns true only if all probe bits were already set. The bits are
    /// set unconditionally afterwards.
    pub fn test_and_set(&mut self, key: &[u8]) -> bool {
        let mut present = true;
        for pos in self.positions(key) {
            present &= self.bits.get(pos);
            self.bits.set(pos);
        }
        present
    }

    /// Query-only membership test; never mutates the filter
    pub fn test(&self, key: &[u8]) -> bool {
        self.positions(key).iter().all(|&pos| self.bits.get(pos))
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.test_and_set(key);
    }

    pub fn num_bits(&self) -> usize {
        self.bits.len()
    }

    /// Fraction of bits set, a proxy for the false positive rate
    pub fn load_factor(&self) -> f64 {
        self.bits.count_ones() as f64 / self.bits.len() as f64
    }
}
