//! Hash functions for bucket routing, slice search and bloom probes

use std::hash::Hasher;
use zwohash::ZwoHasher;

/// Number of independent probes per bloom filter test
pub const BLOOM_PROBES: usize = 4;

/// Seeds for the bloom probe hashes. Distinct from the key hash (no seed).
const PROBE_SEEDS: [u64; BLOOM_PROBES] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0x27d4_eb2f_1656_67c5,
];

/// Hash of a key as stored in the slice hash column.
///
/// Bucket selection (`hash % num_buckets`) and slice search both use this
/// value, so it must stay stable for the dictionary's lifetime.
#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    let mut hasher = ZwoHasher::default();
    hasher.write(key);
    hasher.write_usize(key.len());
    hasher.finish()
}

/// The four bloom probe hashes of a key
#[inline]
pub fn probe_hashes(key: &[u8]) -> [u64; BLOOM_PROBES] {
    let mut out = [0u64; BLOOM_PROBES];
    for (slot, seed) in out.iter_mut().zip(PROBE_SEEDS) {
        let mut hasher = ZwoHasher::default();
        hasher.write_u64(seed);
        hasher.write(key);
        *slot = hasher.finish();
    }
    out
}

/// Hash of a string id, used to pick a decode cache bucket
#[inline]
pub fn id_hash(id: u64) -> u64 {
    let mut hasher = ZwoHasher::default();
    hasher.write_u64(id);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_is_deterministic() {
        assert_eq!(key_hash(b"alpha"), key_hash(b"alpha"));
        assert_ne!(key_hash(b"alpha"), key_hash(b"beta"));
    }

    #[test]
    fn test_probes_differ() {
        let probes = probe_hashes(b"columnar");
        for i in 0..BLOOM_PROBES {
            for j in (i + 1)..BLOOM_PROBES {
                assert_ne!(probes[i], probes[j]);
            }
        }
    }

    #[test]
    fn test_empty_key() {
        // The empty string is a valid key
        let _ = key_hash(b"");
        let _ = probe_hashes(b"");
    }
}
