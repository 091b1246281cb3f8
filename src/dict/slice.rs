//! Slice: a fixed-capacity partition of one bucket
//!
//! A slice stores three parallel columns (key, hash, id). Its capacity is
//! derived from a cache budget so that a full scan of the hash column stays
//! within one cache level. Occupied entries always form the dense prefix
//! `[0, len)`.

use super::ids::StringId;
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// Search strategy of a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SliceStrategy {
    /// Linear scan of the hash column (append-heavy, unsorted)
    Scan,
    /// Binary search on the hash column (valid only while sorted by hash)
    SortedBinarySearch,
}

/// Cheap `[min, max]` range reject on key hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashBounds {
    min: u64,
    max: u64,
}

impl HashBounds {
    pub fn empty() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
        }
    }

    #[inline]
    pub fn contains(&self, hash: u64) -> bool {
        self.min <= hash && hash <= self.max
    }

    pub fn extend(&mut self, hash: u64) {
        self.min = self.min.min(hash);
        self.max = self.max.max(hash);
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Default for HashBounds {
    fn default() -> Self {
        Self::empty()
    }
}

/// Read statistics of one slice, used only for reordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceDescriptor {
    pub reads_total: u64,
    pub reads_hit: u64,
}

impl SliceDescriptor {
    #[inline]
    pub fn record(&mut self, hit: bool) {
        self.reads_total += 1;
        if hit {
            self.reads_hit += 1;
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.reads_total == 0 {
            0.0
        } else {
            self.reads_hit as f64 / self.reads_total as f64
        }
    }

    /// Halve both counters so that old traffic fades out
    pub fn decay(&mut self) {
        self.reads_total /= 2;
        self.reads_hit /= 2;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fixed-capacity partition holding `(key, hash, id)` entries
#[derive(Debug)]
pub struct Slice {
    keys: Vec<Arc<str>>,
    hashes: Vec<u64>,
    ids: Vec<StringId>,
    capacity: usize,
    strategy: SliceStrategy,
}

impl Slice {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            hashes: Vec::with_capacity(capacity),
            ids: Vec::with_capacity(capacity),
            capacity,
            strategy: SliceStrategy::Scan,
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn strategy(&self) -> SliceStrategy {
        self.strategy
    }

    /// Find the position of `key`, dispatching on the current strategy
    pub fn find(&self, hash: u64, key: &str) -> Option<usize> {
        match self.strategy {
            SliceStrategy::Scan => self.scan(hash, key),
            SliceStrategy::SortedBinarySearch => self.binary_search(hash, key),
        }
    }

    fn scan(&self, hash: u64, key: &str) -> Option<usize> {
        self.hashes
            .iter()
            .enumerate()
            .find(|&(pos, &h)| h == hash && &*self.keys[pos] == key)
            .map(|(pos, _)| pos)
    }

    fn binary_search(&self, hash: u64, key: &str) -> Option<usize> {
        let first = self.hashes.partition_point(|&h| h < hash);
        self.hashes[first..]
            .iter()
            .take_while(|&&h| h == hash)
            .enumerate()
            .find(|&(offset, _)| &*self.keys[first + offset] == key)
            .map(|(offset, _)| first + offset)
    }

    /// Append an entry; fails once the slice is full
    pub fn insert_at_end(&mut self, key: Arc<str>, hash: u64, id: StringId) -> Result<usize> {
        if self.is_full() {
            return Err(Error::CapacityExceeded(format!(
                "slice full at {} entries",
                self.capacity
            )));
        }
        if self.strategy == SliceStrategy::SortedBinarySearch
            && self.hashes.last().is_some_and(|&last| last > hash)
        {
            self.strategy = SliceStrategy::Scan;
        }
        self.keys.push(key);
        self.hashes.push(hash);
        self.ids.push(id);
        Ok(self.len() - 1)
    }

    /// Remove the entry at `pos`, moving the last entry into the hole
    pub fn remove(&mut self, pos: usize) -> Result<(Arc<str>, StringId)> {
        if pos >= self.len() {
            return Err(Error::InternalInconsistency(format!(
                "slice position {} out of range (len {})",
                pos,
                self.len()
            )));
        }
        if pos + 1 != self.len() {
            self.strategy = SliceStrategy::Scan;
        }
        self.hashes.swap_remove(pos);
        let id = self.ids.swap_remove(pos);
        let key = self.keys.swap_remove(pos);
        Ok((key, id))
    }

    /// Sort entries by hash and switch to binary search
    pub fn sort(&mut self) {
        if self.strategy == SliceStrategy::SortedBinarySearch {
            return;
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_unstable_by_key(|&pos| self.hashes[pos]);

        self.hashes = order.iter().map(|&pos| self.hashes[pos]).collect();
        self.ids = order.iter().map(|&pos| self.ids[pos]).collect();
        self.keys = order.iter().map(|&pos| Arc::clone(&self.keys[pos])).collect();
        self.hashes.reserve_exact(self.capacity - self.len());
        self.ids.reserve_exact(self.capacity - self.len());
        self.keys.reserve_exact(self.capacity - self.len());

        self.strategy = SliceStrategy::SortedBinarySearch;
    }

    pub fn id_at(&self, pos: usize) -> StringId {
        self.ids[pos]
    }

    pub fn key_at(&self, pos: usize) -> &str {
        &self.keys[pos]
    }

    pub fn hash_at(&self, pos: usize) -> u64 {
        self.hashes[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64, StringId)> + '_ {
        self.keys
            .iter()
            .zip(&self.hashes)
            .zip(&self.ids)
            .map(|((key, &hash), &id)| (&**key, hash, id))
    }

    /// Verify the dense-prefix and ordering invariants
    pub fn check_invariants(&self) -> Result<()> {
        if self.keys.len() != self.hashes.len() || self.ids.len() != self.hashes.len() {
            return Err(Error::InternalInconsistency(format!(
                "slice columns disagree: {} keys, {} hashes, {} ids",
                self.keys.len(),
                self.hashes.len(),
                self.ids.len()
            )));
        }
        if self.len() > self.capacity {
            return Err(Error::InternalInconsistency(format!(
                "slice holds {} entries over capacity {}",
                self.len(),
                self.capacity
            )));
        }
        if self.strategy == SliceStrategy::SortedBinarySearch
            && !self.hashes.windows(2).all(|w| w[0] <= w[1])
        {
            return Err(Error::InternalInconsistency(
                "sorted slice is out of order".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::key_hash;

    fn push(slice: &mut Slice, key: &str, id: u64) -> Result<usize> {
        slice.insert_at_end(Arc::from(key), key_hash(key.as_bytes()), StringId(id))
    }

    #[test]
    fn test_hash_bounds() {
        let mut bounds = HashBounds::empty();
        assert!(bounds.is_empty());
        assert!(!bounds.contains(5));

        bounds.extend(10);
        bounds.extend(3);
        assert!(bounds.contains(3) && bounds.contains(7) && bounds.contains(10));
        assert!(!bounds.contains(2) && !bounds.contains(11));
    }

    #[test]
    fn test_descriptor_hit_rate() {
        let mut desc = SliceDescriptor::default();
        assert_eq!(desc.hit_rate(), 0.0);
        desc.record(true);
        desc.record(false);
        desc.record(true);
        desc.record(true);
        assert_eq!(desc.hit_rate(), 0.75);
        desc.decay();
        assert_eq!(desc.reads_total, 2);
        assert_eq!(desc.reads_hit, 1);
    }

    #[test]
    fn test_insert_and_find() -> Result<()> {
        let mut slice = Slice::new(8);
        push(&mut slice, "alpha", 0)?;
        push(&mut slice, "beta", 1)?;

        let pos = slice.find(key_hash(b"beta"), "beta").unwrap();
        assert_eq!(slice.id_at(pos), StringId(1));
        assert_eq!(slice.key_at(pos), "beta");
        assert!(slice.find(key_hash(b"gamma"), "gamma").is_none());
        Ok(())
    }

    #[test]
    fn test_full_slice_rejects_insert() -> Result<()> {
        let mut slice = Slice::new(2);
        push(&mut slice, "a", 0)?;
        push(&mut slice, "b", 1)?;
        assert!(slice.is_full());
        assert!(matches!(
            push(&mut slice, "c", 2),
            Err(Error::CapacityExceeded(_))
        ));
        assert_eq!(slice.len(), 2);
        Ok(())
    }

    #[test]
    fn test_remove_compacts() -> Result<()> {
        let mut slice = Slice::new(4);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            push(&mut slice, key, i as u64)?;
        }

        let (key, id) = slice.remove(1)?;
        assert_eq!(&*key, "b");
        assert_eq!(id, StringId(1));
        assert_eq!(slice.len(), 3);
        // Last entry moved into the hole
        assert_eq!(slice.key_at(1), "d");
        assert!(slice.find(key_hash(b"d"), "d").is_some());
        slice.check_invariants()?;

        assert!(slice.remove(3).is_err());
        Ok(())
    }

    #[test]
    fn test_sorted_search_matches_scan() -> Result<()> {
        let mut slice = Slice::new(64);
        let keys: Vec<String> = (0..64).map(|i| format!("k{}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            push(&mut slice, key, i as u64)?;
        }

        slice.sort();
        assert_eq!(slice.strategy(), SliceStrategy::SortedBinarySearch);
        slice.check_invariants()?;

        for (i, key) in keys.iter().enumerate() {
            let pos = slice.find(key_hash(key.as_bytes()), key).unwrap();
            assert_eq!(slice.id_at(pos), StringId(i as u64));
        }
        assert!(slice.find(key_hash(b"k64"), "k64").is_none());
        Ok(())
    }

    #[test]
    fn test_remove_demotes_sorted_slice() -> Result<()> {
        let mut slice = Slice::new(8);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            push(&mut slice, key, i as u64)?;
        }
        slice.sort();
        slice.remove(0)?;
        assert_eq!(slice.strategy(), SliceStrategy::Scan);
        for key in ["b", "c"] {
            assert!(slice.find(key_hash(key.as_bytes()), key).is_some());
        }
        Ok(())
    }

    #[test]
    fn test_iter_yields_all_entries() -> Result<()> {
        let mut slice = Slice::new(4);
        push(&mut slice, "x", 7)?;
        push(&mut slice, "y", 9)?;
        let entries: Vec<_> = slice.iter().map(|(k, _, id)| (k.to_string(), id)).collect();
        assert_eq!(
            entries,
            vec![("x".to_string(), StringId(7)), ("y".to_string(), StringId(9))]
        );
        Ok(())
    }
}
