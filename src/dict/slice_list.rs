//! SliceList: the ordered slices of one bucket
//!
//! Every slice carries a hash-range bound and a bloom filter. A lookup walks
//! the slices in their current order and only searches a slice after both
//! cheap rejects pass:
//!
//! ```text
//! lookup(key)
//!   for slice in order:
//!     HashBounds.contains(hash)?   no -> next slice
//!     BloomFilter.test(key)?       no -> next slice
//!     Slice.find(hash, key)        scan or binary search
//! ```
//!
//! Slices with a higher observed hit rate are periodically moved to the
//! front so that skewed workloads touch fewer slices per lookup.

use super::bloom::BloomFilter;
use super::ids::{IdDirectory, StringId};
use super::slice::{HashBounds, Slice, SliceDescriptor, SliceStrategy};
use crate::config::SliceConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Lookup counters of one slice list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SliceListCounters {
    pub lookups: u64,
    pub hits: u64,
    /// Slices searched after passing bounds and bloom checks
    pub slices_probed: u64,
    pub bounds_rejects: u64,
    pub bloom_rejects: u64,
    pub reorders: u64,
    pub sorts: u64,
}

impl SliceListCounters {
    pub fn merge(&mut self, other: &Self) {
        self.lookups += other.lookups;
        self.hits += other.hits;
        self.slices_probed += other.slices_probed;
        self.bounds_rejects += other.bounds_rejects;
        self.bloom_rejects += other.bloom_rejects;
        self.reorders += other.reorders;
        self.sorts += other.sorts;
    }
}

/// Snapshot of one slice, in list order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceInfo {
    /// Creation sequence number (stable across reorders)
    pub seq: u64,
    pub len: usize,
    pub capacity: usize,
    pub strategy: SliceStrategy,
    pub hit_rate: f64,
    pub is_appender: bool,
}

#[derive(Debug)]
struct SliceEntry {
    slice: Slice,
    descriptor: SliceDescriptor,
    bloom: BloomFilter,
    bounds: HashBounds,
    seq: u64,
}

#[derive(Debug, Default)]
struct SliceListInner {
    entries: Vec<SliceEntry>,
    /// Index of the slice currently accepting inserts
    appender: Option<usize>,
    next_seq: u64,
    lookups_since_reorder: u64,
    len: usize,
    counters: SliceListCounters,
}

impl SliceListInner {
    /// Locate `key` as `(entry index, position)`, recording reads
    fn find(&mut self, key: &str, hash: u64) -> Option<(usize, usize)> {
        self.counters.lookups += 1;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !entry.bounds.contains(hash) {
                self.counters.bounds_rejects += 1;
                entry.descriptor.record(false);
                continue;
            }
            if !entry.bloom.test(key.as_bytes()) {
                self.counters.bloom_rejects += 1;
                entry.descriptor.record(false);
                continue;
            }
            self.counters.slices_probed += 1;
            match entry.slice.find(hash, key) {
                Some(pos) => {
                    entry.descriptor.record(true);
                    self.counters.hits += 1;
                    return Some((index, pos));
                }
                None => entry.descriptor.record(false),
            }
        }
        None
    }

    /// Full lookup: find plus adaptive maintenance
    fn lookup(&mut self, key: &str, hash: u64, config: &SliceConfig) -> Option<StringId> {
        let found = self.find(key, hash);
        let id = found.map(|(index, pos)| self.entries[index].slice.id_at(pos));

        if let Some((index, _)) = found {
            self.maybe_sort(index, config);
        }
        self.lookups_since_reorder += 1;
        if self.lookups_since_reorder >= config.reorder_interval {
            self.reorder();
        }
        id
    }

    /// Sort a sealed, frequently hit slice for binary search
    fn maybe_sort(&mut self, index: usize, config: &SliceConfig) {
        if Some(index) == self.appender {
            return;
        }
        let entry = &mut self.entries[index];
        if entry.slice.strategy() == SliceStrategy::Scan
            && entry.slice.is_full()
            && entry.descriptor.reads_hit >= config.sort_after_reads
        {
            entry.slice.sort();
            self.counters.sorts += 1;
            trace!(seq = entry.seq, len = entry.slice.len(), "Sorted slice");
        }
    }

    /// Move slices with higher hit rate to the front
    fn reorder(&mut self) {
        self.lookups_since_reorder = 0;
        if self.entries.len() < 2 {
            return;
        }
        let appender_seq = self.appender.map(|i| self.entries[i].seq);

        self.entries.sort_by(|a, b| {
            b.descriptor
                .hit_rate()
                .total_cmp(&a.descriptor.hit_rate())
        });
        for entry in &mut self.entries {
            entry.descriptor.decay();
        }
        self.appender =
            appender_seq.and_then(|seq| self.entries.iter().position(|e| e.seq == seq));
        self.counters.reorders += 1;

        trace!(
            slices = self.entries.len(),
            front_seq = self.entries[0].seq,
            "Reordered slice list"
        );
    }

    /// Index of an appender slice with room, creating one if needed
    fn appender_with_room(&mut self, config: &SliceConfig) -> Result<usize> {
        if let Some(index) = self.appender {
            if !self.entries[index].slice.is_full() {
                return Ok(index);
            }
        }
        let entry = SliceEntry {
            slice: Slice::new(config.slice_capacity()),
            descriptor: SliceDescriptor::default(),
            bloom: BloomFilter::new(config.bloom_bits())?,
            bounds: HashBounds::empty(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.push(entry);
        let index = self.entries.len() - 1;
        self.appender = Some(index);
        trace!(seq = self.next_seq - 1, slices = self.entries.len(), "Allocated new appender slice");
        Ok(index)
    }

    /// Intern one key under the `candidate` id reserved for it.
    ///
    /// Returns the key's id and whether it was newly created. An existing
    /// key keeps its id and `candidate` stays unused.
    fn insert(
        &mut self,
        key: &str,
        hash: u64,
        candidate: StringId,
        directory: &IdDirectory,
        config: &SliceConfig,
    ) -> Result<(StringId, bool)> {
        if let Some(id) = self.lookup(key, hash, config) {
            return Ok((id, false));
        }

        let index = self.appender_with_room(config)?;
        let shared: Arc<str> = Arc::from(key);
        directory.fill(candidate, Arc::clone(&shared))?;

        let entry = &mut self.entries[index];
        entry.slice.insert_at_end(shared, hash, candidate)?;
        entry.bloom.test_and_set(key.as_bytes());
        entry.bounds.extend(hash);
        self.len += 1;
        Ok((candidate, true))
    }

    /// Remove `key`, compacting its slice; returns the id it had
    fn remove(&mut self, key: &str, hash: u64) -> Result<StringId> {
        let (index, pos) = self
            .find(key, hash)
            .ok_or_else(|| Error::NotFound(format!("string {:?}", key)))?;
        let (_, id) = self.entries[index].slice.remove(pos)?;
        self.len -= 1;

        // An emptied sealed slice is dropped from the list
        if self.entries[index].slice.is_empty() && Some(index) != self.appender {
            self.entries.remove(index);
            if let Some(appender) = self.appender {
                if appender > index {
                    self.appender = Some(appender - 1);
                }
            }
        }
        Ok(id)
    }
}

/// Ordered sequence of slices guarded by one mutation lock
#[derive(Debug)]
pub struct SliceList {
    inner: Mutex<SliceListInner>,
    config: SliceConfig,
}

impl SliceList {
    pub fn new(config: SliceConfig) -> Self {
        Self {
            inner: Mutex::new(SliceListInner::default()),
            config,
        }
    }

    /// Pre-size the slice vector for an expected number of strings
    pub fn with_expected(config: SliceConfig, expected: usize) -> Self {
        let slices = expected.div_ceil(config.slice_capacity().max(1));
        let list = Self::new(config);
        list.inner.lock().entries.reserve(slices);
        list
    }

    /// Look up one key
    pub fn lookup(&self, key: &str, hash: u64) -> Option<StringId> {
        self.inner.lock().lookup(key, hash, &self.config)
    }

    /// Look up a batch of `(key, hash)` pairs under one lock
    pub fn locate(&self, keys: &[(&str, u64)]) -> Vec<Option<StringId>> {
        let mut inner = self.inner.lock();
        keys.iter()
            .map(|&(key, hash)| inner.lookup(key, hash, &self.config))
            .collect()
    }

    /// Intern one key with a reserved candidate id
    pub fn insert_one(
        &self,
        key: &str,
        hash: u64,
        candidate: StringId,
        directory: &IdDirectory,
    ) -> Result<(StringId, bool)> {
        self.inner
            .lock()
            .insert(key, hash, candidate, directory, &self.config)
    }

    /// Intern a batch of `(key, hash, candidate)` triples under one lock.
    ///
    /// Every candidate must be a distinct id reserved in `directory`; with
    /// that, the batch only fails on a broken internal invariant.
    pub fn insert(
        &self,
        keys: &[(&str, u64, StringId)],
        directory: &IdDirectory,
    ) -> Result<Vec<(StringId, bool)>> {
        let mut inner = self.inner.lock();
        keys.iter()
            .map(|&(key, hash, candidate)| {
                inner.insert(key, hash, candidate, directory, &self.config)
            })
            .collect()
    }

    /// Remove one key; the caller releases the returned id
    pub fn remove(&self, key: &str, hash: u64) -> Result<StringId> {
        self.inner.lock().remove(key, hash)
    }

    /// Number of strings stored
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_slices(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn counters(&self) -> SliceListCounters {
        self.inner.lock().counters
    }

    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        inner.counters = SliceListCounters::default();
        inner.lookups_since_reorder = 0;
        for entry in &mut inner.entries {
            entry.descriptor.reset();
        }
    }

    /// Slices in their current search order
    pub fn slices(&self) -> Vec<SliceInfo> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| SliceInfo {
                seq: entry.seq,
                len: entry.slice.len(),
                capacity: entry.slice.capacity(),
                strategy: entry.slice.strategy(),
                hit_rate: entry.descriptor.hit_rate(),
                is_appender: Some(index) == inner.appender,
            })
            .collect()
    }

    /// All `(key, id)` pairs, in slice order
    pub fn contents(&self) -> Vec<(String, StringId)> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .flat_map(|entry| entry.slice.iter())
            .map(|(key, _, id)| (key.to_string(), id))
            .collect()
    }

    /// Verify slice density, bounds and bloom coverage of every entry
    pub fn check_invariants(&self) -> Result<()> {
        let inner = self.inner.lock();
        let mut total = 0;
        for entry in &inner.entries {
            entry.slice.check_invariants()?;
            for (key, hash, id) in entry.slice.iter() {
                if !entry.bounds.contains(hash) || !entry.bloom.test(key.as_bytes()) {
                    return Err(Error::InternalInconsistency(format!(
                        "string {:?} ({}) not covered by its slice filters",
                        key, id
                    )));
                }
            }
            total += entry.slice.len();
        }
        if total != inner.len {
            return Err(Error::InternalInconsistency(format!(
                "slice list counts {} strings but slices hold {}",
                inner.len, total
            )));
        }
        Ok(())
    }
}
