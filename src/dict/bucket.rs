//! Fixed table of slice lists, selected by `hash % num_buckets`

use super::slice_list::{SliceList, SliceListCounters};
use crate::config::SliceConfig;
use crate::error::{Error, Result};
use tracing::info;

/// Fixed-length bucket table. No rehashing: the bucket of a key never
/// changes for the table's lifetime.
#[derive(Debug)]
pub struct BucketTable {
    lists: Box<[SliceList]>,
}

impl BucketTable {
    pub fn new(num_buckets: usize, config: &SliceConfig, approx_unique_strings: usize) -> Result<Self> {
        if num_buckets == 0 {
            return Err(Error::NullArgument("num_buckets"));
        }
        let per_bucket = approx_unique_strings.div_ceil(num_buckets);
        let lists = (0..num_buckets)
            .map(|_| SliceList::with_expected(config.clone(), per_bucket))
            .collect();
        info!(
            buckets = num_buckets,
            expected_per_bucket = per_bucket,
            slice_capacity = config.slice_capacity(),
            "Initialized bucket table"
        );
        Ok(Self { lists })
    }

    #[inline]
    pub fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.lists.len() as u64) as usize
    }

    #[inline]
    pub fn list(&self, bucket: usize) -> &SliceList {
        &self.lists[bucket]
    }

    /// Slice list owning keys with this hash
    #[inline]
    pub fn list_for(&self, hash: u64) -> &SliceList {
        &self.lists[self.bucket_of(hash)]
    }

    pub fn num_buckets(&self) -> usize {
        self.lists.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SliceList> + '_ {
        self.lists.iter()
    }

    /// Group input positions by bucket, keeping input order within a bucket
    pub fn partition(&self, hashes: &[u64]) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.lists.len()];
        for (pos, &hash) in hashes.iter().enumerate() {
            groups[self.bucket_of(hash)].push(pos);
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.lists.iter().map(SliceList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(SliceList::is_empty)
    }

    pub fn counters(&self) -> SliceListCounters {
        let mut total = SliceListCounters::default();
        for list in self.lists.iter() {
            total.merge(&list.counters());
        }
        total
    }

    pub fn reset_counters(&self) {
        for list in self.lists.iter() {
            list.reset_counters();
        }
    }

    pub fn num_slices(&self) -> usize {
        self.lists.iter().map(SliceList::num_slices).sum()
    }
}
