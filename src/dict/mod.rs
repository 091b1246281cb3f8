//! String interning dictionary
//!
//! Maps every distinct string to one compact id and back.
//!
//! # Architecture
//!
//! ```text
//! StringDictionary {Sync | Async(TaskPool)}
//!   ├─→ IdDirectory        id → string (generator + reverse index)
//!   └─→ BucketTable        bucket = hash(key) % num_buckets
//!        ├─→ SliceList[0]  one lock per bucket
//!        │    ├─→ Slice 0  bounds | bloom | (key, hash, id) x capacity
//!        │    ├─→ Slice 1
//!        │    └─→ Slice 2  ← appender
//!        └─→ SliceList[1]
//! ```
//!
//! Slices are sized to a CPU cache budget, filtered by a hash range and a
//! bloom filter, switch from linear scan to binary search once sealed and
//! hot, and are reordered by hit rate so that frequent strings are found in
//! the first slices probed.

pub mod bloom;
pub mod bucket;
pub mod dictionary;
pub mod ids;
pub mod slice;
pub mod slice_list;

pub use bloom::{Bitset, BloomFilter};
pub use bucket::BucketTable;
pub use dictionary::{DictionaryCounters, LocateResult, StringDictionary};
pub use ids::{IdDirectory, StringId};
pub use slice::{HashBounds, Slice, SliceDescriptor, SliceStrategy};
pub use slice_list::{SliceInfo, SliceList, SliceListCounters};
