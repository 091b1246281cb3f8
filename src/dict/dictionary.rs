//! StringDictionary: the public interning facade
//!
//! Both variants expose the same contract. The sync variant runs a batch on
//! the calling thread in input order; the async variant splits the batch by
//! bucket and runs one task per non-empty bucket on a [`TaskPool`]. Buckets
//! are disjoint hash partitions, so a task only ever takes its own bucket's
//! lock. Output arrays are always aligned with the input order.
//!
//! An insert batch runs in three steps:
//!
//! ```text
//! locate   every key, per bucket
//! reserve  one id per distinct missing key, in input order (all or nothing)
//! append   missing keys under their reserved ids; unused ids go back
//! ```

use super::bucket::BucketTable;
use super::ids::{IdDirectory, StringId};
use super::slice_list::SliceList;
use crate::cache::StringSource;
use crate::config::{DictionaryConfig, DictionaryKind, IdReusePolicy};
use crate::error::{Error, Result};
use crate::hash::key_hash;
use crate::pool::TaskPool;
use serde::Serialize;
use tracing::{debug, info, warn};
use zwohash::HashMap;

/// Result of [`StringDictionary::locate_safe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateResult {
    /// Id per key; `StringId::INVALID` where not found
    pub ids: Vec<StringId>,
    pub found: Vec<bool>,
    pub num_not_found: usize,
}

/// Lookup telemetry aggregated over all buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DictionaryCounters {
    pub reads: u64,
    pub hits: u64,
    pub slices_probed: u64,
    pub bounds_rejects: u64,
    pub bloom_rejects: u64,
    pub reorders: u64,
    pub sorts: u64,
    pub slices: usize,
    pub strings: usize,
}

impl DictionaryCounters {
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.hits as f64 / self.reads as f64
        }
    }
}

enum Mode {
    Sync,
    Async(TaskPool),
}

/// Deduplicating string to id dictionary
pub struct StringDictionary {
    mode: Mode,
    buckets: BucketTable,
    directory: IdDirectory,
    config: DictionaryConfig,
}

impl StringDictionary {
    /// Create a dictionary from a full configuration
    pub fn create(config: DictionaryConfig) -> Result<Self> {
        config.validate()?;
        let mode = match config.kind {
            DictionaryKind::Sync => Mode::Sync,
            DictionaryKind::Async => Mode::Async(TaskPool::new(config.threads)?),
            DictionaryKind::Naive => {
                return Err(Error::NotImplemented(
                    "naive string dictionary".to_string(),
                ))
            }
        };
        let buckets = BucketTable::new(
            config.num_buckets,
            &config.slice,
            config.approx_unique_strings,
        )?;
        let directory = IdDirectory::new(config.capacity, config.id_reuse, config.id_limit);

        info!(
            kind = ?config.kind,
            buckets = config.num_buckets,
            slice_capacity = config.slice.slice_capacity(),
            id_reuse = ?config.id_reuse,
            "Created string dictionary"
        );

        Ok(Self {
            mode,
            buckets,
            directory,
            config,
        })
    }

    /// Create a dictionary that runs batches on the calling thread
    pub fn new_sync(capacity: usize, num_buckets: usize, approx_unique_strings: usize) -> Result<Self> {
        Self::create(DictionaryConfig {
            kind: DictionaryKind::Sync,
            capacity,
            num_buckets,
            approx_unique_strings,
            ..Default::default()
        })
    }

    /// Create a dictionary that runs one task per bucket on `threads` workers
    pub fn new_async(
        capacity: usize,
        num_buckets: usize,
        approx_unique_strings: usize,
        threads: usize,
    ) -> Result<Self> {
        Self::create(DictionaryConfig {
            kind: DictionaryKind::Async,
            capacity,
            num_buckets,
            approx_unique_strings,
            threads,
            ..Default::default()
        })
    }

    pub fn kind(&self) -> DictionaryKind {
        match self.mode {
            Mode::Sync => DictionaryKind::Sync,
            Mode::Async(_) => DictionaryKind::Async,
        }
    }

    pub fn config(&self) -> &DictionaryConfig {
        &self.config
    }

    pub fn id_reuse(&self) -> IdReusePolicy {
        self.directory.policy()
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.num_buckets()
    }

    /// Worker threads of the async variant (1 for sync)
    pub fn threads(&self) -> usize {
        match &self.mode {
            Mode::Sync => 1,
            Mode::Async(pool) => pool.threads(),
        }
    }

    /// Run `work` once per non-empty bucket on the pool.
    ///
    /// Returns the input positions of each bucket next to its task result.
    fn dispatch<T, F>(&self, pool: &TaskPool, hashes: &[u64], work: F) -> Vec<(Vec<usize>, Result<Vec<T>>)>
    where
        F: Fn(&SliceList, &[usize]) -> Result<Vec<T>> + Sync,
        T: Send,
    {
        let groups = self.buckets.partition(hashes);
        let buckets = &self.buckets;
        let work = &work;

        let tasks: Vec<_> = groups
            .iter()
            .enumerate()
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(bucket, positions)| move || work(buckets.list(bucket), positions))
            .collect();
        debug!(tasks = tasks.len(), keys = hashes.len(), "Dispatching bucket tasks");
        let results = pool.execute(tasks);

        groups
            .into_iter()
            .filter(|positions| !positions.is_empty())
            .zip(results)
            .collect()
    }

    /// Intern a batch of strings, returning one id per input string.
    ///
    /// Strings already present keep their id. New strings get ids in the
    /// order they first appear in the batch, in both variants. Every id the
    /// batch may need is reserved before any bucket changes, so running out
    /// of ids fails the batch without side effects.
    pub fn insert<S>(&self, strings: &[S]) -> Result<Vec<StringId>>
    where
        S: AsRef<str> + Sync,
    {
        let hashes: Vec<u64> = strings
            .iter()
            .map(|s| key_hash(s.as_ref().as_bytes()))
            .collect();
        let located = self.locate_hashed(strings, &hashes)?;

        // First occurrence of each missing string, in input order
        let mut miss_index: HashMap<&str, usize> = HashMap::default();
        let mut misses: Vec<usize> = Vec::new();
        for (pos, id) in located.iter().enumerate() {
            let key = strings[pos].as_ref();
            if id.is_none() && !miss_index.contains_key(key) {
                miss_index.insert(key, misses.len());
                misses.push(pos);
            }
        }

        let candidates = self.directory.reserve(misses.len())?;
        let appended = match &self.mode {
            Mode::Sync => self.append_sync(strings, &hashes, &misses, &candidates),
            Mode::Async(pool) => {
                self.append_async(pool, strings, &hashes, &misses, &candidates)
            }
        };
        let appended = match appended {
            Ok(appended) => appended,
            Err(e) => {
                // Bound ids stay interned; only unbound reservations return
                self.directory.unreserve(&candidates);
                warn!(error = %e, "Insert batch failed while appending");
                return Err(e);
            }
        };

        // A concurrent batch may have created some of the strings first
        let unused: Vec<StringId> = candidates
            .iter()
            .zip(&appended)
            .filter(|&(_, &(_, created))| !created)
            .map(|(&candidate, _)| candidate)
            .collect();
        self.directory.unreserve(&unused);

        let ids = strings
            .iter()
            .zip(located)
            .map(|(s, found)| match miss_index.get(s.as_ref()) {
                Some(&i) => Ok(appended[i].0),
                None => found.ok_or_else(|| {
                    Error::InternalInconsistency("located string has no id".to_string())
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            batch = strings.len(),
            created = misses.len() - unused.len(),
            "Inserted batch"
        );
        Ok(ids)
    }

    /// Intern a batch, first resizing the async pool to `threads` workers
    pub fn insert_with_threads<S>(&self, strings: &[S], threads: usize) -> Result<Vec<StringId>>
    where
        S: AsRef<str> + Sync,
    {
        if let Mode::Async(pool) = &self.mode {
            pool.resize(threads)?;
        }
        self.insert(strings)
    }

    fn append_sync<S: AsRef<str>>(
        &self,
        strings: &[S],
        hashes: &[u64],
        misses: &[usize],
        candidates: &[StringId],
    ) -> Result<Vec<(StringId, bool)>> {
        misses
            .iter()
            .zip(candidates)
            .map(|(&pos, &candidate)| {
                let hash = hashes[pos];
                self.buckets.list_for(hash).insert_one(
                    strings[pos].as_ref(),
                    hash,
                    candidate,
                    &self.directory,
                )
            })
            .collect()
    }

    fn append_async<S>(
        &self,
        pool: &TaskPool,
        strings: &[S],
        hashes: &[u64],
        misses: &[usize],
        candidates: &[StringId],
    ) -> Result<Vec<(StringId, bool)>>
    where
        S: AsRef<str> + Sync,
    {
        let miss_hashes: Vec<u64> = misses.iter().map(|&pos| hashes[pos]).collect();
        let directory = &self.directory;
        let results = self.dispatch(pool, &miss_hashes, |list, indices| {
            let triples: Vec<(&str, u64, StringId)> = indices
                .iter()
                .map(|&i| (strings[misses[i]].as_ref(), miss_hashes[i], candidates[i]))
                .collect();
            list.insert(&triples, directory)
        });

        let mut out = vec![(StringId::INVALID, false); misses.len()];
        for (indices, result) in results {
            for (&i, appended) in indices.iter().zip(result?) {
                out[i] = appended;
            }
        }
        Ok(out)
    }

    fn locate_hashed<S>(&self, keys: &[S], hashes: &[u64]) -> Result<Vec<Option<StringId>>>
    where
        S: AsRef<str> + Sync,
    {
        match &self.mode {
            Mode::Sync => Ok(keys
                .iter()
                .zip(hashes)
                .map(|(key, &hash)| self.buckets.list_for(hash).lookup(key.as_ref(), hash))
                .collect()),
            Mode::Async(pool) => {
                let results = self.dispatch(pool, hashes, |list, positions| {
                    let pairs: Vec<(&str, u64)> = positions
                        .iter()
                        .map(|&pos| (keys[pos].as_ref(), hashes[pos]))
                        .collect();
                    Ok(list.locate(&pairs))
                });

                let mut out = vec![None; keys.len()];
                for (positions, result) in results {
                    for (&pos, id) in positions.iter().zip(result?) {
                        out[pos] = id;
                    }
                }
                Ok(out)
            }
        }
    }

    fn locate<S>(&self, keys: &[S]) -> Result<Vec<Option<StringId>>>
    where
        S: AsRef<str> + Sync,
    {
        let hashes: Vec<u64> = keys
            .iter()
            .map(|s| key_hash(s.as_ref().as_bytes()))
            .collect();
        self.locate_hashed(keys, &hashes)
    }

    /// Look up keys that may be absent
    pub fn locate_safe<S>(&self, keys: &[S]) -> Result<LocateResult>
    where
        S: AsRef<str> + Sync,
    {
        let located = self.locate(keys)?;
        let found: Vec<bool> = located.iter().map(Option::is_some).collect();
        let num_not_found = found.iter().filter(|&&f| !f).count();
        let ids = located
            .into_iter()
            .map(|id| id.unwrap_or(StringId::INVALID))
            .collect();
        Ok(LocateResult {
            ids,
            found,
            num_not_found,
        })
    }

    /// Look up keys that are known to exist.
    ///
    /// Every key must have been inserted. An absent key trips a debug
    /// assertion; release builds return `StringId::INVALID` for it. Use
    /// [`StringDictionary::locate_safe`] when keys may be missing.
    pub fn locate_fast<S>(&self, keys: &[S]) -> Result<Vec<StringId>>
    where
        S: AsRef<str> + Sync,
    {
        let located = self.locate(keys)?;
        Ok(located
            .into_iter()
            .enumerate()
            .map(|(pos, id)| {
                debug_assert!(id.is_some(), "locate_fast: key at {} is not interned", pos);
                id.unwrap_or(StringId::INVALID)
            })
            .collect())
    }

    /// Decode ids back to their strings
    pub fn extract(&self, ids: &[StringId]) -> Result<Vec<String>> {
        Ok(self
            .directory
            .resolve(ids)?
            .iter()
            .map(|key| key.to_string())
            .collect())
    }

    /// Remove strings by id.
    ///
    /// All ids are claimed before anything is removed. If any id is
    /// unknown, already removed, or being removed by a concurrent call, the
    /// batch fails and nothing changes. A repeated id is removed once.
    pub fn remove(&self, ids: &[StringId]) -> Result<()> {
        let claimed = self.directory.claim(ids)?;

        for (done, (id, key)) in claimed.iter().enumerate() {
            let hash = key_hash(key.as_bytes());
            let outcome = self
                .buckets
                .list_for(hash)
                .remove(key, hash)
                .and_then(|stored| {
                    if stored == *id {
                        Ok(())
                    } else {
                        Err(Error::InternalInconsistency(format!(
                            "string {:?} is stored as {} but the directory says {}",
                            key, stored, id
                        )))
                    }
                });
            if let Err(e) = outcome {
                for &(rest, _) in &claimed[done..] {
                    self.directory.unclaim(rest);
                }
                warn!(%id, error = %e, "Remove batch stopped on an inconsistent bucket");
                return Err(e);
            }
            self.directory.release(*id)?;
        }
        debug!(batch = ids.len(), removed = claimed.len(), "Removed strings");
        Ok(())
    }

    /// Whether a string is interned
    pub fn contains(&self, key: &str) -> bool {
        let hash = key_hash(key.as_bytes());
        self.buckets.list_for(hash).lookup(key, hash).is_some()
    }

    /// Number of distinct strings currently interned
    pub fn num_distinct(&self) -> usize {
        self.directory.live()
    }

    pub fn len(&self) -> usize {
        self.num_distinct()
    }

    pub fn is_empty(&self) -> bool {
        self.num_distinct() == 0
    }

    /// Every interned string with its id, in id order
    pub fn get_contents(&self) -> (Vec<String>, Vec<StringId>) {
        self.directory.contents()
    }

    pub fn counters(&self) -> DictionaryCounters {
        let totals = self.buckets.counters();
        DictionaryCounters {
            reads: totals.lookups,
            hits: totals.hits,
            slices_probed: totals.slices_probed,
            bounds_rejects: totals.bounds_rejects,
            bloom_rejects: totals.bloom_rejects,
            reorders: totals.reorders,
            sorts: totals.sorts,
            slices: self.buckets.num_slices(),
            strings: self.buckets.len(),
        }
    }

    pub fn reset_counters(&self) {
        self.buckets.reset_counters();
    }

    /// Verify every bucket's structural invariants
    pub fn check_invariants(&self) -> Result<()> {
        for list in self.buckets.iter() {
            list.check_invariants()?;
        }
        if self.buckets.len() != self.directory.live() {
            return Err(Error::InternalInconsistency(format!(
                "buckets hold {} strings, directory has {} live ids",
                self.buckets.len(),
                self.directory.live()
            )));
        }
        Ok(())
    }
}

impl StringSource for StringDictionary {
    fn fetch_string_by_id_nocache(&self, id: StringId) -> Result<String> {
        self.directory
            .get(id)
            .map(|key| key.to_string())
            .ok_or_else(|| Error::NotFound(format!("string id {}", id)))
    }
}

impl Drop for StringDictionary {
    fn drop(&mut self) {
        info!(
            strings = self.directory.live(),
            slices = self.buckets.num_slices(),
            "Dropping string dictionary"
        );
    }
}

impl std::fmt::Debug for StringDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringDictionary")
            .field("kind", &self.kind())
            .field("buckets", &self.num_buckets())
            .field("strings", &self.num_distinct())
            .finish()
    }
}
