//! String ids and the id directory
//!
//! The directory is the dictionary's id generator and its reverse index in
//! one object: filling a reserved id stores the interned string at that index,
//! so `extract` never has to scan a slice.

use crate::config::IdReusePolicy;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Compact identifier of an interned string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StringId(pub u64);

impl StringId {
    /// Returned by `locate_fast` for keys that violate its precondition
    pub const INVALID: StringId = StringId(u64::MAX);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for StringId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// State of one id
#[derive(Debug, Clone, Default)]
enum Slot {
    /// Never issued, removed, or returned unused
    #[default]
    Vacant,
    /// Handed to an insert batch, not yet bound to a string
    Reserved,
    Live(Arc<str>),
    /// Claimed by a remove batch; still resolvable until released
    Removing(Arc<str>),
}

impl Slot {
    fn key(&self) -> Option<&Arc<str>> {
        match self {
            Slot::Live(key) | Slot::Removing(key) => Some(key),
            Slot::Vacant | Slot::Reserved => None,
        }
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    slots: Vec<Slot>,
    /// Vacant ids awaiting reuse (only with `IdReusePolicy::Recycle`)
    free: Vec<u64>,
    /// Ids bound to a string (`Live` or `Removing`)
    live: usize,
}

impl DirectoryInner {
    fn slot_mut(&mut self, id: StringId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .ok_or_else(|| Error::NotFound(format!("string id {}", id)))
    }
}

/// Id generator plus inverted `id -> string` array
///
/// An insert batch reserves every id it may need up front, so once a batch
/// starts mutating buckets it cannot run out of ids. A remove batch claims
/// all of its ids in one step before touching any bucket.
#[derive(Debug)]
pub struct IdDirectory {
    inner: RwLock<DirectoryInner>,
    policy: IdReusePolicy,
    limit: u64,
}

impl IdDirectory {
    pub fn new(capacity: usize, policy: IdReusePolicy, limit: u64) -> Self {
        Self {
            inner: RwLock::new(DirectoryInner {
                slots: Vec::with_capacity(capacity),
                free: Vec::new(),
                live: 0,
            }),
            policy,
            limit,
        }
    }

    /// Reserve `n` ids, all or nothing.
    ///
    /// Recycled ids come first (most recently released first), then fresh
    /// ids in increasing order.
    pub fn reserve(&self, n: usize) -> Result<Vec<StringId>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.write();

        let recycled = match self.policy {
            IdReusePolicy::Recycle => n.min(inner.free.len()),
            IdReusePolicy::Retire => 0,
        };
        let fresh = (n - recycled) as u64;
        let issued = inner.slots.len() as u64;
        if issued + fresh > self.limit {
            return Err(Error::CapacityExceeded(format!(
                "id space exhausted: {} ids needed, {} of {} left",
                n,
                self.limit - issued + recycled as u64,
                self.limit
            )));
        }

        let mut ids = Vec::with_capacity(n);
        for _ in 0..recycled {
            if let Some(id) = inner.free.pop() {
                inner.slots[id as usize] = Slot::Reserved;
                ids.push(StringId(id));
            }
        }
        for id in issued..issued + fresh {
            inner.slots.push(Slot::Reserved);
            ids.push(StringId(id));
        }
        Ok(ids)
    }

    /// Bind a reserved id to its string
    pub fn fill(&self, id: StringId, key: Arc<str>) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.slot_mut(id)?;
        if !matches!(slot, Slot::Reserved) {
            return Err(Error::InternalInconsistency(format!(
                "id {} filled without a reservation",
                id
            )));
        }
        *slot = Slot::Live(key);
        inner.live += 1;
        Ok(())
    }

    /// Return reserved ids that were not needed
    pub fn unreserve(&self, ids: &[StringId]) {
        let mut inner = self.inner.write();
        for &id in ids {
            if let Ok(slot) = inner.slot_mut(id) {
                if matches!(slot, Slot::Reserved) {
                    *slot = Slot::Vacant;
                    if self.policy == IdReusePolicy::Recycle {
                        inner.free.push(id.0);
                    }
                }
            }
        }
    }

    /// Claim a batch of ids for removal, all or nothing.
    ///
    /// Every id must be live and not claimed by another batch. Repeated ids
    /// are claimed once. Returns the claimed ids in increasing order with
    /// their strings.
    pub fn claim(&self, ids: &[StringId]) -> Result<Vec<(StringId, Arc<str>)>> {
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut inner = self.inner.write();
        let mut claimed = Vec::with_capacity(unique.len());
        for &id in &unique {
            match inner.slots.get(id.index()) {
                Some(Slot::Live(key)) => claimed.push((id, Arc::clone(key))),
                _ => return Err(Error::NotFound(format!("string id {}", id))),
            }
        }
        for (id, key) in &claimed {
            inner.slots[id.index()] = Slot::Removing(Arc::clone(key));
        }
        Ok(claimed)
    }

    /// Undo a claim whose string could not be removed
    pub fn unclaim(&self, id: StringId) {
        let mut inner = self.inner.write();
        if let Ok(slot) = inner.slot_mut(id) {
            *slot = match std::mem::take(slot) {
                Slot::Removing(key) => Slot::Live(key),
                other => other,
            };
        }
    }

    /// Release a claimed id once its string left the buckets
    pub fn release(&self, id: StringId) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.slot_mut(id)?;
        if !matches!(slot, Slot::Removing(_)) {
            return Err(Error::InternalInconsistency(format!(
                "id {} released without a claim",
                id
            )));
        }
        *slot = Slot::Vacant;
        inner.live -= 1;
        if self.policy == IdReusePolicy::Recycle {
            inner.free.push(id.0);
        }
        Ok(())
    }

    /// Resolve one id
    pub fn get(&self, id: StringId) -> Option<Arc<str>> {
        self.inner
            .read()
            .slots
            .get(id.index())
            .and_then(Slot::key)
            .cloned()
    }

    /// Resolve a batch of ids under one read lock
    pub fn resolve(&self, ids: &[StringId]) -> Result<Vec<Arc<str>>> {
        let inner = self.inner.read();
        ids.iter()
            .map(|&id| {
                inner
                    .slots
                    .get(id.index())
                    .and_then(Slot::key)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("string id {}", id)))
            })
            .collect()
    }

    /// All interned strings with their ids, in id order
    pub fn contents(&self) -> (Vec<String>, Vec<StringId>) {
        let inner = self.inner.read();
        let mut strings = Vec::with_capacity(inner.live);
        let mut ids = Vec::with_capacity(inner.live);
        for (id, slot) in inner.slots.iter().enumerate() {
            if let Some(key) = slot.key() {
                strings.push(key.to_string());
                ids.push(StringId(id as u64));
            }
        }
        (strings, ids)
    }

    /// Number of ids bound to a string
    pub fn live(&self) -> usize {
        self.inner.read().live
    }

    /// Number of ids ever issued (live, reserved, removed and recycled)
    pub fn issued(&self) -> u64 {
        self.inner.read().slots.len() as u64
    }

    pub fn policy(&self) -> IdReusePolicy {
        self.policy
    }
}
