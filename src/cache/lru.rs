//! One LRU bucket of the decode cache
//!
//! A fixed array of entries threaded into a doubly-linked recency list by
//! index. All entries are allocated up front; empty entries sit at the
//! least-recently-used end so they are filled before anything is evicted.

use crate::dict::StringId;
use std::num::NonZeroUsize;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct LruEntry {
    id: Option<StringId>,
    value: Option<String>,
    prev: usize,
    next: usize,
}

/// Fixed-capacity LRU list over preallocated entries
#[derive(Debug)]
pub struct LruBucket {
    entries: Box<[LruEntry]>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    len: usize,
}

impl LruBucket {
    /// Create a bucket with `capacity` empty entries
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        let entries = (0..capacity)
            .map(|i| LruEntry {
                id: None,
                value: None,
                prev: if i == 0 { NIL } else { i - 1 },
                next: if i + 1 == capacity { NIL } else { i + 1 },
            })
            .collect();
        Self {
            entries,
            head: 0,
            tail: capacity - 1,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walk from the most recent entry; stops at the first empty entry
    fn find(&self, id: StringId) -> Option<usize> {
        let mut index = self.head;
        while index != NIL {
            match self.entries[index].id {
                Some(entry_id) if entry_id == id => return Some(index),
                Some(_) => index = self.entries[index].next,
                None => return None,
            }
        }
        None
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.entries[index].prev, self.entries[index].next);
        match prev {
            NIL => self.head = next,
            p => self.entries[p].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.entries[n].prev = prev,
        }
    }

    fn push_front(&mut self, index: usize) {
        self.entries[index].prev = NIL;
        self.entries[index].next = self.head;
        match self.head {
            NIL => self.tail = index,
            h => self.entries[h].prev = index,
        }
        self.head = index;
    }

    fn push_back(&mut self, index: usize) {
        self.entries[index].next = NIL;
        self.entries[index].prev = self.tail;
        match self.tail {
            NIL => self.head = index,
            t => self.entries[t].next = index,
        }
        self.tail = index;
    }

    fn promote(&mut self, index: usize) {
        if index != self.head {
            self.unlink(index);
            self.push_front(index);
        }
    }

    /// Look up an id; a hit becomes the most recent entry
    pub fn get(&mut self, id: StringId) -> Option<String> {
        let index = self.find(id)?;
        self.promote(index);
        self.entries[index].value.clone()
    }

    /// Install a value in the least recent entry.
    ///
    /// Returns the id that was evicted to make room, if any.
    pub fn install(&mut self, id: StringId, value: String) -> Option<StringId> {
        let index = self.tail;
        let entry = &mut self.entries[index];
        let evicted = entry.id.replace(id);
        entry.value = Some(value);
        if evicted.is_none() {
            self.len += 1;
        }
        self.promote(index);
        evicted
    }

    /// Drop a cached id; its entry becomes the least recent
    pub fn invalidate(&mut self, id: StringId) -> bool {
        let Some(index) = self.find(id) else {
            return false;
        };
        self.entries[index].id = None;
        self.entries[index].value = None;
        self.len -= 1;
        if index != self.tail {
            self.unlink(index);
            self.push_back(index);
        }
        true
    }

    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.id = None;
            entry.value = None;
        }
        self.len = 0;
    }

    /// Cached ids from most to least recent
    pub fn ids(&self) -> Vec<StringId> {
        let mut out = Vec::with_capacity(self.len);
        let mut index = self.head;
        while index != NIL {
            match self.entries[index].id {
                Some(id) => out.push(id),
                None => break,
            }
            index = self.entries[index].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> StringId {
        StringId(n)
    }

    fn lru(capacity: usize) -> LruBucket {
        LruBucket::new(NonZeroUsize::new(capacity).expect("capacity must be non-zero"))
    }

    #[test]
    fn test_install_and_get() {
        let mut bucket = lru(3);
        assert!(bucket.is_empty());
        assert_eq!(bucket.install(id(1), "one".to_string()), None);
        assert_eq!(bucket.install(id(2), "two".to_string()), None);

        assert_eq!(bucket.get(id(1)).as_deref(), Some("one"));
        assert_eq!(bucket.get(id(3)), None);
        assert_eq!(bucket.ids(), vec![id(1), id(2)]);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn test_evicts_least_recent() {
        let mut bucket = lru(2);
        bucket.install(id(1), "one".to_string());
        bucket.install(id(2), "two".to_string());
        // Touch 1 so that 2 becomes least recent
        bucket.get(id(1));

        assert_eq!(bucket.install(id(3), "three".to_string()), Some(id(2)));
        assert_eq!(bucket.get(id(2)), None);
        assert_eq!(bucket.ids(), vec![id(3), id(1)]);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn test_invalidate_frees_entry() {
        let mut bucket = lru(3);
        bucket.install(id(1), "one".to_string());
        bucket.install(id(2), "two".to_string());
        bucket.install(id(3), "three".to_string());

        assert!(bucket.invalidate(id(3)));
        assert!(!bucket.invalidate(id(3)));
        assert_eq!(bucket.ids(), vec![id(2), id(1)]);

        // The freed entry is reused before anything is evicted
        assert_eq!(bucket.install(id(4), "four".to_string()), None);
        assert_eq!(bucket.ids(), vec![id(4), id(2), id(1)]);
    }

    #[test]
    fn test_single_entry_bucket() {
        let mut bucket = lru(1);
        bucket.install(id(1), "one".to_string());
        assert_eq!(bucket.install(id(2), "two".to_string()), Some(id(1)));
        assert_eq!(bucket.get(id(2)).as_deref(), Some("two"));
        assert!(bucket.invalidate(id(2)));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut bucket = lru(4);
        bucket.install(id(1), "one".to_string());
        bucket.install(id(2), "two".to_string());
        bucket.clear();
        assert!(bucket.is_empty());
        assert_eq!(bucket.get(id(1)), None);
        assert!(bucket.ids().is_empty());
    }
}
