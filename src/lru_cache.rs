//! Bounded least-recently-used cache with optional time-to-live.
//!
//! Entries live in a slot arena linked into a recency list by index, so lookups, inserts, and
//! move-to-front are O(1). Expiry is checked lazily on lookup.

use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// A capacity of zero disables the cache: inserts are dropped and lookups always miss.
    pub fn new(capacity: usize) -> Self {
        LruCache {
            capacity,
            ttl: None,
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        LruCache {
            ttl: Some(ttl),
            ..LruCache::new(capacity)
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now())
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.index.remove(key)?;
        self.detach(slot);
        self.release(slot).map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    pub(crate) fn get_at<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.index.get(key)?;
        let expired = match (self.ttl, self.slots[slot].as_ref()) {
            (Some(ttl), Some(entry)) => now.saturating_duration_since(entry.inserted_at) >= ttl,
            _ => false,
        };
        if expired {
            self.remove(key);
            return None;
        }

        self.detach(slot);
        self.push_front(slot);
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    pub(crate) fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if self.capacity == 0 {
            return;
        }

        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.value = value;
                entry.inserted_at = now;
            }
            self.detach(slot);
            self.push_front(slot);
            return;
        }

        if self.index.len() >= self.capacity {
            self.evict_lru();
        }

        let entry = Entry {
            key: key.clone(),
            value,
            inserted_at: now,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    fn evict_lru(&mut self) {
        let Some(slot) = self.tail else {
            return;
        };
        self.detach(slot);
        if let Some(entry) = self.release(slot) {
            self.index.remove(&entry.key);
        }
    }

    fn release(&mut self, slot: usize) -> Option<Entry<K, V>> {
        let entry = self.slots[slot].take();
        self.free.push(slot);
        entry
    }

    /// Unlink `slot` from the recency list.
    fn detach(&mut self, slot: usize) {
        let Some((prev, next)) = self.slots[slot].as_ref().map(|e| (e.prev, e.next)) else {
            return;
        };
        match prev {
            Some(prev) => self.link_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.link_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let entry = self.link_mut(slot);
        entry.prev = None;
        entry.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let entry = self.link_mut(slot);
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.link_mut(old_head).prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Linked slots are always occupied.
    fn link_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        match self.slots[slot].as_mut() {
            Some(entry) => entry,
            None => unreachable!("linked slot {slot} is empty"),
        }
    }
}
