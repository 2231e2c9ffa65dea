//! Least-recently-used cache with per-entry expiry
//!
//! Recency order lives in a doubly linked list threaded through a slab of
//! slots; a hash map indexes keys to slots. Both structures always hold
//! exactly the same key set. The most recently used entry sits at the head,
//! the least recently used at the tail.
//!
//! Entries may carry an absolute expiry time. An expired entry is
//! conceptually absent: it still occupies its slot until the next access
//! touches it, at which point it is removed and reported as a miss. The
//! clock is injectable so expiry behavior can be tested deterministically.
//!
//! [`LruCache`] is not thread-safe; [`CacheShard`](super::CacheShard) adds
//! locking and byte accounting on top.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::SystemTime;

/// Sentinel slot index for "no neighbor".
const NIL: usize = usize::MAX;

type EvictFn<K, V> = Box<dyn FnMut(&K, &V) + Send>;
type NowFn = Box<dyn Fn() -> SystemTime + Send>;

struct Slot<K, V> {
    key: K,
    value: V,
    expire: Option<SystemTime>,
    prev: usize,
    next: usize,
}

/// A single-threaded LRU cache with an optional entry cap, per-entry expiry,
/// and an eviction callback.
///
/// The callback fires whenever an entry leaves the cache: capacity eviction,
/// lazy expiry removal, explicit removal, [`clear`](LruCache::clear), and
/// displacement of the old value when an existing key is overwritten.
pub struct LruCache<K, V> {
    max_entries: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    on_evict: Option<EvictFn<K, V>>,
    now: NowFn,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `max_entries` entries. Zero means no
    /// entry cap; eviction is then driven entirely by the caller.
    pub fn new(max_entries: usize) -> Self {
        LruCache {
            max_entries,
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            on_evict: None,
            now: Box::new(SystemTime::now),
        }
    }

    /// Install a callback invoked for every entry that leaves the cache.
    pub fn set_on_evict<F>(&mut self, f: F)
    where
        F: FnMut(&K, &V) + Send + 'static,
    {
        self.on_evict = Some(Box::new(f));
    }

    /// Replace the clock used for expiry checks. Defaults to
    /// `SystemTime::now`.
    pub fn set_clock<F>(&mut self, f: F)
    where
        F: Fn() -> SystemTime + Send + 'static,
    {
        self.now = Box::new(f);
    }

    /// Insert or overwrite `key`. The entry becomes most recently used.
    /// When the key already exists its old value leaves through the
    /// eviction callback; when the entry cap is exceeded the least recently
    /// used entry is evicted.
    pub fn add(&mut self, key: K, value: V, expire: Option<SystemTime>) {
        if let Some(&idx) = self.map.get(&key) {
            let old = match self.slots[idx].as_mut() {
                Some(slot) => {
                    let old = std::mem::replace(&mut slot.value, value);
                    slot.expire = expire;
                    old
                }
                None => return,
            };
            if let Some(cb) = self.on_evict.as_mut() {
                cb(&key, &old);
            }
            self.move_to_front(idx);
            return;
        }

        let idx = self.alloc(Slot {
            key: key.clone(),
            value,
            expire,
            prev: NIL,
            next: NIL,
        });
        self.map.insert(key, idx);
        self.push_front(idx);

        if self.max_entries > 0 && self.map.len() > self.max_entries {
            self.remove_oldest();
        }
    }

    /// Look up `key`, refreshing its recency on a hit. An entry whose
    /// expiry has passed is removed and reported as a miss.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = *self.map.get(key)?;
        let expired = match self.slots[idx].as_ref() {
            Some(slot) => match slot.expire {
                Some(t) => (self.now)() >= t,
                None => false,
            },
            None => return None,
        };
        if expired {
            self.remove_index(idx);
            return None;
        }
        self.move_to_front(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Remove `key` if present, firing the eviction callback.
    pub fn remove<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if let Some(&idx) = self.map.get(key) {
            self.remove_index(idx);
        }
    }

    /// Evict the least recently used entry, if any.
    pub fn remove_oldest(&mut self) {
        if self.tail != NIL {
            self.remove_index(self.tail);
        }
    }

    /// Number of live entries, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every entry, firing the eviction callback for each.
    pub fn clear(&mut self) {
        let mut idx = self.head;
        while idx != NIL {
            match self.slots[idx].take() {
                Some(slot) => {
                    if let Some(cb) = self.on_evict.as_mut() {
                        cb(&slot.key, &slot.value);
                    }
                    idx = slot.next;
                }
                None => break,
            }
        }
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn alloc(&mut self, slot: Slot<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            if let Some(head) = self.slots[old_head].as_mut() {
                head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        if prev != NIL {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn remove_index(&mut self, idx: usize) {
        self.detach(idx);
        if let Some(slot) = self.slots[idx].take() {
            self.map.remove(&slot.key);
            self.free.push(idx);
            if let Some(cb) = self.on_evict.as_mut() {
                cb(&slot.key, &slot.value);
            }
        }
    }
}
