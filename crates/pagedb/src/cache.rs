use std::{collections::HashMap, sync::Arc};

use log::trace;
use parking_lot::Mutex;

/// Fewer slots than this defeats the clock hand.
const MIN_CAPACITY: usize = 8;

/// Cache of decompressed pages, keyed by page id.
///
/// Clock eviction: each hit sets a referenced bit, the hand clears bits
/// until it finds an unreferenced slot. Entries still borrowed by a reader
/// (outstanding `Arc` clones) are skipped, so a concurrent prefetch can
/// never evict a page mid-use.
#[derive(Debug)]
pub struct PageCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug)]
struct CacheInner {
    capacity: usize,
    map: HashMap<u64, usize>,
    slots: Vec<Slot>,
    hand: usize,
}

#[derive(Debug)]
struct Slot {
    page_id: u64,
    buf: Arc<[u8]>,
    referenced: bool,
}

impl PageCache {
    /// `capacity_bytes / page_size` slots, at least [`MIN_CAPACITY`].
    pub fn new(capacity_bytes: usize, page_size: usize) -> Self {
        let capacity = (capacity_bytes / page_size.max(1)).max(MIN_CAPACITY);
        Self {
            inner: Mutex::new(CacheInner {
                capacity,
                map: HashMap::with_capacity(capacity),
                slots: Vec::new(),
                hand: 0,
            }),
        }
    }

    pub fn get(&self, page_id: u64) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.lock();
        let slot_index = *inner.map.get(&page_id)?;
        let slot = &mut inner.slots[slot_index];
        slot.referenced = true;
        Some(Arc::clone(&slot.buf))
    }

    pub fn contains(&self, page_id: u64) -> bool {
        self.inner.lock().map.contains_key(&page_id)
    }

    pub fn insert(&self, page_id: u64, buf: Arc<[u8]>) {
        self.inner.lock().insert(page_id, buf);
    }

    /// Non-blocking insert for prefetch workers; drops the page rather
    /// than stalling behind the main thread.
    pub fn try_insert(&self, page_id: u64, buf: Arc<[u8]>) -> bool {
        match self.inner.try_lock() {
            Some(mut inner) => {
                inner.insert(page_id, buf);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, page_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(slot_index) = inner.map.remove(&page_id) {
            // Leave a tombstone the clock hand will reuse.
            inner.slots[slot_index].page_id = 0;
            inner.slots[slot_index].referenced = false;
        }
    }

    /// Drops every cached page beyond the new page count.
    pub fn truncate_beyond(&self, page_count: u64) {
        let mut inner = self.inner.lock();
        let stale: Vec<u64> = inner
            .map
            .keys()
            .copied()
            .filter(|&id| id > page_count)
            .collect();
        for page_id in stale {
            if let Some(slot_index) = inner.map.remove(&page_id) {
                inner.slots[slot_index].page_id = 0;
                inner.slots[slot_index].referenced = false;
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.slots.clear();
        inner.hand = 0;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

impl CacheInner {
    fn insert(&mut self, page_id: u64, buf: Arc<[u8]>) {
        if let Some(&slot_index) = self.map.get(&page_id) {
            let slot = &mut self.slots[slot_index];
            slot.buf = buf;
            slot.referenced = true;
            return;
        }

        let slot_index = if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                page_id,
                buf,
                referenced: true,
            });
            self.slots.len() - 1
        } else {
            let victim = self.evict();
            let slot = &mut self.slots[victim];
            slot.page_id = page_id;
            slot.buf = buf;
            slot.referenced = true;
            victim
        };
        self.map.insert(page_id, slot_index);
    }

    /// Advances the clock hand to a victim slot and unmaps it.
    fn evict(&mut self) -> usize {
        // Two full sweeps always find a victim: the first clears referenced
        // bits, and a slot pinned by an outstanding borrow is skipped at
        // most while the borrow lives.
        for _ in 0..self.slots.len() * 2 + 1 {
            let at = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();

            let slot = &mut self.slots[at];
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            if Arc::strong_count(&slot.buf) > 1 {
                continue;
            }
            if slot.page_id != 0 {
                trace!("page cache evicting page {}", slot.page_id);
                self.map.remove(&slot.page_id);
            }
            return at;
        }
        // Every slot is pinned; reuse the current hand position anyway
        // (the borrowers keep their Arcs alive independently).
        let at = self.hand;
        self.hand = (self.hand + 1) % self.slots.len();
        if self.slots[at].page_id != 0 {
            self.map.remove(&self.slots[at].page_id);
        }
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(b: u8) -> Arc<[u8]> {
        Arc::from(vec![b; 16].into_boxed_slice())
    }

    #[test]
    fn capacity_bounds_resident_set() {
        let cache = PageCache::new(8 * 16, 16);
        for id in 1..=100u64 {
            cache.insert(id, page(id as u8));
        }
        assert_eq!(cache.len(), 8);
        assert!(cache.get(100).is_some());
    }

    #[test]
    fn pinned_entries_survive_eviction_pressure() {
        let cache = PageCache::new(8 * 16, 16);
        cache.insert(1, page(1));
        let pinned = cache.get(1).unwrap();
        for id in 2..=50u64 {
            cache.insert(id, page(id as u8));
        }
        assert_eq!(cache.get(1).as_deref(), Some(&pinned[..]));
    }

    #[test]
    fn truncate_drops_tail_pages() {
        let cache = PageCache::new(64 * 16, 16);
        for id in 1..=20u64 {
            cache.insert(id, page(id as u8));
        }
        cache.truncate_beyond(5);
        assert!(cache.get(5).is_some());
        assert!(cache.get(6).is_none());
        assert!(cache.get(20).is_none());
    }

    #[test]
    fn replacement_updates_in_place() {
        let cache = PageCache::new(8 * 16, 16);
        cache.insert(3, page(1));
        cache.insert(3, page(2));
        assert_eq!(cache.get(3).unwrap()[0], 2);
        assert_eq!(cache.len(), 1);
    }
}
