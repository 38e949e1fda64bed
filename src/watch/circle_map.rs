use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fixed-capacity keyed map with circular push/drain cursors.
///
/// The container backing every per-volume queue. One writer (the volume's
/// ingestion task) inserts; one reader (the correlation timer) scans and
/// drains. Slots live in a ring; a key directory maps keys to slot
/// positions. Overflow silently overwrites the slot at `push_index mod N`
/// and the directory binding of the evicted key goes stale — every lookup
/// therefore validates that the slot still holds the key it was bound to.
///
/// Once the push counter passes `clear_threshold` and the ring drains
/// empty, the directory is flushed under the exclusive side of its lock;
/// readers hold the shared side, so none observes a half-cleared
/// directory.
pub struct CircleMap<K, V> {
    slots: Box<[RwLock<Option<(K, V)>>]>,
    keys: RwLock<HashMap<K, usize>>,
    push_index: AtomicUsize,
    pop_index: AtomicUsize,
    empty: AtomicBool,
    pushed: AtomicUsize,
    clear_threshold: usize,
}

fn relax<G>(r: Result<G, PoisonError<G>>) -> G {
    // A poisoned queue lock means a classifier panicked mid-scan; the data
    // is still structurally sound, so keep serving it.
    r.unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> CircleMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_clear_threshold(capacity, capacity.max(10240))
    }

    pub fn with_clear_threshold(capacity: usize, clear_threshold: usize) -> Self {
        assert!(capacity > 0, "map capacity must be greater than 0");
        let slots = (0..capacity)
            .map(|_| RwLock::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            keys: RwLock::new(HashMap::new()),
            push_index: AtomicUsize::new(0),
            pop_index: AtomicUsize::new(0),
            empty: AtomicBool::new(true),
            pushed: AtomicUsize::new(0),
            clear_threshold,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Relaxed)
    }

    /// Occupied slot count. Linear; meant for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| relax(s.read()).is_some())
            .count()
    }

    fn slot_read(&self, idx: usize) -> RwLockReadGuard<'_, Option<(K, V)>> {
        relax(self.slots[idx].read())
    }

    fn slot_write(&self, idx: usize) -> RwLockWriteGuard<'_, Option<(K, V)>> {
        relax(self.slots[idx].write())
    }

    fn occupied(&self, idx: usize) -> bool {
        self.slot_read(idx).is_some()
    }

    /// Insert or update. An existing key is overwritten in place without
    /// advancing the push cursor; a new key claims the next ring slot,
    /// evicting whatever lived there.
    pub fn insert(&self, key: K, value: V) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.empty.store(false, Ordering::Relaxed);

        let bound = relax(self.keys.read()).get(&key).copied();
        if let Some(idx) = bound {
            let mut slot = self.slot_write(idx);
            if matches!(&*slot, Some((k, _)) if *k == key) {
                *slot = Some((key, value));
                return;
            }
            // Stale binding left over from an eviction; allocate fresh.
        }

        let idx = self.push_index.fetch_add(1, Ordering::Relaxed) % self.capacity();
        *self.slot_write(idx) = Some((key.clone(), value));
        relax(self.keys.write()).insert(key, idx);
    }

    pub fn find(&self, key: &K) -> Option<V> {
        if self.is_empty() {
            return None;
        }
        let idx = relax(self.keys.read()).get(key).copied()?;
        match &*self.slot_read(idx) {
            Some((k, v)) if k == key => Some(v.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// First occupied slot matching `pred`, scanning circularly from the
    /// drain cursor.
    pub fn find_if<P>(&self, mut pred: P) -> Option<V>
    where
        P: FnMut(&V) -> bool,
    {
        if self.is_empty() {
            return None;
        }
        let n = self.capacity();
        let pos = self.pop_index.load(Ordering::Relaxed) % n;
        for i in 0..n {
            let idx = (pos + i) % n;
            if let Some((_, v)) = &*self.slot_read(idx) {
                if pred(v) {
                    return Some(v.clone());
                }
            }
        }
        None
    }

    /// Clear the entry bound to `key`. The drain cursor is untouched.
    pub fn erase(&self, key: &K) {
        let idx = relax(self.keys.write()).remove(key);
        if let Some(idx) = idx {
            let mut slot = self.slot_write(idx);
            if matches!(&*slot, Some((k, _)) if k == key) {
                *slot = None;
            }
        }
    }

    /// Entry at the drain cursor, if that slot is occupied.
    pub fn front(&self) -> Option<V> {
        let idx = self.pop_index.load(Ordering::Relaxed) % self.capacity();
        self.slot_read(idx).as_ref().map(|(_, v)| v.clone())
    }

    /// Advance the drain cursor to the next occupied slot within one
    /// revolution. Finding none flips the empty flag and, when the push
    /// counter has passed the clear threshold, flushes the key directory.
    /// Returns the new cursor position.
    pub fn next_available_item(&self) -> usize {
        if self.is_empty() {
            return self.pop_index.load(Ordering::Relaxed);
        }

        let n = self.capacity();
        let pushed_before = self.pushed.load(Ordering::Relaxed);
        let old = self.pop_index.load(Ordering::Relaxed) % n;
        debug_assert!(self.pop_index.load(Ordering::Relaxed) < n);

        let mut next = old;
        for _ in 0..n {
            next = (next + 1) % n;
            if self.occupied(next) {
                break;
            }
        }

        if next == old {
            if !self.occupied(next) {
                self.empty.store(true, Ordering::Relaxed);
                // Quiescent and drained: safe moment to reclaim the
                // directory of stale bindings.
                if self.pushed.load(Ordering::Relaxed) == pushed_before {
                    self.clear_directory_if_exceeded();
                }
            } else {
                // The cursor sits on the sole occupied slot, which the
                // caller has just processed; step past it.
                next = (old + 1) % n;
            }
        }

        self.pop_index.store(next, Ordering::Relaxed);
        next
    }

    /// Circular forward traversal of occupied slots from the drain cursor.
    pub fn loop_all<F>(&self, mut invoke: F)
    where
        F: FnMut(&V),
    {
        if self.is_empty() {
            return;
        }
        let n = self.capacity();
        let pos = self.pop_index.load(Ordering::Relaxed) % n;
        for i in 0..n {
            let idx = (pos + i) % n;
            if let Some((_, v)) = &*self.slot_read(idx) {
                invoke(v);
            }
        }
    }

    /// Circular reverse traversal of occupied slots from the drain cursor.
    pub fn rloop_all<F>(&self, mut invoke: F)
    where
        F: FnMut(&V),
    {
        if self.is_empty() {
            return;
        }
        let n = self.capacity();
        let pos = self.pop_index.load(Ordering::Relaxed) % n;
        for i in 0..n {
            let idx = (pos + n - i) % n;
            if let Some((_, v)) = &*self.slot_read(idx) {
                invoke(v);
            }
        }
    }

    fn clear_directory_if_exceeded(&self) {
        if self.pushed.load(Ordering::Relaxed) > self.clear_threshold {
            let mut keys = relax(self.keys.write());
            if self.pushed.load(Ordering::Relaxed) > self.clear_threshold {
                keys.clear();
                self.pushed.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(capacity: usize) -> CircleMap<String, u32> {
        CircleMap::new(capacity)
    }

    #[test]
    fn fresh_map_is_empty() {
        let mp = map(4);
        assert!(mp.is_empty());
        assert_eq!(mp.len(), 0);
        assert_eq!(mp.capacity(), 4);
    }

    #[test]
    fn find_on_empty_map_misses() {
        let mp = map(4);
        assert_eq!(mp.find(&"k".to_string()), None);
        assert_eq!(mp.find_if(|_| true), None);
        assert_eq!(mp.front(), None);
    }

    #[test]
    fn next_available_item_on_empty_map_keeps_cursor() {
        let mp = map(4);
        assert_eq!(mp.next_available_item(), 0);
    }

    #[test]
    fn insert_then_find() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        assert!(!mp.is_empty());
        assert_eq!(mp.find(&"a".to_string()), Some(1));
        assert_eq!(mp.len(), 1);
    }

    #[test]
    fn reinsert_updates_in_place() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        mp.insert("a".into(), 2);
        assert_eq!(mp.len(), 1);
        assert_eq!(mp.find(&"a".to_string()), Some(2));
    }

    #[test]
    fn erase_clears_entry_and_binding() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        mp.erase(&"a".to_string());
        assert_eq!(mp.find(&"a".to_string()), None);
        assert_eq!(mp.len(), 0);
    }

    #[test]
    fn erase_on_empty_map_is_noop() {
        let mp = map(4);
        mp.erase(&"a".to_string());
        assert_eq!(mp.len(), 0);
    }

    #[test]
    fn overflow_evicts_oldest_slot() {
        let mp = map(2);
        mp.insert("a".into(), 1);
        mp.insert("b".into(), 2);
        mp.insert("c".into(), 3); // wraps onto a's slot
        assert_eq!(mp.len(), 2);
        assert_eq!(mp.find(&"a".to_string()), None, "evicted key must miss");
        assert_eq!(mp.find(&"b".to_string()), Some(2));
        assert_eq!(mp.find(&"c".to_string()), Some(3));
    }

    #[test]
    fn find_if_scans_from_drain_cursor() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        mp.insert("b".into(), 2);
        mp.insert("c".into(), 3);
        assert_eq!(mp.find_if(|v| *v > 1), Some(2));
        assert_eq!(mp.find_if(|v| *v > 9), None);
    }

    #[test]
    fn drain_visits_entries_and_flags_empty() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        mp.insert("b".into(), 2);

        assert_eq!(mp.front(), Some(1));
        mp.erase(&"a".to_string());
        mp.next_available_item();
        assert_eq!(mp.front(), Some(2));
        mp.erase(&"b".to_string());
        mp.next_available_item();
        assert!(mp.is_empty());
    }

    #[test]
    fn sole_processed_entry_is_stepped_past() {
        let mp = map(4);
        mp.insert("a".into(), 1);
        let next = mp.next_available_item();
        // The cursor moves off the sole occupied slot; the entry itself
        // survives and a later revolution finds it again.
        assert_eq!(next, 1);
        assert_eq!(mp.front(), None);
        assert_eq!(mp.next_available_item(), 0);
        assert_eq!(mp.front(), Some(1));
    }

    #[test]
    fn loop_all_visits_in_push_order() {
        let mp = map(8);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            mp.insert(k.into(), v);
        }
        let mut seen = Vec::new();
        mp.loop_all(|v| seen.push(*v));
        assert_eq!(seen, vec![1, 2, 3]);

        let mut rseen = Vec::new();
        mp.rloop_all(|v| rseen.push(*v));
        assert_eq!(rseen, vec![1, 3, 2]);
    }

    #[test]
    fn directory_flush_after_threshold_and_drain() {
        let mp: CircleMap<String, u32> = CircleMap::with_clear_threshold(2, 4);
        for i in 0..6 {
            mp.insert(format!("k{}", i), i);
        }
        // Drain both live entries, then let the advance discover emptiness.
        mp.erase(&"k4".to_string());
        mp.erase(&"k5".to_string());
        mp.next_available_item();
        assert!(mp.is_empty());
        // Directory was flushed; the map keeps working afterwards.
        mp.insert("fresh".into(), 9);
        assert_eq!(mp.find(&"fresh".to_string()), Some(9));
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let mp = map(3);
        for i in 0..50 {
            mp.insert(format!("k{}", i), i);
            assert!(mp.len() <= 3);
        }
    }
}
