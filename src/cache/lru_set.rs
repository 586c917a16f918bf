//! Bounded recency set with batch eviction.
//!
//! Entries are kept in least-recently-used to most-recently-used order. A push
//! beyond capacity evicts the single oldest entry; [`ConcurrentLruSet::clear_half`]
//! drops the older half in one go, which is what callers use to shed load when
//! memory runs short. Every removal other than [`ConcurrentLruSet::clear`] is
//! reported to the eviction callback.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

type EvictionCallback<T> = Box<dyn Fn(T) + Send + Sync>;

pub struct ConcurrentLruSet<T> {
    items: Mutex<LruCache<T, ()>>,
    capacity: NonZeroUsize,
    on_evict: EvictionCallback<T>,
}

impl<T> ConcurrentLruSet<T>
where
    T: Hash + Eq + Clone,
{
    /// A capacity of zero is treated as one.
    pub fn new<F>(capacity: usize, on_evict: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ConcurrentLruSet {
            // Unbounded internally so eviction stays under our control.
            items: Mutex::new(LruCache::unbounded()),
            capacity,
            on_evict: Box::new(on_evict),
        }
    }

    pub fn without_callback(capacity: usize) -> Self {
        Self::new(capacity, |_| {})
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<T, ()>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `item` as most recently used, inserting it if absent.
    pub fn push(&self, item: T) {
        let evicted = {
            let mut items = self.lock();
            if items.contains(&item) {
                items.promote(&item);
                None
            } else {
                items.put(item, ());
                if items.len() > self.capacity.get() {
                    items.pop_lru().map(|(k, _)| k)
                } else {
                    None
                }
            }
        };

        if let Some(item) = evicted {
            (self.on_evict)(item);
        }
    }

    /// Remove the least recently used ⌊len/2⌋ entries.
    ///
    /// Repeated calls shrink the set 5 → 3 → 2 → 1; a single entry is never
    /// dropped this way.
    pub fn clear_half(&self) {
        let evicted: Vec<T> = {
            let mut items = self.lock();
            let to_remove = items.len() / 2;
            (0..to_remove)
                .filter_map(|_| items.pop_lru().map(|(k, _)| k))
                .collect()
        };

        if !evicted.is_empty() {
            tracing::debug!("clear_half evicted {} entries", evicted.len());
        }
        for item in evicted {
            (self.on_evict)(item);
        }
    }

    /// First entry, scanning from least to most recently used, that matches.
    ///
    /// Does not touch recency.
    pub fn first_or_default<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let items = self.lock();
        items
            .iter()
            .rev()
            .map(|(k, _)| k)
            .find(|k| predicate(k))
            .cloned()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.lock().contains(item)
    }

    /// Entries from least to most recently used.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// Drop every entry without notifying the eviction callback.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_set(capacity: usize) -> (ConcurrentLruSet<String>, Arc<Mutex<Vec<String>>>) {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dropped);
        let set = ConcurrentLruSet::new(capacity, move |item: String| {
            sink.lock().unwrap().push(item);
        });
        (set, dropped)
    }

    #[test]
    fn test_push_over_capacity_evicts_single_oldest() {
        let (set, dropped) = recording_set(3);
        for id in ["a", "b", "c", "d"] {
            set.push(id.to_string());
        }

        assert_eq!(*dropped.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.snapshot(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_repush_moves_to_most_recent_without_duplicating() {
        let (set, dropped) = recording_set(3);
        for id in ["a", "b", "c"] {
            set.push(id.to_string());
        }
        set.push("a".to_string());
        assert_eq!(set.len(), 3);
        assert!(dropped.lock().unwrap().is_empty());

        set.push("d".to_string());
        assert_eq!(*dropped.lock().unwrap(), vec!["b".to_string()]);
        assert_eq!(set.snapshot(), vec!["c", "a", "d"]);
    }

    #[test]
    fn test_clear_half_keeps_the_larger_half() {
        let (set, dropped) = recording_set(5);
        for i in 1..=6 {
            set.push(i.to_string());
        }
        assert_eq!(*dropped.lock().unwrap(), vec!["1".to_string()]);

        set.clear_half();
        assert_eq!(dropped.lock().unwrap().len(), 3);
        set.clear_half();
        assert_eq!(dropped.lock().unwrap().len(), 4);
        set.clear_half();
        assert_eq!(dropped.lock().unwrap().len(), 5);
        set.clear_half();
        assert_eq!(dropped.lock().unwrap().len(), 5);

        assert_eq!(set.snapshot(), vec!["6"]);
        assert_eq!(*dropped.lock().unwrap(), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_clear_half_of_two_keeps_most_recent() {
        let (set, dropped) = recording_set(5);
        set.push("a".to_string());
        set.push("b".to_string());

        set.clear_half();
        assert_eq!(*dropped.lock().unwrap(), vec!["a"]);
        assert_eq!(set.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_clear_half_on_empty_is_noop() {
        let (set, dropped) = recording_set(4);
        set.clear_half();
        assert!(dropped.lock().unwrap().is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn test_clear_half_reports_oldest_first() {
        let (set, dropped) = recording_set(10);
        for id in ["a", "b", "c", "d"] {
            set.push(id.to_string());
        }
        set.push("a".to_string());

        set.clear_half();
        assert_eq!(*dropped.lock().unwrap(), vec!["b", "c"]);
        assert_eq!(set.snapshot(), vec!["d", "a"]);
    }

    #[test]
    fn test_first_or_default() {
        let (set, _) = recording_set(5);
        for i in 1..=6 {
            set.push(format!("Item #{}", i));
        }

        assert_eq!(
            set.first_or_default(|item| item == "Item #4"),
            Some("Item #4".to_string())
        );
        assert_eq!(set.first_or_default(|item| item == "Item #1"), None);
        assert_eq!(
            set.first_or_default(|item| item.starts_with("Item")),
            Some("Item #2".to_string())
        );
    }

    #[test]
    fn test_clear_skips_callback() {
        let (set, dropped) = recording_set(5);
        set.push("a".to_string());
        set.clear();
        assert!(set.is_empty());
        assert!(dropped.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (set, dropped) = recording_set(0);
        set.push("a".to_string());
        set.push("b".to_string());
        assert_eq!(set.capacity(), 1);
        assert_eq!(set.snapshot(), vec!["b"]);
        assert_eq!(*dropped.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_callback_may_reenter_set() {
        let set: Arc<Mutex<Option<Arc<ConcurrentLruSet<u32>>>>> = Arc::new(Mutex::new(None));
        let handle = Arc::clone(&set);
        let lru = Arc::new(ConcurrentLruSet::new(1, move |_evicted: u32| {
            if let Some(inner) = handle.lock().unwrap().as_ref() {
                let _ = inner.len();
            }
        }));
        *set.lock().unwrap() = Some(Arc::clone(&lru));

        lru.push(1);
        lru.push(2);
        assert_eq!(lru.len(), 1);
        set.lock().unwrap().take();
    }
}
