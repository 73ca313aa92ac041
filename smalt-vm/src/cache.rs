//! Global method lookup cache.
//!
//! Direct-mapped over `(selector, class)` addresses. Entries are
//! invalidated wholesale: a method installation, a class change or a
//! collection (method pointers move) clears the table.

use crate::object::{MethodRef, RawValue, Word};

const LOOKUP_CACHE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    selector: Word,
    class: Word,
    method: Word,
}

/// Hit/miss counters of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStat {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to walk the class chain.
    pub misses: u64,
}

impl CacheStat {
    /// Hit percentage over all lookups; 0 when nothing was looked up.
    pub fn ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        100.0 * self.hits as f64 / total as f64
    }
}

/// Fixed-capacity direct-mapped method cache.
pub struct MethodCache {
    entries: Box<[Entry; LOOKUP_CACHE_SIZE]>,
    stat: CacheStat,
}

impl Default for MethodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Box::new([Entry::default(); LOOKUP_CACHE_SIZE]),
            stat: CacheStat::default(),
        }
    }

    fn index(selector: RawValue, class: RawValue) -> usize {
        // capacity is a power of two
        (selector.to_word() ^ class.to_word()) % LOOKUP_CACHE_SIZE
    }

    /// The cached method for `(selector, class)`, if present.
    pub fn get(&mut self, selector: RawValue, class: RawValue) -> Option<MethodRef> {
        let entry = &self.entries[Self::index(selector, class)];
        if entry.selector == selector.to_word() && entry.class == class.to_word() {
            self.stat.hits += 1;
            Some(MethodRef::new(RawValue::from_word(entry.method).as_object()))
        } else {
            self.stat.misses += 1;
            None
        }
    }

    /// Install a lookup result, overwriting whatever hashed to the slot.
    pub fn set(&mut self, selector: RawValue, class: RawValue, method: MethodRef) {
        self.entries[Self::index(selector, class)] = Entry {
            selector: selector.to_word(),
            class: class.to_word(),
            method: method.as_value().to_word(),
        };
    }

    /// Drop every entry. Counters survive.
    pub fn clear(&mut self) {
        self.entries.fill(Entry::default());
    }

    /// Counters accumulated since construction.
    pub fn stat(&self) -> CacheStat {
        self.stat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryManager;
    use crate::memory::NonCollectMemoryManager;
    use crate::object::ObjectPtr;

    fn fake_object(mm: &mut NonCollectMemoryManager) -> ObjectPtr {
        let mut gc = false;
        mm.new_ordinary(RawValue::ZERO, 1, RawValue::ZERO, &mut gc)
            .unwrap()
    }

    #[test]
    fn get_returns_the_most_recent_set() {
        let mut mm = NonCollectMemoryManager::new(4096, 64);
        let selector = RawValue::from_object(fake_object(&mut mm));
        let class = RawValue::from_object(fake_object(&mut mm));
        let method = MethodRef::new(fake_object(&mut mm));
        let other = MethodRef::new(fake_object(&mut mm));

        let mut cache = MethodCache::new();
        assert!(cache.get(selector, class).is_none());

        cache.set(selector, class, method);
        assert_eq!(cache.get(selector, class), Some(method));

        cache.set(selector, class, other);
        assert_eq!(cache.get(selector, class), Some(other));
    }

    #[test]
    fn clear_leaves_no_false_positive() {
        let mut mm = NonCollectMemoryManager::new(4096, 64);
        let selector = RawValue::from_object(fake_object(&mut mm));
        let class = RawValue::from_object(fake_object(&mut mm));
        let method = MethodRef::new(fake_object(&mut mm));

        let mut cache = MethodCache::new();
        cache.set(selector, class, method);
        cache.clear();
        assert!(cache.get(selector, class).is_none());
    }

    #[test]
    fn stat_tracks_hits_and_misses() {
        let mut mm = NonCollectMemoryManager::new(4096, 64);
        let selector = RawValue::from_object(fake_object(&mut mm));
        let class = RawValue::from_object(fake_object(&mut mm));
        let method = MethodRef::new(fake_object(&mut mm));

        let mut cache = MethodCache::new();
        assert!(cache.get(selector, class).is_none());
        cache.set(selector, class, method);
        for _ in 0..3 {
            assert!(cache.get(selector, class).is_some());
        }

        let stat = cache.stat();
        assert_eq!(stat.misses, 1);
        assert_eq!(stat.hits, 3);
        assert!((stat.ratio() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_cache_ratio_is_zero() {
        let cache = MethodCache::new();
        assert_eq!(cache.stat().ratio(), 0.0);
    }
}
