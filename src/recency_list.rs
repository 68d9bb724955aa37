//! A [RecencyList] is the bookkeeping behind the decoded cache: a move-to-front list of entries which can be found
//! either by asset identity or by handle.
//!
//! This is implemented as a vec-backed doubly linked list with a free list, plus two auxiliary hash-based indexes.  All
//! three always agree on membership.
//!
//! The list itself never decides what to evict: [RecencyList::evict_where] walks from the least recently used end and
//! asks the caller which entry can go.
use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;

use crate::SampleHandle;

struct OccupiedEntry<V> {
    key: Arc<str>,
    handle: SampleHandle,
    item: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptyEntry {
    next_empty: Option<usize>,
}

enum ListEntry<V> {
    /// This entry is empty, possibly with a pointer at the next empty entry.
    Empty(EmptyEntry),
    /// This entry is occupied, and doubly linked to the previous and next entry.
    Occupied(OccupiedEntry<V>),
}

impl<V> ListEntry<V> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedEntry<V> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedEntry<V> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyEntry {
        match self {
            ListEntry::Empty(ref mut x) => x,
            _ => panic!("Entry should be empty"),
        }
    }
}

pub struct RecencyList<V> {
    entries: Vec<ListEntry<V>>,
    by_key: HashMap<Arc<str>, usize, RandomState>,
    by_handle: HashMap<SampleHandle, usize, RandomState>,
    /// Most recently used.
    entries_head: Option<usize>,
    /// Least recently used.
    entries_tail: Option<usize>,
    empty_head: Option<usize>,
}

impl<V> Default for RecencyList<V> {
    fn default() -> Self {
        RecencyList::new()
    }
}

impl<V> RecencyList<V> {
    pub fn new() -> RecencyList<V> {
        RecencyList {
            entries: Default::default(),
            by_key: Default::default(),
            by_handle: Default::default(),
            entries_head: None,
            entries_tail: None,
            empty_head: None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Is `key` present?  Doesn't count as a use.
    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Entirely unlink an occupied index from the list.
    /// Used as a precursor step to lots of things such as patching up the head.
    fn unlink_index(&mut self, index: usize) {
        // Easiest to handle the tail first.
        if Some(index) == self.entries_tail {
            self.entries_tail = self.entries[index].as_occupied().prev;
        }

        if Some(index) == self.entries_head {
            // unlinking the head is special.
            self.entries_head = self.entries[index].as_occupied().next;
            if let Some(n) = self.entries_head {
                self.entries[n].as_occupied_mut().prev = None;
            }

            return;
        }

        // Otherwise we just do a standard linked list unlink.
        let old_prev = self.entries[index]
            .as_occupied()
            .prev
            .expect("Isn't the head");
        let old_next = self.entries[index].as_occupied().next;
        self.entries[old_prev].as_occupied_mut().next = old_next;
        if let Some(n) = old_next {
            self.entries[n].as_occupied_mut().prev = Some(old_prev);
        }
    }

    /// Link an occupied but unlinked index in as the most recent item.
    fn link_at_head(&mut self, index: usize) {
        {
            let entry = self.entries[index].as_occupied_mut();
            entry.prev = None;
            entry.next = self.entries_head;
        }
        if let Some(i) = self.entries_head {
            self.entries[i].as_occupied_mut().prev = Some(index);
        }
        self.entries_head = Some(index);

        // If this is the only entry, then there was no tail.
        if self.entries_tail.is_none() {
            self.entries_tail = Some(index);
        }
    }

    /// Given the index of an occupied entry, make it the most recent item.
    fn make_most_recent(&mut self, index: usize) {
        if Some(index) == self.entries_head {
            return;
        }
        self.unlink_index(index);
        self.link_at_head(index);
    }

    /// Find an entry by identity, marking it most recently used.
    pub fn get_by_key(&mut self, key: &str) -> Option<(SampleHandle, &V)> {
        let ind = *self.by_key.get(key)?;
        self.make_most_recent(ind);
        let entry = self.entries[ind].as_occupied();
        Some((entry.handle, &entry.item))
    }

    /// Find an entry by handle, marking it most recently used.
    pub fn get_by_handle(&mut self, handle: SampleHandle) -> Option<&V> {
        let ind = *self.by_handle.get(&handle)?;
        self.make_most_recent(ind);
        Some(&self.entries[ind].as_occupied().item)
    }

    /// Make a specific index of the list become empty, returning what was there.
    fn become_empty(&mut self, index: usize) -> (Arc<str>, SampleHandle, V) {
        self.unlink_index(index);
        let mut old = ListEntry::Empty(EmptyEntry {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.entries[index]);
        self.empty_head = Some(index);
        match old {
            ListEntry::Occupied(OccupiedEntry {
                key, handle, item, ..
            }) => {
                self.by_key.remove(&key);
                self.by_handle.remove(&handle);
                (key, handle, item)
            }
            _ => panic!("Should have been occupied"),
        }
    }

    /// Find an available empty index, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.entries[e].as_empty_mut().next_empty;
            return e;
        }

        self.entries
            .push(ListEntry::Empty(EmptyEntry { next_empty: None }));
        self.entries.len() - 1
    }

    /// Add a new entry as the most recently used one.
    ///
    /// Neither the key nor the handle may already be present.
    pub fn insert(&mut self, key: Arc<str>, handle: SampleHandle, value: V) {
        assert!(
            !self.by_key.contains_key(&*key) && !self.by_handle.contains_key(&handle),
            "Entry is already present"
        );

        let ind = self.find_empty();
        self.entries[ind] = ListEntry::Occupied(OccupiedEntry {
            key: key.clone(),
            handle,
            item: value,
            prev: None,
            next: None,
        });
        self.by_key.insert(key, ind);
        self.by_handle.insert(handle, ind);
        self.link_at_head(ind);
    }

    /// Walk from the least recently used entry towards the most recently used one, removing and returning the first
    /// entry for which `can_evict` says yes.
    ///
    /// Returns `None` if no entry could be evicted, in which case the list is unchanged.
    pub fn evict_where(
        &mut self,
        mut can_evict: impl FnMut(&V) -> bool,
    ) -> Option<(Arc<str>, SampleHandle, V)> {
        let mut cur = self.entries_tail;
        while let Some(ind) = cur {
            let entry = self.entries[ind].as_occupied();
            let prev = entry.prev;
            if can_evict(&entry.item) {
                return Some(self.become_empty(ind));
            }
            cur = prev;
        }

        None
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SampleHandle, &V)> {
        let mut ind = self.entries_head;
        std::iter::from_fn(move || {
            let next = ind?;
            let ret = self.entries[next].as_occupied();
            ind = ret.next;
            Some((&*ret.key, ret.handle, &ret.item))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lru::LruCache;
    use proptest::prelude::*;

    fn keys<V>(list: &RecencyList<V>) -> Vec<String> {
        list.iter().map(|(k, _, _)| k.to_string()).collect()
    }

    /// Load `key` the way the decoded cache does: a hit touches, a miss evicts the least recently used entry when at
    /// capacity and then inserts.
    fn load(list: &mut RecencyList<u64>, capacity: usize, key: u64, next_handle: &mut u64) {
        let k = key.to_string();
        if list.get_by_key(&k).is_some() {
            return;
        }
        if list.len() >= capacity {
            list.evict_where(|_| true);
        }
        *next_handle += 1;
        list.insert(k.into(), SampleHandle(*next_handle), key);
    }

    // When every eviction succeeds, a list capped by entry count is exactly an [LruCache].
    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 500,
            max_shrink_iters: 10000,
            ..Default::default()
        })]
        #[test]
        fn test_against_lru_cache(
            capacity in 1..20usize,
            commands in prop::collection::vec(0..40u64, 0..2000)
        ) {
            let mut known_good = LruCache::<u64, ()>::new(capacity);
            let mut ours = RecencyList::<u64>::new();
            let mut next_handle = 0;

            for key in commands {
                if known_good.get(&key).is_none() {
                    known_good.put(key, ());
                }
                load(&mut ours, capacity, key, &mut next_handle);

                let good_state = known_good.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>();
                prop_assert_eq!(&good_state, &keys(&ours));
                prop_assert_eq!(ours.by_key.len(), ours.by_handle.len());
                for (k, h, v) in ours.iter() {
                    prop_assert_eq!(ours.by_key[k], ours.by_handle[&h]);
                    prop_assert_eq!(k, v.to_string());
                }
            }
        }
    }

    #[test]
    fn test_touch_by_key_and_handle() {
        let mut list = RecencyList::new();
        list.insert("a".into(), SampleHandle(1), 'a');
        list.insert("b".into(), SampleHandle(2), 'b');
        list.insert("c".into(), SampleHandle(3), 'c');
        assert_eq!(keys(&list), vec!["c", "b", "a"]);

        assert_eq!(list.get_by_key("a"), Some((SampleHandle(1), &'a')));
        assert_eq!(keys(&list), vec!["a", "c", "b"]);

        assert_eq!(list.get_by_handle(SampleHandle(2)), Some(&'b'));
        assert_eq!(keys(&list), vec!["b", "a", "c"]);

        // Touching the head changes nothing.
        list.get_by_handle(SampleHandle(2));
        assert_eq!(keys(&list), vec!["b", "a", "c"]);

        assert!(list.get_by_key("z").is_none());
        assert!(list.get_by_handle(SampleHandle(99)).is_none());
        assert!(list.contains_key("c"));
    }

    #[test]
    fn test_evict_skips_refusals() {
        let mut list = RecencyList::new();
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            list.insert((*k).into(), SampleHandle(i as u64), *k);
        }

        // The tail refuses, so the next least recently used goes.
        let (key, handle, _) = list.evict_where(|v| *v != "a").unwrap();
        assert_eq!((&*key, handle), ("b", SampleHandle(1)));
        assert_eq!(keys(&list), vec!["d", "c", "a"]);
        assert!(list.get_by_handle(SampleHandle(1)).is_none());

        // Nothing can go.
        assert!(list.evict_where(|_| false).is_none());
        assert_eq!(list.len(), 3);

        // Evict the head, then everything else, then reuse the freed slots.
        assert_eq!(&*list.evict_where(|v| *v == "d").unwrap().0, "d");
        assert_eq!(keys(&list), vec!["c", "a"]);
        while list.evict_where(|_| true).is_some() {}
        assert!(list.is_empty());
        assert!(list.iter().next().is_none());

        list.insert("e".into(), SampleHandle(10), "e");
        list.insert("f".into(), SampleHandle(11), "f");
        assert_eq!(keys(&list), vec!["f", "e"]);
        assert_eq!(list.entries.len(), 4);
    }
}
