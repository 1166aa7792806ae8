//! Sparse-set component storage
//!
//! Dense arrays hold the components and their owners; a sparse index keyed by
//! entity slot gives O(1) presence checks. Lookups compare the full id, so a
//! stale id never reads a component belonging to the slot's new occupant.

use crate::entity::EntityId;

#[derive(Debug)]
pub struct SparseSet<T> {
    sparse: Vec<Option<usize>>,
    dense_ids: Vec<EntityId>,
    dense: Vec<T>,
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        Self {
            sparse: Vec::new(),
            dense_ids: Vec::new(),
            dense: Vec::new(),
        }
    }

    fn dense_index(&self, id: EntityId) -> Option<usize> {
        let index = (*self.sparse.get(id.index() as usize)?)?;
        (self.dense_ids[index] == id).then_some(index)
    }

    /// Attaches `value` to `id`, returning the component it replaced.
    pub fn insert(&mut self, id: EntityId, value: T) -> Option<T> {
        if let Some(index) = self.dense_index(id) {
            return Some(std::mem::replace(&mut self.dense[index], value));
        }

        // A stale occupant of the same slot is dropped.
        let slot = id.index() as usize;
        if let Some(Some(index)) = self.sparse.get(slot).copied() {
            let stale = self.dense_ids[index];
            self.remove(stale);
        }

        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, None);
        }
        self.sparse[slot] = Some(self.dense.len());
        self.dense_ids.push(id);
        self.dense.push(value);
        None
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let index = self.dense_index(id)?;
        self.sparse[id.index() as usize] = None;

        let last = self.dense.len() - 1;
        if index != last {
            let moved = self.dense_ids[last];
            self.sparse[moved.index() as usize] = Some(index);
        }
        self.dense_ids.swap_remove(index);
        Some(self.dense.swap_remove(index))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.dense_index(id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.dense_index(id).map(|index| &self.dense[index])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.dense_index(id).map(|index| &mut self.dense[index])
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.dense_ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.dense_ids.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.dense_ids.iter().copied().zip(self.dense.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_replace() {
        let mut set = SparseSet::new();
        let id = EntityId::new(5, 0);
        assert!(set.insert(id, 10).is_none());
        assert_eq!(set.get(id), Some(&10));
        assert_eq!(set.insert(id, 11), Some(10));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_keeps_other_entries_reachable() {
        let mut set = SparseSet::new();
        let a = EntityId::new(0, 0);
        let b = EntityId::new(1, 0);
        let c = EntityId::new(2, 0);
        set.insert(a, "a");
        set.insert(b, "b");
        set.insert(c, "c");

        assert_eq!(set.remove(a), Some("a"));
        assert_eq!(set.get(b), Some(&"b"));
        assert_eq!(set.get(c), Some(&"c"));
        assert!(!set.contains(a));
        assert_eq!(set.remove(a), None);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_generation_mismatch_is_absent() {
        let mut set = SparseSet::new();
        let old = EntityId::new(3, 0);
        let new = EntityId::new(3, 1);
        set.insert(old, 1);

        assert!(set.get(new).is_none());
        set.insert(new, 2);
        assert!(set.get(old).is_none());
        assert_eq!(set.get(new), Some(&2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_iter_mut_updates_in_place() {
        let mut set = SparseSet::new();
        for i in 0..4 {
            set.insert(EntityId::new(i, 0), i * 10);
        }
        for (_, value) in set.iter_mut() {
            *value += 1;
        }
        let values: Vec<u32> = set.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 11, 21, 31]);
        assert_eq!(set.ids().len(), 4);
    }
}
