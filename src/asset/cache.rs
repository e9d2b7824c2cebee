use super::Handle;

/// Slot storage with reusable indices.
pub struct AssetCache<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> AssetCache<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(item);
                Handle::new(index)
            }
            None => {
                self.slots.push(Some(item));
                Handle::new(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Replaces a live item, returning the previous one.
    pub fn replace(&mut self, handle: Handle<T>, item: T) -> Option<T> {
        self.get_mut(handle).map(|slot| std::mem::replace(slot, item))
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let item = self.slots.get_mut(handle.index())?.take()?;
        self.free.push(handle.index());
        Some(item)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.slots.drain(..).flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_slots_are_reused() {
        let mut cache = AssetCache::new();
        let a = cache.insert("a");
        let b = cache.insert("b");
        assert_eq!(cache.remove(a), Some("a"));
        assert_eq!(cache.get(a), None);
        let c = cache.insert("c");
        assert_eq!(c.index(), a.index());
        assert_eq!(cache.get(b), Some(&"b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn double_remove_is_harmless() {
        let mut cache = AssetCache::new();
        let a = cache.insert(1);
        assert_eq!(cache.remove(a), Some(1));
        assert_eq!(cache.remove(a), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn drain_empties_everything() {
        let mut cache = AssetCache::new();
        let a = cache.insert(1);
        cache.insert(2);
        cache.remove(a);
        assert_eq!(cache.drain().collect::<Vec<_>>(), vec![2]);
        assert!(cache.is_empty());
    }
}
