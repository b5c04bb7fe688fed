/// Fixed-capacity arena with a free-index stack. Slots are reused in LIFO
/// order; a full pool is a normal `None`, not an error.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            // lowest index on top
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn acquire(&mut self, value: T) -> Option<usize> {
        let index = self.free.pop()?;
        self.slots[index] = Some(value);
        Some(index)
    }

    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
    }

    /// Keeps only the live values for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut T) -> bool) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot {
                if !keep(value) {
                    *slot = None;
                    self.free.push(index);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.free = (0..self.slots.len()).rev().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = Pool::with_capacity(2);
        assert_eq!(pool.acquire('a'), Some(0));
        assert_eq!(pool.acquire('b'), Some(1));
        assert_eq!(pool.acquire('c'), None);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool = Pool::with_capacity(3);
        pool.acquire(1);
        let second = pool.acquire(2).unwrap();
        pool.acquire(3);

        assert_eq!(pool.release(second), Some(2));
        assert_eq!(pool.release(second), None);
        assert_eq!(pool.acquire(9), Some(second));
        assert_eq!(pool.get(second), Some(&9));
    }

    #[test]
    fn retain_frees_rejected_values() {
        let mut pool = Pool::with_capacity(4);
        for v in 0..4 {
            pool.acquire(v);
        }
        pool.retain(|v| *v % 2 == 0);
        assert_eq!(pool.len(), 2);
        let live: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![0, 2]);
    }

    #[test]
    fn clear_restores_full_capacity() {
        let mut pool = Pool::with_capacity(2);
        pool.acquire(());
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.acquire(()), Some(0));
    }
}
