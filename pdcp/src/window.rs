//! PDCP Window
//!
//! Fixed-capacity arena of `Window_Size` slots indexed by `COUNT mod Window_Size`. Each
//! occupied slot stores its full COUNT, so an entry left over from a previous wrap is
//! detected by comparing COUNTs rather than by occupancy alone.

use crate::config::SnSize;

#[derive(Debug)]
pub struct SduWindow<T> {
    slots: Box<[Option<(u32, T)>]>,
    len: usize,
}

impl<T> SduWindow<T> {
    /// Create an empty window sized for the given SN size
    pub fn new(sn_size: SnSize) -> Self {
        let capacity = sn_size.window_size() as usize;
        let slots = std::iter::repeat_with(|| None).take(capacity).collect();
        Self { slots, len: 0 }
    }

    fn index(&self, count: u32) -> usize {
        count as usize % self.slots.len()
    }

    /// Whether an entry for exactly this COUNT is stored
    pub fn contains(&self, count: u32) -> bool {
        self.get(count).is_some()
    }

    /// COUNT of whatever occupies the slot of `count`, if anything
    pub fn occupant(&self, count: u32) -> Option<u32> {
        self.slots[self.index(count)].as_ref().map(|(c, _)| *c)
    }

    pub fn get(&self, count: u32) -> Option<&T> {
        match &self.slots[self.index(count)] {
            Some((c, value)) if *c == count => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, count: u32) -> Option<&mut T> {
        let idx = self.index(count);
        match &mut self.slots[idx] {
            Some((c, value)) if *c == count => Some(value),
            _ => None,
        }
    }

    /// Store `value` at `count`, returning the entry previously held by the slot
    pub fn insert(&mut self, count: u32, value: T) -> Option<(u32, T)> {
        let idx = self.index(count);
        let evicted = self.slots[idx].replace((count, value));
        if evicted.is_none() {
            self.len += 1;
        }
        evicted
    }

    /// Remove the entry for exactly this COUNT
    pub fn remove(&mut self, count: u32) -> Option<T> {
        if self.occupant(count) != Some(count) {
            return None;
        }
        let idx = self.index(count);
        self.len -= 1;
        self.slots[idx].take().map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.len = 0;
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
