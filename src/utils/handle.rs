use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`]. Packs into a non-zero `u64` so it can
/// stand in for a raw Vulkan handle.
#[derive(Debug)]
pub struct Handle<T> {
    pub slot: u32,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
            phantom: PhantomData,
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

/// Slot storage with generation checks; released slots are reused and any
/// handle into them goes stale.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<u32>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(initial_size),
            empty: Vec::new(),
            generation: Vec::with_capacity(initial_size),
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let slot = match self.empty.pop() {
            Some(slot) => {
                self.items[slot as usize] = Some(item);
                slot
            }
            None => {
                self.items.push(Some(item));
                // generation 0 is never handed out so a packed handle is never null
                self.generation.push(1);
                (self.items.len() - 1) as u32
            }
        };

        Handle {
            slot,
            generation: self.generation[slot as usize],
            phantom: PhantomData,
        }
    }

    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if self.generation.get(slot) != Some(&item.generation) {
            return None;
        }
        let value = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1).max(1);
        self.empty.push(item.slot);
        Some(value)
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if self.generation.get(slot) == Some(&item.generation) {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        let slot = item.slot as usize;
        if self.generation.get(slot) == Some(&item.generation) {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
