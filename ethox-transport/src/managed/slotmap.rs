use core::fmt;

/// A bounded slotmap with owned storage.
///
/// A slotmap provides a `Vec`-like interface where each entry is associated with a stable
/// index-like key. Lookup with the key will detect if an entry has been removed but does not
/// require any lifetime relation. Storage grows on demand up to the capacity given at
/// construction, after which insertion fails.
///
/// ## Usage
///
/// ```
/// # use ethox_transport::managed::SlotMap;
/// let mut map = SlotMap::with_capacity(4);
/// let key = map.insert(42).unwrap();
/// assert_eq!(map.get(key).cloned(), Some(42));
/// assert_eq!(map.remove(key), Some(42));
/// assert!(map.get(key).is_none());
/// ```
pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    /// Index of the first free slot, `slots.len()` if there is none.
    free_top: usize,
    generation: Generation,
    capacity: usize,
    len: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. Accessing the slotmap with the index
/// again after the entry was removed will fail, even if the index where the element was previously
/// stored has been reused for another element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    idx: usize,
    generation: Generation,
}

/// The generation counter.
///
/// Has strictly positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Generation(u64);

enum Slot<T> {
    Occupied {
        generation: Generation,
        value: T,
    },
    /// Links to the next free slot.
    Vacant {
        next_free: usize,
    },
}

impl<T> SlotMap<T> {
    /// Create an empty map holding at most `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        SlotMap {
            slots: Vec::new(),
            free_top: 0,
            generation: Generation::default(),
            capacity,
            len: 0,
        }
    }

    /// Retrieve a value by key.
    pub fn get(&self, key: Key) -> Option<&T> {
        match self.slots.get(key.idx)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Retrieve a mutable value by key.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.slots.get_mut(key.idx)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Insert a value, returning its key.
    ///
    /// Returns `None` if the map is at capacity.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        if self.len >= self.capacity {
            return None;
        }

        let generation = self.generation;
        self.generation.advance();
        let idx = self.free_top;

        let occupied = Slot::Occupied { generation, value };
        match self.slots.get_mut(idx) {
            Some(slot) => {
                self.free_top = match slot {
                    Slot::Vacant { next_free } => *next_free,
                    Slot::Occupied { .. } => unreachable!("free list links to an occupied slot"),
                };
                *slot = occupied;
            },
            None => {
                self.slots.push(occupied);
                self.free_top = self.slots.len();
            },
        }

        self.len += 1;
        Some(Key { idx, generation })
    }

    /// The key the next successful `insert` will return.
    ///
    /// Returns `None` if the map is at capacity.
    pub fn next_key(&self) -> Option<Key> {
        if self.len >= self.capacity {
            return None;
        }
        Some(Key { idx: self.free_top, generation: self.generation })
    }

    /// Remove an element.
    ///
    /// Returns `None` if the key did not refer to a live element.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        self.get(key)?;
        let vacant = Slot::Vacant { next_free: self.free_top };
        let old = core::mem::replace(&mut self.slots[key.idx], vacant);
        self.free_top = key.idx;
        self.len -= 1;

        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// The number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no live elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of live elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over all live elements with their keys, in slot order.
    pub fn iter(&self) -> impl Iterator<Item=(Key, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| match slot {
            Slot::Occupied { generation, value } => Some((Key { idx, generation: *generation }, value)),
            Slot::Vacant { .. } => None,
        })
    }
}

impl Key {
    /// A raw representation of the key, for printing and statistics.
    pub fn as_raw(self) -> (usize, u64) {
        (self.idx, self.generation.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}v{}", self.idx, self.generation.0)
    }
}

impl Generation {
    fn advance(&mut self) {
        self.0 = self.0.checked_add(1).unwrap_or(1);
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation(1)
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
