//! Handle → request index.
//!
//! An arena of slots addressed by [`RequestHandle`]. Lookups are O(1).
//! Freed slots are recycled lowest-first with their generation bumped, so a
//! handle is never reused while its request is live and a stale handle is
//! detected on lookup.

use super::handle::RequestHandle;

/// Result of resolving a handle against the registry.
#[derive(Debug)]
pub enum Lookup<T> {
    /// The handle refers to a live entry.
    Found(T),
    /// The slot exists but has been reaped or recycled since.
    Expired,
    /// The handle was never issued by this registry.
    Unknown,
}

#[derive(Debug)]
struct Slot<E> {
    generation: u32,
    entry: Option<E>,
}

/// Generational arena of live requests.
#[derive(Debug)]
pub struct RequestRegistry<E> {
    slots: Vec<Slot<E>>,
    free: Vec<u32>,
    live: usize,
}

impl<E> Default for RequestRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RequestRegistry<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Inserts an entry and returns its handle.
    pub fn insert(&mut self, entry: E) -> RequestHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = Some(entry);
            return RequestHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        RequestHandle::new(index, 0)
    }

    fn slot(&self, handle: RequestHandle) -> Lookup<&Slot<E>> {
        match self.slots.get(handle.index() as usize) {
            None => Lookup::Unknown,
            Some(slot) if slot.generation != handle.generation() => {
                if handle.generation() > slot.generation {
                    Lookup::Unknown
                } else {
                    Lookup::Expired
                }
            }
            Some(slot) => Lookup::Found(slot),
        }
    }

    /// Resolves a handle, distinguishing expired from never-issued handles.
    pub fn lookup(&self, handle: RequestHandle) -> Lookup<&E> {
        match self.slot(handle) {
            Lookup::Found(slot) => match slot.entry.as_ref() {
                Some(entry) => Lookup::Found(entry),
                None => Lookup::Expired,
            },
            Lookup::Expired => Lookup::Expired,
            Lookup::Unknown => Lookup::Unknown,
        }
    }

    /// Returns the entry for a live handle.
    pub fn get(&self, handle: RequestHandle) -> Option<&E> {
        match self.lookup(handle) {
            Lookup::Found(entry) => Some(entry),
            _ => None,
        }
    }

    /// Returns the entry for a live handle mutably.
    pub fn get_mut(&mut self, handle: RequestHandle) -> Option<&mut E> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Removes and returns the entry, releasing its slot for reuse.
    pub fn remove(&mut self, handle: RequestHandle) -> Option<E> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        self.live -= 1;
        self.free.push(handle.index());
        // Keep the lowest index on top so slots are recycled lowest-first.
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        Some(entry)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over live entries with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (RequestHandle, &E)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (RequestHandle::new(index as u32, slot.generation), entry))
        })
    }

    /// Handles of all live entries.
    pub fn handles(&self) -> Vec<RequestHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}
