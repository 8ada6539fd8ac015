//! Item pool management.
//!
//! Items live in an arena owned by one decoder. Handles are generation
//! checked, so a handle to a recycled slot is detected instead of silently
//! reading a different item. Each slot is reference counted: the chart holds
//! one reference per item it stores and every parent holds one reference per
//! child, so a derivation stays reconstructible for as long as its root is
//! reachable.

use crate::item::Item;
use crate::settings::Settings;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("item pool exhausted at {0} slots")]
    Exhausted(usize),
    #[error("stale item handle {0:?}")]
    Stale(ItemId),
}

/// Handle to a pooled item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

impl ItemId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        ItemId { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    refcount: u32,
    item: Option<Item>,
}

/// Arena of items with a free list.
#[derive(Debug)]
pub struct ItemPool {
    slots: Vec<Slot>,
    free_list: VecDeque<u32>,
    hard_cap: Option<usize>,
    live: usize,
}

impl ItemPool {
    /// Create a pool with room for `capacity` items before it reallocates.
    /// Without a `hard_cap` the pool grows on demand.
    pub fn new(capacity: usize, hard_cap: Option<usize>) -> Self {
        let capacity = hard_cap.map_or(capacity, |cap| capacity.min(cap));
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: VecDeque::with_capacity(capacity),
            hard_cap,
            live: 0,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.pool_capacity, settings.pool_hard_cap)
    }

    /// Store an item, taking one reference on each of its children.
    pub fn allocate(&mut self, item: Item) -> Result<ItemId, PoolError> {
        let children = item.children();
        if let Some(&stale) = children.iter().find(|&&c| !self.is_live(c)) {
            return Err(PoolError::Stale(stale));
        }

        let index = match self.free_list.pop_front() {
            Some(index) => index,
            None => {
                if let Some(cap) = self.hard_cap {
                    if self.slots.len() >= cap {
                        warn!(cap, "item pool exhausted");
                        return Err(PoolError::Exhausted(cap));
                    }
                }
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        for child in children {
            self.slots[child.index()].refcount += 1;
        }

        let slot = &mut self.slots[index as usize];
        slot.refcount = 1;
        slot.item = Some(item);
        self.live += 1;
        Ok(ItemId::new(index, slot.generation))
    }

    /// Take another reference to a live item.
    pub fn retain(&mut self, id: ItemId) -> Result<(), PoolError> {
        let slot = self.live_slot_mut(id)?;
        slot.refcount += 1;
        Ok(())
    }

    /// Release one reference. At zero the slot is recycled and its
    /// children are released in turn.
    pub fn put_back(&mut self, id: ItemId) -> Result<(), PoolError> {
        self.live_slot_mut(id)?;

        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let slot = &mut self.slots[id.index()];
            slot.refcount -= 1;
            if slot.refcount > 0 {
                continue;
            }
            if let Some(item) = slot.item.take() {
                pending.extend(item.children());
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push_back(id.index);
            self.live -= 1;
            trace!(index = id.index, "recycled item slot");
        }
        Ok(())
    }

    pub fn put_back_all(&mut self, ids: impl IntoIterator<Item = ItemId>) -> Result<(), PoolError> {
        for id in ids {
            self.put_back(id)?;
        }
        Ok(())
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_ref())
    }

    /// Mutable access for score and constraint updates. Children must not be
    /// changed through this reference.
    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_mut())
    }

    pub fn is_live(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Slots ready for reuse.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Slots created so far.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn live_slot_mut(&mut self, id: ItemId) -> Result<&mut Slot, PoolError> {
        match self.slots.get_mut(id.index()) {
            Some(slot) if slot.generation == id.generation && slot.item.is_some() => Ok(slot),
            _ => Err(PoolError::Stale(id)),
        }
    }

    #[cfg(test)]
    fn refcount(&self, id: ItemId) -> Option<u32> {
        self.get(id).map(|_| self.slots[id.index()].refcount)
    }
}
