//! String interning and hash consing for events.
//!
//! This module provides compact symbol representation through:
//! 1. String interning: map labels, tags and words to integer IDs
//! 2. Hash consing: share structurally identical events between count tables
//!
//! Tables are ordinary values built once at load time and handed around by
//! reference. Once loading completes they are only read, so they can be
//! shared across decoder threads.

use crate::event::Event;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Interned symbol ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Symbol table for string interning.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    str_to_id: FxHashMap<Box<str>, SymbolId>,
    id_to_str: Vec<Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its unique ID
    pub fn intern(&mut self, s: &str) -> SymbolId {
        if let Some(&id) = self.str_to_id.get(s) {
            return id;
        }

        let id = SymbolId(self.id_to_str.len() as u32);
        let boxed: Box<str> = s.into();
        self.str_to_id.insert(boxed.clone(), id);
        self.id_to_str.push(boxed);
        id
    }

    /// Look up a string without interning it.
    pub fn get(&self, s: &str) -> Option<SymbolId> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.id_to_str[id.0 as usize]
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Every symbol in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &str)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), &**s))
    }
}

/// Hash cons table for events.
///
/// Structurally equal events are canonicalized to one shared allocation, so
/// a history that conditions thousands of futures is stored once.
#[derive(Debug, Default)]
pub struct EventInterner {
    table: FxHashSet<Arc<Event>>,
}

impl EventInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical shared instance of `event`.
    pub fn intern(&mut self, event: Event) -> Arc<Event> {
        if let Some(existing) = self.table.get(&event) {
            return existing.clone();
        }

        let shared = Arc::new(event);
        self.table.insert(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
