use std::collections::HashSet;

use crate::types::Item;

/// Linear membership test over a collection.
pub fn exists(collection: &[Item], id: &str) -> bool {
    collection.iter().any(|item| item.id == id)
}

/// Hash index of the ids in a collection. The collection keeps its own order;
/// this only answers membership.
#[derive(Debug, Default, Clone)]
pub struct IdIndex {
    ids: HashSet<String>,
}

impl IdIndex {
    pub fn from_items(items: &[Item]) -> Self {
        Self { ids: items.iter().map(|i| i.id.clone()).collect() }
    }

    pub fn contains(&self, id: &str) -> bool { self.ids.contains(id) }

    /// Record `id`; false if it was already known.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) { return false; }
        self.ids.insert(id.to_string())
    }
}
