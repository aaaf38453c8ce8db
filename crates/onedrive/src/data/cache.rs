use std::collections::HashMap;

use super::item::DriveItem;

/// What a cached lookup was.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The full child listing of the owning directory.
    Children,
    /// A path lookup relative to the owning directory, without leading `/`.
    Resolve(String),
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Children(Vec<DriveItem>),
    Item(DriveItem),
}

/// Memoized lookups for a single directory.
///
/// Entries never expire on their own; they live until [`PathCache::clear`].
#[derive(Debug, Clone, Default)]
pub struct PathCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl PathCache {
    pub fn children(&self) -> Option<Vec<DriveItem>> {
        match self.entries.get(&CacheKey::Children) {
            Some(CacheEntry::Children(items)) => Some(items.clone()),
            _ => None,
        }
    }

    pub fn store_children(&mut self, items: Vec<DriveItem>) {
        self.entries.insert(CacheKey::Children, CacheEntry::Children(items));
    }

    pub fn resolved(&self, path: &str) -> Option<DriveItem> {
        match self.entries.get(&CacheKey::Resolve(path.to_string())) {
            Some(CacheEntry::Item(item)) => Some(item.clone()),
            _ => None,
        }
    }

    pub fn store_resolved(&mut self, path: &str, item: DriveItem) {
        self.entries
            .insert(CacheKey::Resolve(path.to_string()), CacheEntry::Item(item));
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
