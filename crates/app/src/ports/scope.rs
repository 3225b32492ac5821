//! Watch scopes: the item sets a waiting client observes.

use std::collections::HashSet;

use uhab_domain::item::ItemId;

/// Decides whether a change to an item should wake a waiter.
pub trait WatchScope: Send + Sync {
    fn contains(&self, item: ItemId) -> bool;
}

/// Every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllItems;

impl WatchScope for AllItems {
    fn contains(&self, _item: ItemId) -> bool {
        true
    }
}

/// An explicit set of items, e.g. the widgets of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemSet {
    items: HashSet<ItemId>,
}

impl ItemSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn insert(&mut self, item: ItemId) -> bool {
        self.items.insert(item)
    }
}

impl FromIterator<ItemId> for ItemSet {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl WatchScope for ItemSet {
    fn contains(&self, item: ItemId) -> bool {
        self.items.contains(&item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_contain_only_listed_items() {
        let scope: ItemSet = [ItemId::new(1), ItemId::new(3)].into_iter().collect();
        assert!(scope.contains(ItemId::new(3)));
        assert!(!scope.contains(ItemId::new(2)));
        assert!(AllItems.contains(ItemId::new(2)));
    }
}
