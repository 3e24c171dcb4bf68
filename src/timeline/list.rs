//! Ordered feed items paired 1:1 with their derived view data.
//!
//! Items are held newest first. Every mutation keeps `views[i]` equal to
//! `mapper(&items[i])`; only the entries touched by a mutation are re-derived.
//! The list does not police adjacent gaps on `insert_at`; callers that
//! splice gaps run [`OrderedItemList::collapse_gaps`] afterwards.

use std::fmt;
use std::ops::Range;

use crate::timeline::item::{FeedEntry, Gap, GapId, Item, ItemKey};

type Mapper<T, V> = Box<dyn Fn(&Item<T>) -> V + Send>;

pub struct OrderedItemList<T, V> {
    items: Vec<Item<T>>,
    views: Vec<V>,
    mapper: Mapper<T, V>,
    next_gap: i64,
}

impl<T: fmt::Debug, V> fmt::Debug for OrderedItemList<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedItemList")
            .field("items", &self.items)
            .field("next_gap", &self.next_gap)
            .finish_non_exhaustive()
    }
}

impl<T: FeedEntry, V> OrderedItemList<T, V> {
    pub fn new(mapper: impl Fn(&Item<T>) -> V + Send + 'static) -> Self {
        Self {
            items: Vec::new(),
            views: Vec::new(),
            mapper: Box::new(mapper),
            next_gap: -1,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn items(&self) -> &[Item<T>] {
        &self.items
    }

    #[must_use]
    pub fn views(&self) -> &[V] {
        &self.views
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Item<T>> {
        self.items.get(index)
    }

    #[must_use]
    pub fn view(&self, index: usize) -> Option<&V> {
        self.views.get(index)
    }

    /// Number of fetched entries, gaps excluded.
    #[must_use]
    pub fn real_len(&self) -> usize {
        self.items.iter().filter(|item| !item.is_gap()).count()
    }

    /// Allocate a fresh gap id. Ids decrease and are unique until `clear`.
    pub fn next_gap_id(&mut self) -> GapId {
        let id = GapId::from_raw(self.next_gap);
        self.next_gap -= 1;
        id
    }

    /// A new idle gap item with a fresh id.
    pub fn new_gap(&mut self) -> Item<T> {
        Item::Gap(Gap {
            id: self.next_gap_id(),
            loading: false,
        })
    }

    /// Insert a run at `index`, deriving views for the inserted items only.
    ///
    /// `index` is clamped to the list length.
    pub fn insert_at(&mut self, index: usize, run: impl IntoIterator<Item = Item<T>>) {
        let index = index.min(self.items.len());
        let run: Vec<Item<T>> = run.into_iter().collect();
        let views: Vec<V> = run.iter().map(|item| (self.mapper)(item)).collect();
        self.items.splice(index..index, run);
        self.views.splice(index..index, views);
    }

    pub fn push_back(&mut self, run: impl IntoIterator<Item = Item<T>>) {
        let end = self.items.len();
        self.insert_at(end, run);
    }

    pub fn push_front(&mut self, run: impl IntoIterator<Item = Item<T>>) {
        self.insert_at(0, run);
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Item<T>> {
        if index >= self.items.len() {
            return None;
        }
        self.views.remove(index);
        Some(self.items.remove(index))
    }

    /// Remove a range; out-of-bounds ends are clamped.
    pub fn remove_range(&mut self, range: Range<usize>) -> Vec<Item<T>> {
        let end = range.end.min(self.items.len());
        let start = range.start.min(end);
        self.views.drain(start..end);
        self.items.drain(start..end).collect()
    }

    /// Replace the payload at `index` and re-derive its view only.
    ///
    /// Position and list length never change. Returns false when `index`
    /// does not hold a fetched entry.
    pub fn replace_item_at(&mut self, index: usize, entry: T) -> bool {
        match self.items.get_mut(index) {
            Some(slot @ Item::Real(_)) => {
                *slot = Item::Real(entry);
                self.views[index] = (self.mapper)(slot);
                true
            }
            _ => false,
        }
    }

    /// Patch every entry matching `pred` in place; returns how many changed.
    pub fn update_where(
        &mut self,
        mut pred: impl FnMut(&T) -> bool,
        mut patch: impl FnMut(&mut T),
    ) -> usize {
        let mut touched = 0;
        for (index, item) in self.items.iter_mut().enumerate() {
            if let Item::Real(entry) = &mut *item
                && pred(entry)
            {
                patch(entry);
                self.views[index] = (self.mapper)(item);
                touched += 1;
            }
        }
        touched
    }

    /// Flip the loading state of a gap; returns false if the gap is gone.
    pub fn set_gap_loading(&mut self, gap: GapId, loading: bool) -> bool {
        let Some(index) = self.position_of_gap(gap) else {
            return false;
        };
        if let Item::Gap(slot) = &mut self.items[index] {
            slot.loading = loading;
        }
        self.views[index] = (self.mapper)(&self.items[index]);
        true
    }

    /// Position of an item with the same identity as `key`.
    #[must_use]
    pub fn index_of(&self, key: &ItemKey) -> Option<usize> {
        self.items.iter().position(|item| match (item, key) {
            (Item::Real(entry), ItemKey::Real(id)) => entry.id() == id,
            (Item::Gap(gap), ItemKey::Gap(id)) => gap.id == *id,
            _ => false,
        })
    }

    #[must_use]
    pub fn position_of_gap(&self, gap: GapId) -> Option<usize> {
        self.index_of(&ItemKey::Gap(gap))
    }

    #[must_use]
    pub fn first_real(&self) -> Option<(usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .find_map(|(i, item)| item.as_real().map(|entry| (i, entry)))
    }

    #[must_use]
    pub fn last_real(&self) -> Option<(usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, item)| item.as_real().map(|entry| (i, entry)))
    }

    /// Keep only fetched entries satisfying `keep`; gaps always stay.
    ///
    /// Returns how many entries were removed.
    pub fn retain_entries(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.items.len();
        let mut index = 0;
        while index < self.items.len() {
            let drop = self.items[index].as_real().is_some_and(|entry| !keep(entry));
            if drop {
                self.items.remove(index);
                self.views.remove(index);
            } else {
                index += 1;
            }
        }
        before - self.items.len()
    }

    /// Drop the later gap of every adjacent pair. Returns how many were dropped.
    pub fn collapse_gaps(&mut self) -> usize {
        let mut dropped = 0;
        let mut index = 1;
        while index < self.items.len() {
            if self.items[index].is_gap() && self.items[index - 1].is_gap() {
                // Keep the loading one so an in-flight fetch still finds its gap.
                if self.items[index].as_gap().is_some_and(|g| g.loading)
                    && !self.items[index - 1].as_gap().is_some_and(|g| g.loading)
                {
                    self.items.swap(index - 1, index);
                    self.views.swap(index - 1, index);
                }
                self.items.remove(index);
                self.views.remove(index);
                dropped += 1;
            } else {
                index += 1;
            }
        }
        dropped
    }

    /// Re-derive every view entry, e.g. after a rendering setting changed.
    pub fn rebuild_views(&mut self) {
        self.views = self.items.iter().map(|item| (self.mapper)(item)).collect();
    }

    /// Empty the list and restart gap ids.
    pub fn clear(&mut self) {
        self.items.clear();
        self.views.clear();
        self.next_gap = -1;
    }

    /// Identities in order, handy for logging and assertions.
    #[must_use]
    pub fn keys(&self) -> Vec<ItemKey> {
        self.items.iter().map(Item::key).collect()
    }
}
