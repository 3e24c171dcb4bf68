//! Merging fetched pages into an ordered item list.
//!
//! Pages arrive newest first. Each merge keeps the list free of duplicate
//! entries and of adjacent gaps, and never fails: an inconsistency it cannot
//! place (a Middle target that vanished) degrades to appending the entries
//! that are not already held.

pub mod bulk;
pub mod filter;

use std::collections::HashSet;

use crate::timeline::item::{FeedEntry, GapId, Item};
use crate::timeline::list::OrderedItemList;

/// What a merge did to the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries inserted.
    pub added: usize,
    /// Held items dropped because the page superseded them.
    pub superseded: usize,
    /// Gap inserted because the page was full.
    pub gap: Option<GapId>,
    /// The page brought nothing new.
    pub redundant: bool,
    /// The target could not be located and entries were appended instead.
    pub fallback: bool,
}

fn held_ids<T: FeedEntry, V>(list: &OrderedItemList<T, V>) -> HashSet<String> {
    list.items()
        .iter()
        .filter_map(Item::real_id)
        .map(str::to_string)
        .collect()
}

/// Two entries are the same feed entry: equal ids, or one boosts the other.
fn same_entry<T: FeedEntry>(a: &T, b: &T) -> bool {
    a.matches_id(b.id()) || b.matches_id(a.id())
}

fn drop_all<T: FeedEntry, V>(list: &mut OrderedItemList<T, V>) -> usize {
    let len = list.len();
    list.remove_range(0..len).len()
}

/// Merge a page of entries newer than the held ones.
///
/// The page's oldest entry, when already held, marks everything above it as
/// superseded. Only the page prefix above the held newest entry is new; when
/// the held newest entry is absent from a full page a gap separates the two
/// runs.
pub fn merge_top<T: FeedEntry, V>(
    list: &mut OrderedItemList<T, V>,
    page: Vec<T>,
    full_fetch: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    if page.is_empty() {
        outcome.redundant = true;
        return outcome;
    }
    if list.real_len() == 0 {
        outcome.superseded = drop_all(list);
        outcome.added = page.len();
        list.push_back(page.into_iter().map(Item::Real));
        return outcome;
    }

    if let Some(oldest_new) = page.last()
        && let Some(index) = list
            .items()
            .iter()
            .position(|item| item.as_real().is_some_and(|held| same_entry(held, oldest_new)))
        && index > 0
    {
        outcome.superseded = list.remove_range(0..index).len();
    }

    let overlap = list
        .get(0)
        .and_then(Item::as_real)
        .and_then(|newest_held| page.iter().position(|entry| same_entry(entry, newest_held)));

    let mut run: Vec<Item<T>> = match overlap {
        Some(cut) => page.into_iter().take(cut).map(Item::Real).collect(),
        None => page.into_iter().map(Item::Real).collect(),
    };
    outcome.added = run.len();
    if overlap.is_none() && full_fetch {
        let gap = list.new_gap();
        outcome.gap = gap.gap_id();
        run.push(gap);
    }
    outcome.redundant = outcome.added == 0;
    list.push_front(run);
    list.collapse_gaps();
    outcome
}

/// Whether a Bottom page brings nothing older than what the list holds:
/// it is empty, repeats the held oldest entry, or holds only held entries.
#[must_use]
pub fn bottom_page_is_stale<T: FeedEntry, V>(list: &OrderedItemList<T, V>, page: &[T]) -> bool {
    if page.is_empty() {
        return true;
    }
    let Some((_, last)) = list.last_real() else {
        return false;
    };
    if page.iter().any(|entry| entry.id() == last.id()) {
        return true;
    }
    let held = held_ids(list);
    page.iter().all(|entry| held.contains(entry.id()))
}

/// Merge a page of entries older than the held ones.
///
/// A page that repeats the held oldest entry, or holds nothing new, is
/// dropped and the list is left exactly as it was. Otherwise the trailing
/// gap is resolved by this page: it is removed, the new entries appended and
/// a fresh gap added when the page was full.
pub fn merge_bottom<T: FeedEntry, V>(
    list: &mut OrderedItemList<T, V>,
    page: Vec<T>,
    full_fetch: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    if bottom_page_is_stale(list, &page) {
        outcome.redundant = true;
        return outcome;
    }
    if list.real_len() == 0 {
        outcome.superseded = drop_all(list);
        outcome.added = page.len();
        list.push_back(page.into_iter().map(Item::Real));
        if full_fetch {
            let gap = list.new_gap();
            outcome.gap = gap.gap_id();
            list.push_back([gap]);
        }
        return outcome;
    }

    let Some((last_index, _)) = list.last_real() else {
        return outcome;
    };
    let held = held_ids(list);
    let fresh: Vec<T> = page
        .into_iter()
        .filter(|entry| !held.contains(entry.id()))
        .collect();

    let len = list.len();
    list.remove_range(last_index + 1..len);
    outcome.added = fresh.len();
    list.push_back(fresh.into_iter().map(Item::Real));
    if full_fetch {
        let gap = list.new_gap();
        outcome.gap = gap.gap_id();
        list.push_back([gap]);
    }
    list.collapse_gaps();
    outcome
}

/// Replace `gap` with a page fetched for it.
///
/// The gap is located by identity, not by the index seen at dispatch. A page
/// that reaches the entry below the gap closes the hole at the overlap;
/// otherwise a full page leaves a fresh gap below itself. When the gap is no
/// longer held, the entries not already present are appended instead.
pub fn merge_middle<T: FeedEntry, V>(
    list: &mut OrderedItemList<T, V>,
    gap: GapId,
    page: Vec<T>,
    full_fetch: bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let held = held_ids(list);

    let Some(index) = list.position_of_gap(gap) else {
        let fresh: Vec<Item<T>> = page
            .into_iter()
            .filter(|entry| !held.contains(entry.id()))
            .map(Item::Real)
            .collect();
        outcome.fallback = true;
        outcome.added = fresh.len();
        outcome.redundant = fresh.is_empty();
        list.push_back(fresh);
        list.collapse_gaps();
        return outcome;
    };

    list.remove_at(index);
    let below = list.get(index).and_then(Item::real_id).map(str::to_string);
    let reach = below
        .as_deref()
        .and_then(|below| page.iter().position(|entry| entry.id() == below));
    let closed = reach.is_some();

    let mut run: Vec<Item<T>> = page
        .into_iter()
        .take(reach.unwrap_or(usize::MAX))
        .filter(|entry| !held.contains(entry.id()))
        .map(Item::Real)
        .collect();
    outcome.added = run.len();
    outcome.redundant = run.is_empty();
    if full_fetch && !closed {
        let fresh_gap = list.new_gap();
        outcome.gap = fresh_gap.gap_id();
        run.push(fresh_gap);
    }
    list.insert_at(index, run);
    list.collapse_gaps();
    outcome
}

/// Whether the list holds two gaps in a row.
#[must_use]
pub fn has_adjacent_gaps<T, V>(list: &OrderedItemList<T, V>) -> bool
where
    T: FeedEntry,
{
    list.items()
        .windows(2)
        .any(|pair| pair[0].is_gap() && pair[1].is_gap())
}
