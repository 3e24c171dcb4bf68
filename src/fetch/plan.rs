//! Derive page requests for each fetch end from the current list.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TlsError};
use crate::fetch::source::PageRequest;
use crate::timeline::cursor::{Cursor, PaginationStyle, compare_ids, decrement_id};
use crate::timeline::item::{FeedEntry, GapId, Item};
use crate::timeline::list::OrderedItemList;

/// Where a page lands relative to the held items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchEnd {
    /// Newer than the newest held entry.
    Top,
    /// Older than the oldest held entry.
    Bottom,
    /// Filling one specific gap.
    Middle,
}

impl FetchEnd {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Middle => "middle",
        }
    }
}

impl fmt::Display for FetchEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top request.
///
/// The lower bound is the newest held id minus one, so a page that reaches
/// the held run repeats its newest entry; the merge uses that overlap to
/// tell a closed range from a hole.
#[must_use]
pub fn plan_top<T: FeedEntry, V>(list: &OrderedItemList<T, V>, limit: usize) -> PageRequest {
    PageRequest {
        older_than: None,
        newer_than: list
            .first_real()
            .map(|(_, newest)| Cursor::new(decrement_id(newest.id()))),
        limit,
    }
}

/// Bottom request.
///
/// Item-id feeds page below the older of the oldest held entry and `next`,
/// the oldest id a previous page served (possibly filtered out). Link-header
/// feeds use the stored `next` cursor and only fall back to the oldest id
/// without one.
#[must_use]
pub fn plan_bottom<T: FeedEntry, V>(
    list: &OrderedItemList<T, V>,
    style: PaginationStyle,
    next: Option<&Cursor>,
    limit: usize,
) -> PageRequest {
    let oldest = || list.last_real().map(|(_, entry)| Cursor::new(entry.id()));
    let older_than = match style {
        PaginationStyle::ItemId => match (oldest(), next) {
            (Some(held), Some(seen)) if compare_ids(seen.as_str(), held.as_str()).is_lt() => {
                Some(seen.clone())
            }
            (held, seen) => held.or_else(|| seen.cloned()),
        },
        PaginationStyle::LinkHeader => next.cloned().or_else(oldest),
    };
    PageRequest {
        older_than,
        newer_than: None,
        limit,
    }
}

/// Middle request for `gap`, plus the gap's current index.
///
/// The entry directly above must be fetched content. Below may be fetched
/// content or nothing (a trailing gap); a gap below is rejected. The lower
/// bound is the neighbour's id minus one so a page that reaches it
/// overlaps by one entry, which marks the hole as closed.
pub fn plan_middle<T: FeedEntry, V>(
    list: &OrderedItemList<T, V>,
    gap: GapId,
    limit: usize,
) -> Result<(usize, PageRequest)> {
    let invalid = |details: &str| TlsError::InvalidGapPosition {
        gap: gap.raw(),
        details: details.to_string(),
    };
    let index = list
        .position_of_gap(gap)
        .ok_or_else(|| invalid("gap is not in the list"))?;
    let above = index
        .checked_sub(1)
        .and_then(|i| list.get(i))
        .and_then(Item::as_real)
        .ok_or_else(|| invalid("no fetched entry above"))?;
    let newer_than = match list.get(index + 1) {
        None => None,
        Some(Item::Real(below)) => Some(Cursor::new(decrement_id(below.id()))),
        Some(Item::Gap(_)) => return Err(invalid("neighbour below is a gap")),
    };
    Ok((
        index,
        PageRequest {
            older_than: Some(Cursor::new(above.id())),
            newer_than,
            limit,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::item::Gap;

    #[derive(Debug, Clone)]
    struct Post(String);

    impl FeedEntry for Post {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn list_of(slots: &[&str]) -> OrderedItemList<Post, ()> {
        let mut list = OrderedItemList::new(|_: &Item<Post>| ());
        for slot in slots {
            let item = if *slot == "_" {
                list.new_gap()
            } else {
                Item::Real(Post((*slot).to_string()))
            };
            list.push_back([item]);
        }
        list
    }

    fn cursor(raw: &str) -> Option<Cursor> {
        Some(Cursor::new(raw))
    }

    #[test]
    fn top_overlaps_newest_held_entry() {
        let list = list_of(&["_", "50", "40", "30"]);
        let request = plan_top(&list, 20);
        assert_eq!(request.newer_than, cursor("4z"));
        assert!(request.older_than.is_none());
        assert_eq!(request.limit, 20);
        assert_eq!(plan_top(&list_of(&[]), 20), PageRequest::newest(20));
    }

    #[test]
    fn bottom_follows_pagination_style() {
        let list = list_of(&["50", "40", "_"]);
        let by_id = plan_bottom(&list, PaginationStyle::ItemId, None, 10);
        assert_eq!(by_id.older_than, cursor("40"));

        let token = Cursor::new("37");
        let by_link = plan_bottom(&list, PaginationStyle::LinkHeader, Some(&token), 10);
        assert_eq!(by_link.older_than, cursor("37"));
        let no_token = plan_bottom(&list, PaginationStyle::LinkHeader, None, 10);
        assert_eq!(no_token.older_than, cursor("40"));
    }

    #[test]
    fn item_id_bottom_pages_below_filtered_entries() {
        let list = list_of(&["50", "40", "_"]);
        let skipped = Cursor::new("21");
        let request = plan_bottom(&list, PaginationStyle::ItemId, Some(&skipped), 10);
        assert_eq!(request.older_than, cursor("21"));

        let newer = Cursor::new("45");
        let request = plan_bottom(&list, PaginationStyle::ItemId, Some(&newer), 10);
        assert_eq!(request.older_than, cursor("40"));

        let empty = list_of(&[]);
        let request = plan_bottom(&empty, PaginationStyle::ItemId, Some(&skipped), 10);
        assert_eq!(request.older_than, cursor("21"));
    }

    #[test]
    fn middle_bounds_come_from_neighbours() {
        let mut list = list_of(&["50", "40"]);
        let gap = list.next_gap_id();
        list.insert_at(1, [Item::Gap(Gap { id: gap, loading: false })]);
        let (index, request) = plan_middle(&list, gap, 30).expect("valid gap");
        assert_eq!(index, 1);
        assert_eq!(request.older_than, cursor("50"));
        assert_eq!(request.newer_than, cursor("3z"));
    }

    #[test]
    fn trailing_gap_has_open_lower_bound() {
        let list = list_of(&["50", "40", "_"]);
        let gap = list.get(2).and_then(Item::gap_id).expect("gap");
        let (index, request) = plan_middle(&list, gap, 30).expect("valid gap");
        assert_eq!(index, 2);
        assert_eq!(request.older_than, cursor("40"));
        assert!(request.newer_than.is_none());
    }

    #[test]
    fn invalid_gap_positions_are_rejected() {
        let leading = list_of(&["_", "40"]);
        let gap = leading.get(0).and_then(Item::gap_id).expect("gap");
        let err = plan_middle(&leading, gap, 30).unwrap_err();
        assert_eq!(err.code(), "TLS-2101");

        let missing = plan_middle(&leading, GapId::from_raw(-99), 30).unwrap_err();
        assert!(missing.to_string().contains("not in the list"));
    }
}
