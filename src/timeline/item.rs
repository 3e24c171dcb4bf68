//! The list element: a fetched entry or a placeholder for an unfetched range.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Anything a feed can hold: statuses, notifications.
///
/// Ids are server ids: non-negative numeric strings ordered by recency.
pub trait FeedEntry: Clone + Send + 'static {
    /// The server id of this entry.
    fn id(&self) -> &str;

    /// Whether `id` is this same feed entry, as merges compare them.
    ///
    /// Boosts also answer to the id of the boosted status.
    fn matches_id(&self, id: &str) -> bool {
        self.id() == id
    }

    /// Grouping key shared by every entry of one conversation.
    fn conversation_key(&self) -> Option<&str> {
        None
    }

    /// Accounts whose removal (block, mute) drops this entry.
    fn account_ids(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Host names whose block drops this entry.
    fn account_domains(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Creation time in unix milliseconds; used for cache retention.
    fn created_at_ms(&self) -> i64 {
        0
    }
}

/// Synthetic id of a placeholder.
///
/// Always negative so it can never collide with a server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GapId(i64);

impl GapId {
    /// Wrap a raw value. Callers outside the list only round-trip ids they were given.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for GapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gap{}", self.0)
    }
}

/// A placeholder standing in for entries that have not been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub id: GapId,
    /// A Middle or Bottom fetch targeting this gap is in flight.
    pub loading: bool,
}

/// One slot of an ordered feed.
#[derive(Debug, Clone)]
pub enum Item<T> {
    Real(T),
    Gap(Gap),
}

/// Identity of an item, ignoring payload contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Real(String),
    Gap(GapId),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => f.write_str(id),
            Self::Gap(gap) => gap.fmt(f),
        }
    }
}

impl<T> Item<T> {
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap(_))
    }

    #[must_use]
    pub const fn as_real(&self) -> Option<&T> {
        match self {
            Self::Real(entry) => Some(entry),
            Self::Gap(_) => None,
        }
    }

    pub fn as_real_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Real(entry) => Some(entry),
            Self::Gap(_) => None,
        }
    }

    #[must_use]
    pub fn into_real(self) -> Option<T> {
        match self {
            Self::Real(entry) => Some(entry),
            Self::Gap(_) => None,
        }
    }

    #[must_use]
    pub const fn as_gap(&self) -> Option<Gap> {
        match self {
            Self::Real(_) => None,
            Self::Gap(gap) => Some(*gap),
        }
    }

    #[must_use]
    pub const fn gap_id(&self) -> Option<GapId> {
        match self {
            Self::Real(_) => None,
            Self::Gap(gap) => Some(gap.id),
        }
    }
}

impl<T: FeedEntry> Item<T> {
    #[must_use]
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Real(entry) => ItemKey::Real(entry.id().to_string()),
            Self::Gap(gap) => ItemKey::Gap(gap.id),
        }
    }

    /// Identity equality: server id for entries, synthetic id for gaps.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Real(a), Self::Real(b)) => a.id() == b.id(),
            (Self::Gap(a), Self::Gap(b)) => a.id == b.id,
            _ => false,
        }
    }

    /// The server id when this is a fetched entry.
    #[must_use]
    pub fn real_id(&self) -> Option<&str> {
        self.as_real().map(FeedEntry::id)
    }
}
