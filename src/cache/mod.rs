//! Home-feed disk cache.
//!
//! Pages fetched from the network are written through so the next session can
//! paint immediately. The cache also records placeholders for ranges it knows
//! it has not seen; range reads hand them back so the hole stays visible.

#![allow(missing_docs)]

#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::Serialize;

use crate::core::errors::Result;
use crate::timeline::cursor::Cursor;

/// Range read: entries strictly between the bounds, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheQuery {
    pub older_than: Option<Cursor>,
    pub newer_than: Option<Cursor>,
    /// When set, used as the exclusive lower bound instead of `newer_than`
    /// so the entry at `newer_than` itself is included as overlap.
    pub newer_than_minus_one: Option<Cursor>,
    pub limit: usize,
}

impl CacheQuery {
    #[must_use]
    pub const fn newest(limit: usize) -> Self {
        Self {
            older_than: None,
            newer_than: None,
            newer_than_minus_one: None,
            limit,
        }
    }
}

/// One row of a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedItem<T> {
    Entry(T),
    /// A stored placeholder: entries around `id` were never fetched.
    Placeholder { id: String },
}

impl<T> CachedItem<T> {
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }

    #[must_use]
    pub fn into_entry(self) -> Option<T> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Placeholder { .. } => None,
        }
    }
}

/// What `store_page` wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    /// Entry rows inserted or replaced.
    pub written: usize,
    /// Page entries at or below `newer_than` that were already stored.
    pub overlap: usize,
    /// A placeholder was stored for an unseen range.
    pub placeholder_stored: bool,
    /// Placeholders dropped because the page covered their range.
    pub placeholders_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub placeholders: u64,
    pub newest_id: Option<String>,
    pub oldest_id: Option<String>,
}

/// Persistent store for one account's feed.
pub trait TimelineCache<T>: Send {
    /// Store a page as returned by the network (newest first) for the given
    /// request bounds.
    fn store_page(
        &mut self,
        items: &[T],
        older_than: Option<&Cursor>,
        newer_than: Option<&Cursor>,
    ) -> Result<StoreOutcome>;

    /// Rows in the range, newest first, placeholders included. `limit`
    /// counts both.
    fn read_cached(&self, query: &CacheQuery) -> Result<Vec<CachedItem<T>>>;

    /// Drop entries created more than `retention_days` ago; returns rows removed.
    fn cleanup(&mut self, retention_days: u32) -> Result<usize>;

    fn stats(&self) -> Result<CacheStats>;
}
