//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use timeline_sync::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FailureKind, Result, TlsError};

// Timeline model
pub use crate::timeline::cursor::{Cursor, PaginationStyle, compare_ids};
pub use crate::timeline::entity::{Account, Notification, Status, StatusCarrier};
pub use crate::timeline::item::{FeedEntry, Gap, GapId, Item, ItemKey};
pub use crate::timeline::list::OrderedItemList;
pub use crate::timeline::view::{
    NotificationViewData, StatusViewData, notification_view, status_view,
};

// Fetching
pub use crate::fetch::fetcher::{FetchTicket, FetcherOptions, PaginationFetcher, Settled};
pub use crate::fetch::fixture::FixtureSource;
pub use crate::fetch::plan::FetchEnd;
pub use crate::fetch::source::{Page, PageRequest, PageSource};

// Reconciliation
pub use crate::reconcile::filter::FeedFilter;
pub use crate::reconcile::{MergeOutcome, merge_bottom, merge_middle, merge_top};

// Feed
pub use crate::feed::{FeedController, FeedOptions, LocalEvent, ScreenState};

// Cache
#[cfg(feature = "sqlite")]
pub use crate::cache::sqlite::SqliteTimelineCache;
pub use crate::cache::{CacheQuery, CachedItem, TimelineCache};
