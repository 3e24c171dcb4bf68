//! In-memory page source over a fixed newest-first feed.
//!
//! Serves `max_id`/`since_id` windows the way a Mastodon server does and can
//! emit `Link`-style `next` cursors. Used by `tlsync replay` and the tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::errors::{Result, TlsError};
use crate::fetch::source::{Page, PageRequest, PageSource};
use crate::timeline::cursor::{Cursor, PaginationStyle, compare_ids};
use crate::timeline::item::FeedEntry;

/// Scripted failure for the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Network,
    Server(u16),
}

pub struct FixtureSource<T> {
    feed: Mutex<Vec<T>>,
    style: PaginationStyle,
    failures: Mutex<VecDeque<InjectedFailure>>,
    calls: AtomicU64,
    name: String,
}

/// On-disk fixture: a feed plus how it paginates.
#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
pub struct FixtureFile<T> {
    #[serde(default)]
    pub style: PaginationStyle,
    pub items: Vec<T>,
}

impl<T: FeedEntry> FixtureSource<T> {
    /// Build from entries in any order; they are sorted newest first.
    #[must_use]
    pub fn new(mut items: Vec<T>, style: PaginationStyle) -> Self {
        items.sort_by(|a, b| compare_ids(b.id(), a.id()));
        Self {
            feed: Mutex::new(items),
            style,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
            name: "fixture".to_string(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Load a JSON fixture file.
    pub fn from_file(path: &Path) -> Result<Self>
    where
        T: DeserializeOwned,
    {
        let raw = std::fs::read_to_string(path).map_err(|source| TlsError::io(path, source))?;
        let file: FixtureFile<T> = serde_json::from_str(&raw)?;
        Ok(Self::new(file.items, file.style).with_name(path.display().to_string()))
    }

    #[must_use]
    pub const fn style(&self) -> PaginationStyle {
        self.style
    }

    /// New entries appear at the top of the feed, as if just posted.
    pub fn publish(&self, entries: impl IntoIterator<Item = T>) {
        let mut feed = self.feed.lock();
        feed.extend(entries);
        feed.sort_by(|a, b| compare_ids(b.id(), a.id()));
    }

    /// Remove an entry server-side.
    pub fn delete(&self, id: &str) {
        self.feed.lock().retain(|entry| entry.id() != id);
    }

    /// Make the next call fail.
    pub fn fail_next(&self, failure: InjectedFailure) {
        self.failures.lock().push_back(failure);
    }

    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.feed.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: FeedEntry + Sync> PageSource<T> for FixtureSource<T> {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(match failure {
                InjectedFailure::Network => TlsError::network("connection reset by peer"),
                InjectedFailure::Server(code) => {
                    TlsError::server(Some(code), "injected server failure")
                }
            });
        }

        let feed = self.feed.lock();
        let window: Vec<T> = feed
            .iter()
            .filter(|entry| {
                request
                    .older_than
                    .as_ref()
                    .is_none_or(|max| compare_ids(entry.id(), max.as_str()).is_lt())
            })
            .filter(|entry| {
                request
                    .newer_than
                    .as_ref()
                    .is_none_or(|since| compare_ids(entry.id(), since.as_str()).is_gt())
            })
            .take(request.limit)
            .cloned()
            .collect();

        let next = match self.style {
            PaginationStyle::LinkHeader if window.len() >= request.limit => {
                window.last().map(|oldest| Cursor::new(oldest.id()))
            }
            _ => None,
        };
        Ok(Page::new(window, next))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Entry(String);

    impl FeedEntry for Entry {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn feed(ids: std::ops::RangeInclusive<u32>) -> Vec<Entry> {
        ids.map(|i| Entry(i.to_string())).collect()
    }

    fn ids(page: &Page<Entry>) -> Vec<&str> {
        page.items.iter().map(|e| e.0.as_str()).collect()
    }

    #[test]
    fn serves_newest_first_windows() {
        let source = FixtureSource::new(feed(1..=20), PaginationStyle::ItemId);
        let page = source.fetch_page(&PageRequest::newest(3)).expect("page");
        assert_eq!(ids(&page), vec!["20", "19", "18"]);
        assert!(page.next.is_none());

        let older = source
            .fetch_page(&PageRequest {
                older_than: Some(Cursor::new("18")),
                newer_than: Some(Cursor::new("14")),
                limit: 10,
            })
            .expect("page");
        assert_eq!(ids(&older), vec!["17", "16", "15"]);
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn link_header_style_emits_next_cursor_on_full_page() {
        let source = FixtureSource::new(feed(1..=5), PaginationStyle::LinkHeader);
        let full = source.fetch_page(&PageRequest::newest(3)).expect("page");
        assert_eq!(full.next, Some(Cursor::new("3")));
        let rest = source
            .fetch_page(&PageRequest {
                older_than: full.next,
                newer_than: None,
                limit: 3,
            })
            .expect("page");
        assert_eq!(ids(&rest), vec!["2", "1"]);
        assert!(rest.next.is_none());
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let source = FixtureSource::new(feed(1..=2), PaginationStyle::ItemId);
        source.fail_next(InjectedFailure::Network);
        source.fail_next(InjectedFailure::Server(502));
        let first = source.fetch_page(&PageRequest::newest(5)).unwrap_err();
        assert_eq!(first.code(), "TLS-2001");
        let second = source.fetch_page(&PageRequest::newest(5)).unwrap_err();
        assert!(second.to_string().contains("HTTP 502"));
        assert!(source.fetch_page(&PageRequest::newest(5)).is_ok());
    }

    #[test]
    fn publish_and_delete_reshape_feed() {
        let source = FixtureSource::new(feed(1..=3), PaginationStyle::ItemId);
        source.publish(feed(10..=11));
        source.delete("2");
        let page = source.fetch_page(&PageRequest::newest(10)).expect("page");
        assert_eq!(ids(&page), vec!["11", "10", "3", "1"]);
    }
}
