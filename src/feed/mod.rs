//! Per-screen feed controller.
//!
//! Owns one ordered list, one fetcher and (for the home feed) the disk
//! cache. All list mutation happens on the thread that calls into the
//! controller: fetch completions are drained by [`FeedController::pump`] or
//! [`FeedController::wait_settled`] and applied there.

pub mod events;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::{CacheQuery, CachedItem, TimelineCache};
use crate::core::config::Config;
use crate::core::errors::{FailureKind, Result, TlsError};
use crate::fetch::fetcher::{FetchTicket, FetcherOptions, PaginationFetcher, Settled};
use crate::fetch::plan::{FetchEnd, plan_bottom, plan_middle, plan_top};
use crate::fetch::source::{PageRequest, PageSource};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::reconcile::filter::FeedFilter;
use crate::reconcile::{
    MergeOutcome, bottom_page_is_stale, merge_bottom, merge_middle, merge_top,
};
use crate::timeline::cursor::{Cursor, PaginationStyle, compare_ids, increment_id};
use crate::timeline::entity::StatusCarrier;
use crate::timeline::item::{FeedEntry, Gap, GapId, Item};
use crate::timeline::list::OrderedItemList;

pub use events::{LocalEvent, apply_local_event};

/// What the screen shows besides the list itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum ScreenState {
    /// First page not in yet.
    #[default]
    Loading,
    Content,
    /// Loaded, and the feed holds nothing.
    Empty,
    /// Nothing to show and the last Top/Bottom fetch failed.
    Error(FailureKind),
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Label used in activity records (`home`, `notifications`, ...).
    pub name: String,
    pub page_size: usize,
    pub style: PaginationStyle,
    /// `None` for feeds that are never filtered (notifications).
    pub filter: Option<FeedFilter>,
    pub fetcher: FetcherOptions,
}

impl FeedOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, style: PaginationStyle) -> Self {
        Self {
            name: name.into(),
            page_size: 30,
            style,
            filter: None,
            fetcher: FetcherOptions::default(),
        }
    }

    /// Paging and filter settings from the loaded configuration.
    #[must_use]
    pub fn from_config(name: impl Into<String>, style: PaginationStyle, config: &Config) -> Self {
        Self {
            name: name.into(),
            page_size: config.paging.page_size,
            style,
            filter: Some(FeedFilter::from(&config.filters)),
            fetcher: FetcherOptions {
                worker_threads: config.paging.worker_threads,
                queue_capacity: config.paging.queue_capacity,
                dedupe_gap_fetches: config.paging.dedupe_gap_fetches,
            },
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FeedFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

pub struct FeedController<T, V> {
    name: String,
    list: OrderedItemList<T, V>,
    fetcher: PaginationFetcher<T>,
    cache: Option<Box<dyn TimelineCache<T>>>,
    logger: Option<ActivityLoggerHandle>,
    style: PaginationStyle,
    page_size: usize,
    filter: Option<FeedFilter>,
    /// Bottom cursor: the `next` link, or for item-id feeds the oldest id
    /// seen, which may belong to an entry the filter dropped.
    next_cursor: Option<Cursor>,
    bottom_exhausted: bool,
    screen: ScreenState,
    /// Loading marker appended by `load_more` when no trailing gap existed.
    tail_marker: Option<GapId>,
    newest_seen: Option<String>,
}

impl<T: StatusCarrier, V> FeedController<T, V> {
    pub fn new(
        source: Arc<dyn PageSource<T>>,
        mapper: impl Fn(&Item<T>) -> V + Send + 'static,
        options: FeedOptions,
    ) -> Result<Self> {
        let fetcher = PaginationFetcher::spawn(source, options.fetcher)?;
        Ok(Self {
            name: options.name,
            list: OrderedItemList::new(mapper),
            fetcher,
            cache: None,
            logger: None,
            style: options.style,
            page_size: options.page_size.max(1),
            filter: options.filter,
            next_cursor: None,
            bottom_exhausted: false,
            screen: ScreenState::Loading,
            tail_marker: None,
            newest_seen: None,
        })
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Box<dyn TimelineCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    // ──────────────────── accessors ────────────────────

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn list(&self) -> &OrderedItemList<T, V> {
        &self.list
    }

    #[must_use]
    pub const fn screen(&self) -> ScreenState {
        self.screen
    }

    #[must_use]
    pub const fn bottom_exhausted(&self) -> bool {
        self.bottom_exhausted
    }

    #[must_use]
    pub const fn next_cursor(&self) -> Option<&Cursor> {
        self.next_cursor.as_ref()
    }

    /// Newest entry id ever loaded into this feed, for "mark as read".
    #[must_use]
    pub fn newest_seen_id(&self) -> Option<&str> {
        self.newest_seen.as_deref()
    }

    #[must_use]
    pub fn is_loading(&self, end: FetchEnd) -> bool {
        self.fetcher.is_loading(end)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.fetcher.in_flight()
    }

    #[must_use]
    pub const fn stale_discarded(&self) -> u64 {
        self.fetcher.stale_discarded()
    }

    // ──────────────────── user intents ────────────────────

    /// First load of the screen.
    ///
    /// With a cache holding entries, paint those first (known holes become
    /// gaps) and reconcile with a Top fetch anchored at the newest cached
    /// entry; otherwise load the newest page from the network. A feed that
    /// already holds entries just refreshes.
    pub fn start(&mut self) -> Result<Option<FetchTicket>> {
        if self.list.real_len() > 0 {
            return self.refresh();
        }
        let rows = match &self.cache {
            Some(cache) => match cache.read_cached(&CacheQuery::newest(self.page_size)) {
                Ok(rows) => rows,
                Err(e) => {
                    self.report_error(&e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        if !rows.iter().any(|row| !row.is_placeholder()) {
            return self.fetch_initial();
        }

        let full_fetch = rows.len() >= self.page_size;
        self.list.clear();
        let painted = self.paint_cached(rows, full_fetch);
        self.log(ActivityEvent::CacheRead {
            feed: self.name.clone(),
            count: painted,
        });
        self.refresh_screen(None);
        self.dispatch(FetchEnd::Top, None, plan_top(&self.list, self.page_size))
    }

    /// Pull to refresh.
    pub fn refresh(&mut self) -> Result<Option<FetchTicket>> {
        if self.list.real_len() == 0 {
            return self.fetch_initial();
        }
        self.dispatch(FetchEnd::Top, None, plan_top(&self.list, self.page_size))
    }

    /// Scrolled to the end: fetch the next older page.
    pub fn load_more(&mut self) -> Result<Option<FetchTicket>> {
        if self.bottom_exhausted || self.fetcher.is_loading(FetchEnd::Bottom) {
            return Ok(None);
        }
        if self.list.real_len() == 0 && self.next_cursor.is_none() {
            return self.fetch_initial();
        }

        let trailing = self.trailing_gap();
        let marker = match trailing {
            Some(gap) => {
                self.list.set_gap_loading(gap, true);
                gap
            }
            None => {
                let id = self.list.next_gap_id();
                self.list.push_back([Item::Gap(Gap { id, loading: true })]);
                self.tail_marker = Some(id);
                id
            }
        };
        let request = plan_bottom(
            &self.list,
            self.style,
            self.next_cursor.as_ref(),
            self.page_size,
        );
        let ticket = self.dispatch(FetchEnd::Bottom, Some(marker), request);
        if !matches!(ticket, Ok(Some(_))) {
            self.release_tail();
            self.list.set_gap_loading(marker, false);
        }
        ticket
    }

    /// Tap on a gap: fill it with a Middle fetch.
    pub fn load_gap(&mut self, gap: GapId) -> Result<Option<FetchTicket>> {
        let (_, request) = match plan_middle(&self.list, gap, self.page_size) {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("[TLS-FEED] {}: {e}", self.name);
                self.log(ActivityEvent::GapRejected {
                    feed: self.name.clone(),
                    gap: gap.raw(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.list.set_gap_loading(gap, true);
        let ticket = self.dispatch(FetchEnd::Middle, Some(gap), request);
        if ticket.is_err() {
            self.list.set_gap_loading(gap, false);
        }
        ticket
    }

    /// Apply a local user action to held entries.
    pub fn apply_event(&mut self, event: &LocalEvent) -> usize {
        let changed = apply_local_event(&mut self.list, event);
        self.refresh_screen(None);
        changed
    }

    /// Re-derive every view, e.g. after a rendering setting changed.
    pub fn rebuild_views(&mut self) {
        self.list.rebuild_views();
    }

    /// Drop everything and return to the initial state.
    ///
    /// In-flight requests are cancelled; their completions will be discarded.
    pub fn reset(&mut self) {
        self.fetcher.cancel_all();
        self.list.clear();
        self.next_cursor = None;
        self.bottom_exhausted = false;
        self.tail_marker = None;
        self.screen = ScreenState::Loading;
        self.log(ActivityEvent::FeedReset {
            feed: self.name.clone(),
        });
    }

    /// The screen is going away: cancel everything and stop the workers.
    pub fn teardown(&mut self) {
        self.fetcher.shutdown();
    }

    // ──────────────────── completions ────────────────────

    /// Apply every completion already waiting. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(outcome) = self.fetcher.try_settle() {
            self.apply(outcome);
            handled += 1;
        }
        handled
    }

    /// Apply completions until nothing is in flight or `timeout` passes.
    ///
    /// Returns true when the feed settled.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.fetcher.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if let Some(outcome) = self.fetcher.settle_timeout(remaining) {
                self.apply(outcome);
            }
        }
        self.pump();
        true
    }

    fn apply(&mut self, outcome: Result<Settled<T>>) {
        match outcome {
            Ok(Settled::Loaded {
                ticket,
                page,
                full_fetch,
            }) => {
                self.log(ActivityEvent::FetchCompleted {
                    feed: self.name.clone(),
                    end: ticket.end.as_str().to_string(),
                    request_id: ticket.id.raw(),
                    gap: ticket.gap.map(GapId::raw),
                    count: page.items.len(),
                    full_fetch,
                    duration_ms: elapsed_ms(ticket.dispatched_at),
                });
                self.write_through(&ticket.request, &page.items);
                self.apply_page(&ticket, page.items, page.next, full_fetch);
            }
            Ok(Settled::Failed { ticket, error }) => {
                self.log(ActivityEvent::FetchFailed {
                    feed: self.name.clone(),
                    end: ticket.end.as_str().to_string(),
                    request_id: ticket.id.raw(),
                    error_code: error.code().to_string(),
                    error_message: error.to_string(),
                });
                match self.read_fallback(&ticket.request, &error) {
                    Some((cached, full_fetch)) => {
                        self.apply_page(&ticket, cached, None, full_fetch);
                    }
                    None => self.apply_failure(&ticket, &error),
                }
            }
            Err(TlsError::StaleCompletion { request }) => {
                eprintln!("[TLS-FEED] {}: discarded stale completion req#{request}", self.name);
                self.log(ActivityEvent::StaleDiscarded {
                    feed: self.name.clone(),
                    request_id: request,
                });
            }
            Err(other) => self.report_error(&other),
        }
    }

    fn apply_page(
        &mut self,
        ticket: &FetchTicket,
        entries: Vec<T>,
        next: Option<Cursor>,
        full_fetch: bool,
    ) {
        self.note_newest(&entries);
        // Exhaustion and the bottom cursor come from the page as served.
        let stale_bottom =
            ticket.end == FetchEnd::Bottom && bottom_page_is_stale(&self.list, &entries);
        let served_oldest = entries.last().map(|entry| Cursor::new(entry.id()));
        let entries = match &self.filter {
            Some(filter) => filter.apply(entries),
            None => entries,
        };

        match ticket.end {
            FetchEnd::Top => {
                merge_top(&mut self.list, entries, full_fetch);
            }
            FetchEnd::Bottom => {
                self.release_tail();
                merge_bottom(&mut self.list, entries, full_fetch);
                if let Some(gap) = ticket.gap {
                    self.list.set_gap_loading(gap, false);
                }
                let link_feed_ended =
                    self.style == PaginationStyle::LinkHeader && next.is_none();
                match self.style {
                    PaginationStyle::LinkHeader => self.next_cursor = next,
                    PaginationStyle::ItemId if !stale_bottom => {
                        if served_oldest.is_some() {
                            self.next_cursor = served_oldest;
                        }
                    }
                    PaginationStyle::ItemId => {}
                }
                if stale_bottom || link_feed_ended {
                    self.bottom_exhausted = true;
                    // Nothing older exists, so the end needs no placeholder.
                    self.remove_trailing_gap();
                } else if full_fetch {
                    if self.list.real_len() > 0 && self.trailing_gap().is_none() {
                        let gap = self.list.new_gap();
                        self.list.push_back([gap]);
                    }
                } else {
                    self.remove_trailing_gap();
                }
            }
            FetchEnd::Middle => {
                let Some(gap) = ticket.gap else {
                    return;
                };
                let outcome: MergeOutcome = merge_middle(&mut self.list, gap, entries, full_fetch);
                if outcome.fallback {
                    eprintln!(
                        "[TLS-FEED] {}: {gap} vanished before its page arrived, appended {} entries",
                        self.name, outcome.added
                    );
                    self.log(ActivityEvent::GapRejected {
                        feed: self.name.clone(),
                        gap: gap.raw(),
                        reason: "gap no longer held; page appended".to_string(),
                    });
                }
            }
        }
        self.refresh_screen(None);
    }

    fn apply_failure(&mut self, ticket: &FetchTicket, error: &TlsError) {
        match ticket.end {
            FetchEnd::Middle => {
                if let Some(gap) = ticket.gap {
                    self.list.set_gap_loading(gap, false);
                }
                self.refresh_screen(None);
            }
            FetchEnd::Top | FetchEnd::Bottom => {
                if ticket.end == FetchEnd::Bottom {
                    self.release_tail();
                    if let Some(gap) = ticket.gap {
                        self.list.set_gap_loading(gap, false);
                    }
                }
                self.refresh_screen(Some(error.failure_kind()));
            }
        }
    }

    // ──────────────────── helpers ────────────────────

    fn fetch_initial(&mut self) -> Result<Option<FetchTicket>> {
        self.screen = ScreenState::Loading;
        self.dispatch(FetchEnd::Bottom, None, PageRequest::newest(self.page_size))
    }

    fn dispatch(
        &mut self,
        end: FetchEnd,
        gap: Option<GapId>,
        request: PageRequest,
    ) -> Result<Option<FetchTicket>> {
        let ticket = self.fetcher.dispatch(end, gap, request)?;
        if let Some(ticket) = &ticket {
            self.log(ActivityEvent::FetchStarted {
                feed: self.name.clone(),
                end: end.as_str().to_string(),
                request_id: ticket.id.raw(),
                gap: gap.map(GapId::raw),
            });
        }
        Ok(ticket)
    }

    /// The gap after the oldest entry, if any.
    fn trailing_gap(&self) -> Option<GapId> {
        let (last, _) = self.list.last_real()?;
        self.list.get(last + 1).and_then(Item::gap_id)
    }

    fn remove_trailing_gap(&mut self) {
        if let Some(gap) = self.trailing_gap()
            && let Some(index) = self.list.position_of_gap(gap)
        {
            self.list.remove_at(index);
        }
    }

    /// Append cached rows to the (empty) list; returns the entries painted.
    ///
    /// Stored placeholders become gaps. One at either end is dropped: the Top
    /// fetch covers the range above and `load_more` the range below.
    fn paint_cached(&mut self, rows: Vec<CachedItem<T>>, full_fetch: bool) -> usize {
        let mut run: Vec<Item<T>> = Vec::with_capacity(rows.len() + 1);
        for row in rows {
            match row {
                CachedItem::Entry(entry) => {
                    self.note_newest(std::slice::from_ref(&entry));
                    run.push(Item::Real(entry));
                }
                CachedItem::Placeholder { .. } => {
                    if run.last().is_some_and(|item| !item.is_gap()) {
                        run.push(self.list.new_gap());
                    }
                }
            }
        }
        if run.last().is_some_and(Item::is_gap) {
            run.pop();
        }
        let painted = run.len() - run.iter().filter(|item| item.is_gap()).count();
        if full_fetch && painted > 0 {
            run.push(self.list.new_gap());
        }
        self.list.push_back(run);
        painted
    }

    /// Drop the loading marker `load_more` appended.
    fn release_tail(&mut self) {
        if let Some(marker) = self.tail_marker.take()
            && let Some(index) = self.list.position_of_gap(marker)
        {
            self.list.remove_at(index);
        }
    }

    fn refresh_screen(&mut self, failure: Option<FailureKind>) {
        self.screen = if self.list.real_len() > 0 {
            ScreenState::Content
        } else if let Some(kind) = failure {
            ScreenState::Error(kind)
        } else if self.fetcher.is_loading(FetchEnd::Top) || self.fetcher.is_loading(FetchEnd::Bottom)
        {
            ScreenState::Loading
        } else {
            ScreenState::Empty
        };
    }

    fn note_newest(&mut self, entries: &[T]) {
        for entry in entries {
            let newer = self
                .newest_seen
                .as_deref()
                .is_none_or(|seen| compare_ids(entry.id(), seen).is_gt());
            if newer {
                self.newest_seen = Some(entry.id().to_string());
            }
        }
    }

    fn write_through(&mut self, request: &PageRequest, entries: &[T]) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        // Planned lower bounds sit one below the held entry the cache tracks.
        let since = request
            .newer_than
            .as_ref()
            .map(|c| Cursor::new(increment_id(c.as_str())));
        match cache.store_page(entries, request.older_than.as_ref(), since.as_ref()) {
            Ok(stored) => {
                if stored.written > 0 {
                    self.log(ActivityEvent::CacheWrite {
                        feed: self.name.clone(),
                        inserted: stored.written,
                        updated: 0,
                    });
                }
            }
            Err(e) => self.report_error(&e),
        }
    }

    /// Cached entries for a failed request, when the failure was a
    /// connectivity one and the cache has something for that range.
    ///
    /// Entries stop at the first stored placeholder; a placeholder in range
    /// marks the result as full so a gap stays behind it.
    fn read_fallback(&mut self, request: &PageRequest, error: &TlsError) -> Option<(Vec<T>, bool)> {
        if error.failure_kind() != FailureKind::Network {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let query = CacheQuery {
            older_than: request.older_than.clone(),
            newer_than: request.newer_than.clone(),
            newer_than_minus_one: None,
            limit: request.limit,
        };
        match cache.read_cached(&query) {
            Ok(rows) => {
                let holed = rows.iter().any(CachedItem::is_placeholder);
                let entries: Vec<T> = rows.into_iter().map_while(CachedItem::into_entry).collect();
                if entries.is_empty() {
                    return None;
                }
                self.log(ActivityEvent::CacheRead {
                    feed: self.name.clone(),
                    count: entries.len(),
                });
                let full_fetch = holed || entries.len() >= request.limit;
                Some((entries, full_fetch))
            }
            Err(e) => {
                self.report_error(&e);
                None
            }
        }
    }

    fn report_error(&self, error: &TlsError) {
        eprintln!("[TLS-FEED] {}: {error}", self.name);
        self.log(ActivityEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
