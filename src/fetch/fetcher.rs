//! Pagination fetcher: a small worker pool in front of a page source.
//!
//! The owner thread dispatches tickets; worker threads run the blocking page
//! source calls and hand results back through a channel. Completions are only
//! ever applied by the owner, in [`PaginationFetcher::try_settle`] or
//! [`PaginationFetcher::settle_timeout`], so the item list needs no lock.
//!
//! Every dispatched request id is registered as live. Cancelling removes ids
//! from the registry; a completion whose id is no longer live is stale and is
//! reported as `TlsError::StaleCompletion` instead of being handed over.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use parking_lot::Mutex;

use crate::core::errors::{Result, TlsError};
use crate::fetch::plan::FetchEnd;
use crate::fetch::source::{Page, PageRequest, PageSource};
use crate::timeline::item::GapId;

// ──────────────────── request identity ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// A dispatched request as the owner sees it.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    pub id: RequestId,
    pub end: FetchEnd,
    /// Target gap of a Middle fetch, or the tail gap a Bottom fetch resolves.
    pub gap: Option<GapId>,
    pub request: PageRequest,
    pub dispatched_at: Instant,
}

/// A completion accepted by the owner.
#[derive(Debug)]
pub enum Settled<T> {
    Loaded {
        ticket: FetchTicket,
        page: Page<T>,
        /// The page was as long as requested; more may exist beyond it.
        full_fetch: bool,
    },
    Failed {
        ticket: FetchTicket,
        error: TlsError,
    },
}

impl<T> Settled<T> {
    #[must_use]
    pub const fn ticket(&self) -> &FetchTicket {
        match self {
            Self::Loaded { ticket, .. } | Self::Failed { ticket, .. } => ticket,
        }
    }
}

struct Completion<T> {
    ticket: FetchTicket,
    result: Result<Page<T>>,
}

// ──────────────────── options ────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FetcherOptions {
    pub worker_threads: usize,
    pub queue_capacity: usize,
    /// Suppress a second Middle fetch for a gap that already has one in flight.
    pub dedupe_gap_fetches: bool,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            queue_capacity: 64,
            dedupe_gap_fetches: true,
        }
    }
}

// ──────────────────── fetcher ────────────────────

pub struct PaginationFetcher<T> {
    work_tx: Option<Sender<FetchTicket>>,
    done_rx: Receiver<Completion<T>>,
    workers: Vec<thread::JoinHandle<()>>,
    live: Arc<Mutex<HashSet<RequestId>>>,
    next_id: u64,
    top_in_flight: Option<RequestId>,
    bottom_in_flight: Option<RequestId>,
    gaps_in_flight: HashMap<GapId, RequestId>,
    dedupe_gap_fetches: bool,
    stale_discarded: u64,
}

impl<T: Send + 'static> PaginationFetcher<T> {
    /// Start the worker pool over `source`.
    pub fn spawn(source: Arc<dyn PageSource<T>>, options: FetcherOptions) -> Result<Self> {
        let (work_tx, work_rx) = bounded::<FetchTicket>(options.queue_capacity.max(1));
        let (done_tx, done_rx) = unbounded::<Completion<T>>();
        let live = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(options.worker_threads.max(1));
        for index in 0..options.worker_threads.max(1) {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let source = Arc::clone(&source);
            let live = Arc::clone(&live);
            let handle = thread::Builder::new()
                .name(format!("tlsync-fetch-{index}"))
                .spawn(move || worker_main(&*source, &work_rx, &done_tx, &live))
                .map_err(|e| TlsError::Runtime {
                    details: format!("failed to spawn fetch worker: {e}"),
                })?;
            workers.push(handle);
        }

        Ok(Self {
            work_tx: Some(work_tx),
            done_rx,
            workers,
            live,
            next_id: 1,
            top_in_flight: None,
            bottom_in_flight: None,
            gaps_in_flight: HashMap::new(),
            dedupe_gap_fetches: options.dedupe_gap_fetches,
            stale_discarded: 0,
        })
    }

    /// Queue a request.
    ///
    /// Returns `Ok(None)` when suppressed: a Top or Bottom fetch is already in
    /// flight for that end, or (with de-duplication on) the target gap already
    /// has a Middle fetch in flight.
    pub fn dispatch(
        &mut self,
        end: FetchEnd,
        gap: Option<GapId>,
        request: PageRequest,
    ) -> Result<Option<FetchTicket>> {
        let suppressed = match end {
            FetchEnd::Top => self.top_in_flight.is_some(),
            FetchEnd::Bottom => self.bottom_in_flight.is_some(),
            FetchEnd::Middle => {
                self.dedupe_gap_fetches && gap.is_some_and(|g| self.gaps_in_flight.contains_key(&g))
            }
        };
        if suppressed {
            return Ok(None);
        }
        let Some(work_tx) = &self.work_tx else {
            return Err(TlsError::ChannelClosed {
                component: "fetcher",
            });
        };

        let id = RequestId(self.next_id);
        self.next_id += 1;
        let ticket = FetchTicket {
            id,
            end,
            gap,
            request,
            dispatched_at: Instant::now(),
        };

        self.live.lock().insert(id);
        match work_tx.try_send(ticket.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.live.lock().remove(&id);
                return Err(TlsError::Runtime {
                    details: format!("fetch queue full, {end} request dropped"),
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                self.live.lock().remove(&id);
                return Err(TlsError::ChannelClosed {
                    component: "fetcher",
                });
            }
        }

        match end {
            FetchEnd::Top => self.top_in_flight = Some(id),
            FetchEnd::Bottom => self.bottom_in_flight = Some(id),
            FetchEnd::Middle => {
                if let Some(gap) = gap {
                    self.gaps_in_flight.insert(gap, id);
                }
            }
        }
        Ok(Some(ticket))
    }

    #[must_use]
    pub fn is_loading(&self, end: FetchEnd) -> bool {
        match end {
            FetchEnd::Top => self.top_in_flight.is_some(),
            FetchEnd::Bottom => self.bottom_in_flight.is_some(),
            FetchEnd::Middle => !self.gaps_in_flight.is_empty(),
        }
    }

    #[must_use]
    pub fn gap_in_flight(&self, gap: GapId) -> bool {
        self.gaps_in_flight.contains_key(&gap)
    }

    /// Requests dispatched and neither settled nor cancelled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.live.lock().len()
    }

    #[must_use]
    pub const fn stale_discarded(&self) -> u64 {
        self.stale_discarded
    }

    /// Take one completion if any is waiting.
    pub fn try_settle(&mut self) -> Option<Result<Settled<T>>> {
        let completion = self.done_rx.try_recv().ok()?;
        Some(self.accept(completion))
    }

    /// Wait up to `timeout` for one completion.
    pub fn settle_timeout(&mut self, timeout: Duration) -> Option<Result<Settled<T>>> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(completion) => Some(self.accept(completion)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Forget every in-flight request; their completions will be stale.
    pub fn cancel_all(&mut self) {
        self.live.lock().clear();
        self.top_in_flight = None;
        self.bottom_in_flight = None;
        self.gaps_in_flight.clear();
    }

    /// Cancel everything, close the queue and join the workers.
    pub fn shutdown(&mut self) {
        self.cancel_all();
        self.work_tx = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                eprintln!("[TLS-FETCH] fetch worker panicked during shutdown");
            }
        }
    }

    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.work_tx.is_none()
    }

    /// Owner-side acceptance: clears the per-end flag exactly once.
    fn accept(&mut self, completion: Completion<T>) -> Result<Settled<T>> {
        let Completion { ticket, result } = completion;
        if !self.live.lock().remove(&ticket.id) {
            self.stale_discarded += 1;
            return Err(TlsError::StaleCompletion {
                request: ticket.id.raw(),
            });
        }

        match ticket.end {
            FetchEnd::Top => self.top_in_flight = None,
            FetchEnd::Bottom => self.bottom_in_flight = None,
            FetchEnd::Middle => {
                if let Some(gap) = ticket.gap
                    && self.gaps_in_flight.get(&gap) == Some(&ticket.id)
                {
                    self.gaps_in_flight.remove(&gap);
                }
            }
        }

        Ok(match result {
            Ok(page) => {
                let full_fetch = page.items.len() >= ticket.request.limit;
                Settled::Loaded {
                    ticket,
                    page,
                    full_fetch,
                }
            }
            Err(error) => Settled::Failed { ticket, error },
        })
    }
}

impl<T> Drop for PaginationFetcher<T> {
    fn drop(&mut self) {
        // Workers exit once the queue disconnects.
        self.live.lock().clear();
        self.work_tx = None;
    }
}

fn worker_main<T>(
    source: &dyn PageSource<T>,
    work_rx: &Receiver<FetchTicket>,
    done_tx: &Sender<Completion<T>>,
    live: &Mutex<HashSet<RequestId>>,
) {
    while let Ok(ticket) = work_rx.recv() {
        // Cancelled while queued.
        if !live.lock().contains(&ticket.id) {
            continue;
        }
        let result = source.fetch_page(&ticket.request);
        if done_tx.send(Completion { ticket, result }).is_err() {
            break;
        }
    }
}
