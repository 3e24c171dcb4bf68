//! Dual-write coordinator: every activity event goes to JSONL and, when
//! available, to the SQLite activity store.
//!
//! A dedicated logger thread owns both writers. Feed controllers send
//! `ActivityEvent`s through a bounded crossbeam channel with `try_send()`, so
//! a slow disk never stalls list reconciliation.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{Result, TlsError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, ActivityStore};

const CHANNEL_CAPACITY: usize = 1024;

/// Events that can be logged through the dual-write coordinator.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    SessionStarted {
        version: String,
        config_hash: String,
    },
    SessionStopped {
        uptime_secs: u64,
    },
    FetchStarted {
        feed: String,
        end: String,
        request_id: u64,
        gap: Option<i64>,
    },
    FetchCompleted {
        feed: String,
        end: String,
        request_id: u64,
        gap: Option<i64>,
        count: usize,
        full_fetch: bool,
        duration_ms: u64,
    },
    FetchFailed {
        feed: String,
        end: String,
        request_id: u64,
        error_code: String,
        error_message: String,
    },
    StaleDiscarded {
        feed: String,
        request_id: u64,
    },
    GapRejected {
        feed: String,
        gap: i64,
        reason: String,
    },
    CacheRead {
        feed: String,
        count: usize,
    },
    CacheWrite {
        feed: String,
        inserted: usize,
        updated: usize,
    },
    CachePruned {
        removed: usize,
    },
    FeedReset {
        feed: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

/// Cheaply-cloneable handle for sending log events. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event; counts it as dropped if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct DualLoggerConfig {
    /// `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        let jsonl_config = JsonlConfig::default();
        Self {
            sqlite_path: jsonl_config
                .path
                .parent()
                .map(|dir| dir.join("activity.sqlite3")),
            jsonl_config,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl DualLoggerConfig {
    /// Logger paths and limits from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sqlite_path: Some(config.paths.activity_db.clone()),
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                max_size_bytes: config.logging.jsonl_max_bytes,
                max_rotated_files: config.logging.jsonl_max_rotated,
                fsync_interval_secs: config.logging.fsync_interval_secs,
                ..JsonlConfig::default()
            },
            channel_capacity: config.logging.channel_capacity,
        }
    }
}

/// Spawn the logger thread and return a handle plus its join handle.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("tlsync-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.sqlite_path, config.jsonl_config, dropped_clone);
        })
        .map_err(|e| TlsError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match ActivityStore::open(&p) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[TLS-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;

    let mut jsonl = JsonlWriter::open(jsonl_config);
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            if db.log_activity(&log_entry_to_activity_row(&entry)).is_ok() {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= 3 {
                    eprintln!("[TLS-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn fetch_entry(event: EventType, severity: Severity, feed: &str, end: &str, id: u64) -> LogEntry {
    let mut e = LogEntry::new(event, severity);
    e.feed = Some(feed.to_string());
    e.end = Some(end.to_string());
    e.request_id = Some(id);
    e
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::SessionStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::SessionStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SessionStopped { uptime_secs } => {
            let mut e = LogEntry::new(EventType::SessionStop, Severity::Info);
            e.details = Some(format!("uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::FetchStarted {
            feed,
            end,
            request_id,
            gap,
        } => {
            let mut e = fetch_entry(EventType::FetchStarted, Severity::Info, feed, end, *request_id);
            e.gap = *gap;
            e
        }
        ActivityEvent::FetchCompleted {
            feed,
            end,
            request_id,
            gap,
            count,
            full_fetch,
            duration_ms,
        } => {
            let mut e =
                fetch_entry(EventType::FetchCompleted, Severity::Info, feed, end, *request_id);
            e.gap = *gap;
            e.count = Some(*count as u64);
            e.full_fetch = Some(*full_fetch);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FetchFailed {
            feed,
            end,
            request_id,
            error_code,
            error_message,
        } => {
            let mut e =
                fetch_entry(EventType::FetchFailed, Severity::Warning, feed, end, *request_id);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::StaleDiscarded { feed, request_id } => {
            let mut e = LogEntry::new(EventType::StaleDiscarded, Severity::Info);
            e.feed = Some(feed.clone());
            e.request_id = Some(*request_id);
            e
        }
        ActivityEvent::GapRejected { feed, gap, reason } => {
            let mut e = LogEntry::new(EventType::GapRejected, Severity::Warning);
            e.feed = Some(feed.clone());
            e.gap = Some(*gap);
            e.details = Some(reason.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::CacheRead { feed, count } => {
            let mut e = LogEntry::new(EventType::CacheRead, Severity::Info);
            e.feed = Some(feed.clone());
            e.count = Some(*count as u64);
            e
        }
        ActivityEvent::CacheWrite {
            feed,
            inserted,
            updated,
        } => {
            let mut e = LogEntry::new(EventType::CacheWrite, Severity::Info);
            e.feed = Some(feed.clone());
            e.count = Some((*inserted + *updated) as u64);
            e.details = Some(format!("inserted={inserted} updated={updated}"));
            e
        }
        ActivityEvent::CachePruned { removed } => {
            let mut e = LogEntry::new(EventType::CachePruned, Severity::Info);
            e.count = Some(*removed as u64);
            e
        }
        ActivityEvent::FeedReset { feed } => {
            let mut e = LogEntry::new(EventType::FeedReset, Severity::Info);
            e.feed = Some(feed.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::SessionStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
fn log_entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    let as_i64 = |v: Option<u64>| v.and_then(|n| i64::try_from(n).ok());
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: entry.severity.as_str().to_string(),
        feed: entry.feed.clone(),
        fetch_end: entry.end.clone(),
        request_id: as_i64(entry.request_id),
        gap_id: entry.gap,
        item_count: as_i64(entry.count),
        full_fetch: entry.full_fetch,
        duration_ms: as_i64(entry.duration_ms),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}
