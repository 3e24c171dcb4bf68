//! JSON-lines activity log with size rotation and a fallback chain.
//!
//! Each record is serialized in memory and written with one `write_all`, so a
//! concurrent `tail -f` never sees half a line. When a destination fails the
//! writer steps down: primary path, fallback path, stderr (`[TLS-JSONL]`
//! prefix), discard. Logging never takes the feed down with it.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TlsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Kinds of activity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionStop,
    FetchStarted,
    FetchCompleted,
    FetchFailed,
    StaleDiscarded,
    GapRejected,
    CacheRead,
    CacheWrite,
    CachePruned,
    FeedReset,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionStop => "session_stop",
            Self::FetchStarted => "fetch_started",
            Self::FetchCompleted => "fetch_completed",
            Self::FetchFailed => "fetch_failed",
            Self::StaleDiscarded => "stale_discarded",
            Self::GapRejected => "gap_rejected",
            Self::CacheRead => "cache_read",
            Self::CacheWrite => "cache_write",
            Self::CachePruned => "cache_pruned",
            Self::FeedReset => "feed_reset",
            Self::Error => "error",
        }
    }
}

/// One line of the activity log. Absent fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Feed the record belongs to (`home`, `notifications`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    /// Fetch end: `top`, `bottom` or `middle`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<i64>,
    /// Entries returned, stored or removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_fetch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// A bare record stamped with the current time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            feed: None,
            end: None,
            request_id: None,
            gap: None,
            count: None,
            full_fetch: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Second file to try when the primary cannot be written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would grow past this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`.1` is the newest).
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home.join(".local/share/tlsync/activity.jsonl"),
            fallback_path: Some(std::env::temp_dir().join("tlsync-activity.jsonl")),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

pub struct JsonlWriter {
    config: JsonlConfig,
    out: Option<BufWriter<File>>,
    sink: Sink,
    size: u64,
    synced_at: Instant,
}

impl JsonlWriter {
    /// Open the log, stepping down the fallback chain as needed.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            out: None,
            sink: Sink::Discard,
            size: 0,
            synced_at: Instant::now(),
        };
        let primary = writer.config.path.clone();
        if !writer.attach(&primary, Sink::Primary) {
            writer.step_down();
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.emit(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[TLS-JSONL] cannot serialize entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
        self.synced_at = Instant::now();
    }

    /// Where records currently go: `normal`, `fallback`, `stderr` or `discard`.
    #[must_use]
    pub const fn state(&self) -> &'static str {
        match self.sink {
            Sink::Primary => "normal",
            Sink::Fallback => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.size
    }

    // ──────────────────── internals ────────────────────

    fn emit(&mut self, line: &str) {
        let len = line.len() as u64;
        loop {
            match self.sink {
                Sink::Primary | Sink::Fallback => {
                    if self.size + len > self.config.max_size_bytes && self.size > 0 {
                        self.rotate();
                        continue;
                    }
                    let written = self
                        .out
                        .as_mut()
                        .is_some_and(|out| out.write_all(line.as_bytes()).is_ok());
                    if written {
                        self.size += len;
                        if self.synced_at.elapsed().as_secs() >= self.config.fsync_interval_secs {
                            self.fsync();
                        }
                        return;
                    }
                    self.step_down();
                }
                Sink::Stderr => {
                    let _ = write!(io::stderr(), "[TLS-JSONL] {line}");
                    return;
                }
                Sink::Discard => return,
            }
        }
    }

    fn attach(&mut self, path: &Path, sink: Sink) -> bool {
        match open_append(path) {
            Ok((file, size)) => {
                self.out = Some(BufWriter::with_capacity(64 * 1024, file));
                self.sink = sink;
                self.size = size;
                true
            }
            Err(_) => false,
        }
    }

    fn step_down(&mut self) {
        self.out = None;
        self.sink = match self.sink {
            Sink::Primary => {
                let fallback = self.config.fallback_path.clone();
                if let Some(path) = fallback
                    && self.attach(&path, Sink::Fallback)
                {
                    let _ = writeln!(
                        io::stderr(),
                        "[TLS-JSONL] primary log unwritable, using {}",
                        path.display()
                    );
                    return;
                }
                let _ = writeln!(io::stderr(), "[TLS-JSONL] log files unwritable, using stderr");
                Sink::Stderr
            }
            Sink::Fallback => Sink::Stderr,
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    fn rotate(&mut self) {
        self.flush();
        self.out = None;
        let base = match self.sink {
            Sink::Primary => self.config.path.clone(),
            Sink::Fallback => match &self.config.fallback_path {
                Some(path) => path.clone(),
                None => return self.step_down(),
            },
            Sink::Stderr | Sink::Discard => return,
        };

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(
                rotated_name(&base, generation),
                rotated_name(&base, generation + 1),
            );
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        let sink = self.sink;
        if !self.attach(&base, sink) {
            self.step_down();
        }
    }
}

// ──────────────────── helpers ────────────────────

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| TlsError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TlsError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.2`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

pub(crate) fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn entries_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::FetchCompleted, Severity::Info);
        entry.feed = Some("home".to_string());
        entry.end = Some("top".to_string());
        entry.count = Some(30);
        entry.full_fetch = Some(true);
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::SessionStart, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "fetch_completed");
        assert_eq!(first["feed"], "home");
        assert_eq!(first["full_fetch"], true);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "session_start");
    }

    #[test]
    fn absent_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::FeedReset, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"gap\""));
        assert!(!line.contains("\"request_id\""));
        assert!(line.contains("\"severity\":\"info\""));
    }

    #[test]
    fn rotation_keeps_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 120));
        for _ in 0..12 {
            writer.write_entry(&LogEntry::new(EventType::FetchStarted, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn unwritable_primary_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let mut cfg = config(blocker.join("primary.jsonl"), 1024 * 1024);
        cfg.fallback_path = Some(fallback.clone());
        let mut writer = JsonlWriter::open(cfg);

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn fresh_primary_reports_normal() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlWriter::open(config(dir.path().join("ok.jsonl"), 1024));
        assert_eq!(writer.state(), "normal");
        assert_eq!(writer.bytes_written(), 0);
    }
}
