//! SQLite activity store: WAL-mode table of feed events for later querying.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{Result, TlsError};

pub struct ActivityStore {
    conn: Connection,
    path: PathBuf,
}

impl ActivityStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                feed TEXT,
                fetch_end TEXT,
                request_id INTEGER,
                gap_id INTEGER,
                item_count INTEGER,
                full_fetch INTEGER,
                duration_ms INTEGER,
                success INTEGER NOT NULL DEFAULT 1,
                error_code TEXT,
                error_message TEXT,
                details TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_activity_type_time
                ON activity_log(event_type, timestamp);",
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                    timestamp, event_type, severity, feed, fetch_end, request_id,
                    gap_id, item_count, full_fetch, duration_ms, success,
                    error_code, error_message, details
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.feed,
                row.fetch_end,
                row.request_id,
                row.gap_id,
                row.item_count,
                row.full_fetch,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Most recent rows, newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, feed, fetch_end, request_id,
                    gap_id, item_count, full_fetch, duration_ms, success,
                    error_code, error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    feed: row.get(3)?,
                    fetch_end: row.get(4)?,
                    request_id: row.get(5)?,
                    gap_id: row.get(6)?,
                    item_count: row.get(7)?,
                    full_fetch: row.get(8)?,
                    duration_ms: row.get(9)?,
                    success: row.get(10)?,
                    error_code: row.get(11)?,
                    error_message: row.get(12)?,
                    details: row.get(13)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows older than `retention_days`; returns rows deleted.
    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Ok(self
            .conn
            .execute("DELETE FROM activity_log WHERE timestamp < ?1", params![cutoff])?)
    }

    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?)
    }

    #[must_use]
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }
}

/// Row of the `activity_log` table.
#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub feed: Option<String>,
    pub fetch_end: Option<String>,
    pub request_id: Option<i64>,
    pub gap_id: Option<i64>,
    pub item_count: Option<i64>,
    pub full_fetch: Option<bool>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

/// Open a read-write connection with the shared PRAGMAs, creating parents.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| TlsError::io(parent, source))?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[TLS-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(conn)
}
