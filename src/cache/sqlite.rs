//! SQLite-backed timeline cache.
//!
//! One row per entry or placeholder in `timeline_entry`, keyed by account and
//! server id. Ids order by length, then lexically, so the `id_len` column
//! carries the first half of every range comparison. A NULL payload marks a
//! placeholder.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheQuery, CacheStats, CachedItem, StoreOutcome, TimelineCache};
use crate::core::errors::Result;
use crate::logger::sqlite::open_connection;
use crate::timeline::cursor::{Cursor, decrement_id, increment_id};
use crate::timeline::item::FeedEntry;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS timeline_entry (
    account_id INTEGER NOT NULL,
    server_id TEXT NOT NULL,
    id_len INTEGER NOT NULL,
    payload TEXT,
    created_at_ms INTEGER NOT NULL,
    stored_at_ms INTEGER NOT NULL,
    PRIMARY KEY (account_id, server_id)
);
CREATE INDEX IF NOT EXISTS idx_timeline_order
    ON timeline_entry(account_id, id_len, server_id);
CREATE INDEX IF NOT EXISTS idx_timeline_created
    ON timeline_entry(account_id, created_at_ms);
";

/// Rows older than the id bound to `text`/`len`; no bound when `text` is NULL.
fn older_than_sql(text: &str, len: &str) -> String {
    format!("({text} IS NULL OR id_len < {len} OR (id_len = {len} AND server_id < {text}))")
}

/// Rows newer than the id bound to `text`/`len`; no bound when `text` is NULL.
fn newer_than_sql(text: &str, len: &str) -> String {
    format!("({text} IS NULL OR id_len > {len} OR (id_len = {len} AND server_id > {text}))")
}

pub struct SqliteTimelineCache<T> {
    conn: Connection,
    path: PathBuf,
    account_id: i64,
    _entries: PhantomData<fn() -> T>,
}

impl<T> SqliteTimelineCache<T> {
    /// Open (or create) the cache at `path` for one account.
    pub fn open(path: &Path, account_id: i64) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            account_id,
            _entries: PhantomData,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn account_id(&self) -> i64 {
        self.account_id
    }

    /// Stored rows (entries and placeholders) newest first, for inspection.
    pub fn rows(&self, limit: usize) -> Result<Vec<CachedRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT server_id, payload IS NULL, created_at_ms, stored_at_ms
             FROM timeline_entry WHERE account_id = ?1
             ORDER BY id_len DESC, server_id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![self.account_id, sql_limit(limit)], |row| {
                Ok(CachedRow {
                    server_id: row.get(0)?,
                    placeholder: row.get(1)?,
                    created_at_ms: row.get(2)?,
                    stored_at_ms: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// One stored row as `tlsync cache show` prints it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedRow {
    pub server_id: String,
    pub placeholder: bool,
    pub created_at_ms: i64,
    pub stored_at_ms: i64,
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn id_len(id: &str) -> i64 {
    i64::try_from(id.len()).unwrap_or(i64::MAX)
}

fn bound(cursor: Option<&Cursor>) -> (Option<&str>, i64) {
    cursor.map_or((None, 0), |c| (Some(c.as_str()), id_len(c.as_str())))
}

fn remove_placeholders_between(
    conn: &Connection,
    account_id: i64,
    newest: &str,
    oldest: &str,
) -> Result<usize> {
    let sql = format!(
        "DELETE FROM timeline_entry WHERE account_id = ?1 AND payload IS NULL AND {} AND {}",
        older_than_sql("?2", "?3"),
        newer_than_sql("?4", "?5"),
    );
    Ok(conn.execute(
        &sql,
        params![account_id, newest, id_len(newest), oldest, id_len(oldest)],
    )?)
}

fn insert_placeholder(conn: &Connection, account_id: i64, id: &str, now_ms: i64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO timeline_entry
            (account_id, server_id, id_len, payload, created_at_ms, stored_at_ms)
         VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
        params![account_id, id, id_len(id), now_ms],
    )?;
    Ok(inserted > 0)
}

impl<T> TimelineCache<T> for SqliteTimelineCache<T>
where
    T: FeedEntry + Serialize + DeserializeOwned,
{
    fn store_page(
        &mut self,
        items: &[T],
        older_than: Option<&Cursor>,
        newer_than: Option<&Cursor>,
    ) -> Result<StoreOutcome> {
        let mut outcome = StoreOutcome::default();
        let (Some(newest), Some(oldest)) = (items.first(), items.last()) else {
            return Ok(outcome);
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        let account_id = self.account_id;

        let mut hole_above: Option<String> = None;
        if let Some(since) = newer_than {
            match items.iter().rposition(|entry| entry.id() == since.as_str()) {
                Some(index) => outcome.overlap = items.len() - index,
                None => hole_above = Some(increment_id(since.as_str())),
            }
        }

        let tx = self.conn.transaction()?;
        // Stored entries inside the page range are replaced wholesale.
        tx.execute(
            &format!(
                "DELETE FROM timeline_entry
                 WHERE account_id = ?1 AND payload IS NOT NULL AND NOT {} AND NOT {}",
                older_than_sql("?2", "?3"),
                newer_than_sql("?4", "?5"),
            ),
            params![
                account_id,
                newest.id(),
                id_len(newest.id()),
                oldest.id(),
                id_len(oldest.id())
            ],
        )?;

        {
            let mut insert = tx.prepare_cached(
                "INSERT OR REPLACE INTO timeline_entry
                    (account_id, server_id, id_len, payload, created_at_ms, stored_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in items {
                let payload = serde_json::to_string(entry)?;
                insert.execute(params![
                    account_id,
                    entry.id(),
                    id_len(entry.id()),
                    payload,
                    entry.created_at_ms(),
                    now_ms
                ])?;
                outcome.written += 1;
            }
        }

        if let Some(id) = &hole_above {
            outcome.placeholder_stored |= insert_placeholder(&tx, account_id, id, now_ms)?;
        }
        // A bottom load leaves a marker below itself for the next session.
        if newer_than.is_none() {
            let below = decrement_id(oldest.id());
            if !below.is_empty() {
                outcome.placeholder_stored |= insert_placeholder(&tx, account_id, &below, now_ms)?;
            }
        }

        if items.len() > 2 {
            outcome.placeholders_removed =
                remove_placeholders_between(&tx, account_id, newest.id(), oldest.id())?;
        } else if hole_above.is_none()
            && let (Some(max), Some(since)) = (older_than, newer_than)
        {
            outcome.placeholders_removed =
                remove_placeholders_between(&tx, account_id, max.as_str(), since.as_str())?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn read_cached(&self, query: &CacheQuery) -> Result<Vec<CachedItem<T>>> {
        let (upper, upper_len) = bound(query.older_than.as_ref());
        let (lower, lower_len) = bound(
            query
                .newer_than_minus_one
                .as_ref()
                .or(query.newer_than.as_ref()),
        );
        let sql = format!(
            "SELECT server_id, payload FROM timeline_entry
             WHERE account_id = ?1 AND {} AND {}
             ORDER BY id_len DESC, server_id DESC LIMIT ?6",
            older_than_sql("?2", "?3"),
            newer_than_sql("?4", "?5"),
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    self.account_id,
                    upper,
                    upper_len,
                    lower,
                    lower_len,
                    sql_limit(query.limit)
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            items.push(match payload {
                Some(raw) => CachedItem::Entry(serde_json::from_str::<T>(&raw)?),
                None => CachedItem::Placeholder { id },
            });
        }
        Ok(items)
    }

    fn cleanup(&mut self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        Ok(self.conn.execute(
            "DELETE FROM timeline_entry WHERE account_id = ?1 AND created_at_ms < ?2",
            params![self.account_id, cutoff.timestamp_millis()],
        )?)
    }

    fn stats(&self) -> Result<CacheStats> {
        let (entries, placeholders): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(payload), COUNT(*) - COUNT(payload)
             FROM timeline_entry WHERE account_id = ?1",
            params![self.account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let edge = |order: &str| -> Result<Option<String>> {
            let sql = format!(
                "SELECT server_id FROM timeline_entry
                 WHERE account_id = ?1 AND payload IS NOT NULL
                 ORDER BY id_len {order}, server_id {order} LIMIT 1"
            );
            Ok(self
                .conn
                .query_row(&sql, params![self.account_id], |row| row.get(0))
                .optional()?)
        };
        Ok(CacheStats {
            entries: u64::try_from(entries).unwrap_or(0),
            placeholders: u64::try_from(placeholders).unwrap_or(0),
            newest_id: edge("DESC")?,
            oldest_id: edge("ASC")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: String,
        created_at_ms: i64,
    }

    impl FeedEntry for Post {
        fn id(&self) -> &str {
            &self.id
        }

        fn created_at_ms(&self) -> i64 {
            self.created_at_ms
        }
    }

    fn posts(ids: std::ops::RangeInclusive<u32>) -> Vec<Post> {
        let now = chrono::Utc::now().timestamp_millis();
        ids.rev()
            .map(|i| Post {
                id: i.to_string(),
                created_at_ms: now,
            })
            .collect()
    }

    fn temp_cache() -> (tempfile::TempDir, SqliteTimelineCache<Post>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteTimelineCache::open(&dir.path().join("cache/timeline.db"), 1).unwrap();
        (dir, cache)
    }

    fn ids(page: &[Post]) -> Vec<&str> {
        page.iter().map(|p| p.id.as_str()).collect()
    }

    fn entries(rows: Vec<CachedItem<Post>>) -> Vec<Post> {
        rows.into_iter().filter_map(CachedItem::into_entry).collect()
    }

    #[test]
    fn bottom_load_stores_entries_and_marker_below() {
        let (_dir, mut cache) = temp_cache();
        let outcome = cache.store_page(&posts(10..=14), None, None).unwrap();
        assert_eq!(outcome.written, 5);
        assert!(outcome.placeholder_stored);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.placeholders, 1);
        assert_eq!(stats.newest_id.as_deref(), Some("14"));
        assert_eq!(stats.oldest_id.as_deref(), Some("10"));

        let rows = cache.rows(10).unwrap();
        assert_eq!(rows.last().map(|r| (r.server_id.as_str(), r.placeholder)), Some(("z", true)));
    }

    #[test]
    fn read_respects_bounds() {
        let (_dir, mut cache) = temp_cache();
        cache.store_page(&posts(1..=20), None, None).unwrap();

        let newest = cache.read_cached(&CacheQuery::newest(3)).unwrap();
        assert_eq!(ids(&entries(newest)), ["20", "19", "18"]);

        let window = cache
            .read_cached(&CacheQuery {
                older_than: Some(Cursor::new("15")),
                newer_than: Some(Cursor::new("9")),
                newer_than_minus_one: None,
                limit: 100,
            })
            .unwrap();
        assert_eq!(ids(&entries(window)), ["14", "13", "12", "11", "10"]);

        let with_overlap = cache
            .read_cached(&CacheQuery {
                older_than: Some(Cursor::new("12")),
                newer_than: Some(Cursor::new("9")),
                newer_than_minus_one: Some(Cursor::new("8")),
                limit: 100,
            })
            .unwrap();
        assert_eq!(ids(&entries(with_overlap)), ["11", "10", "9"]);
    }

    #[test]
    fn read_returns_stored_placeholders_in_order() {
        let (_dir, mut cache) = temp_cache();
        cache.store_page(&posts(7..=9), None, None).unwrap();
        cache
            .store_page(&posts(18..=20), None, Some(&Cursor::new("9")))
            .unwrap();

        let rows = cache.read_cached(&CacheQuery::newest(10)).unwrap();
        let shape: Vec<String> = rows
            .iter()
            .map(|row| match row {
                CachedItem::Entry(post) => post.id.clone(),
                CachedItem::Placeholder { .. } => "_".to_string(),
            })
            .collect();
        assert_eq!(shape, ["20", "19", "18", "_", "9", "8", "7", "_"]);
        assert_eq!(
            rows.get(3),
            Some(&CachedItem::Placeholder { id: ":".to_string() })
        );
    }

    #[test]
    fn top_without_overlap_records_hole() {
        let (_dir, mut cache) = temp_cache();
        cache.store_page(&posts(1..=5), None, None).unwrap();
        let since = Cursor::new("5");
        let outcome = cache.store_page(&posts(30..=40), None, Some(&since)).unwrap();
        assert!(outcome.placeholder_stored);
        assert_eq!(outcome.overlap, 0);
        assert!(cache.rows(100).unwrap().iter().any(|r| r.server_id == "6" && r.placeholder));

        let overlapping = cache.store_page(&posts(40..=42), None, Some(&Cursor::new("40"))).unwrap();
        assert_eq!(overlapping.overlap, 1);
        assert!(!overlapping.placeholder_stored);
    }

    #[test]
    fn full_page_clears_placeholders_inside_its_range() {
        let (_dir, mut cache) = temp_cache();
        cache.store_page(&posts(1..=5), None, None).unwrap();
        cache
            .store_page(&posts(30..=40), None, Some(&Cursor::new("5")))
            .unwrap();
        // Filling the hole covers the stored placeholder at "6".
        let filled = cache
            .store_page(&posts(5..=29), Some(&Cursor::new("30")), Some(&Cursor::new("5")))
            .unwrap();
        assert_eq!(filled.placeholders_removed, 1);
        assert!(!cache.rows(100).unwrap().iter().any(|r| r.server_id == "6"));
    }

    #[test]
    fn cleanup_removes_old_entries() {
        let (_dir, mut cache) = temp_cache();
        let mut old = posts(1..=3);
        for post in &mut old {
            post.created_at_ms = 0;
        }
        cache.store_page(&old, Some(&Cursor::new("4")), Some(&Cursor::new("0"))).unwrap();
        cache.store_page(&posts(10..=12), None, None).unwrap();
        assert_eq!(cache.cleanup(14).unwrap(), 3);
        assert_eq!(cache.stats().unwrap().entries, 3);
    }

    #[test]
    fn accounts_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let mut first = SqliteTimelineCache::<Post>::open(&path, 1).unwrap();
        let second = SqliteTimelineCache::<Post>::open(&path, 2).unwrap();
        first.store_page(&posts(1..=3), None, None).unwrap();
        assert!(second.read_cached(&CacheQuery::newest(10)).unwrap().is_empty());
        assert_eq!(second.account_id(), 2);
    }
}
