//! HTTP response cache (`__crawler_cache`).
//!
//! Lookups are batched into one `IN (…)` query to avoid N+1 round-trips;
//! writes use `INSERT OR REPLACE` so refetches overwrite stale entries.

use std::collections::HashSet;

use rusqlite::{params, params_from_iter, Connection};

use crate::error::Result;

pub const CACHE_TABLE: &str = "__crawler_cache";

/// One cached response row.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub url: String,
    pub status: i32,
    pub content_type: String,
    pub body: String,
    pub error: String,
    pub response_time_ms: i64,
}

/// Create the cache table if missing.
pub fn ensure_cache_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {CACHE_TABLE} (
            url TEXT PRIMARY KEY,
            status_code INTEGER,
            content_type TEXT,
            body TEXT,
            error TEXT,
            response_time_ms INTEGER,
            cached_at TEXT DEFAULT (datetime('now')))",
    ))?;
    Ok(())
}

/// Fetch cache entries for `urls` that are fresher than `ttl_hours`, in one
/// batched query.
pub fn cached_entries(
    conn: &Connection,
    urls: &[String],
    ttl_hours: i64,
) -> Result<Vec<CacheEntry>> {
    if urls.is_empty() {
        return Ok(Vec::new());
    }
    ensure_cache_table(conn)?;

    let placeholders = (1..=urls.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT url, status_code, content_type, body, error, response_time_ms
         FROM {CACHE_TABLE}
         WHERE url IN ({placeholders})
           AND cached_at > datetime('now', '-{ttl_hours} hours')",
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(urls.iter()), |row| {
        Ok(CacheEntry {
            url: row.get(0)?,
            status: row.get(1)?,
            content_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            error: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            response_time_ms: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
        })
    })?;

    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }
    Ok(entries)
}

/// Single-URL convenience over [`cached_entries`].
pub fn cached_entry(conn: &Connection, url: &str, ttl_hours: i64) -> Result<Option<CacheEntry>> {
    let mut entries = cached_entries(conn, std::slice::from_ref(&url.to_string()), ttl_hours)?;
    Ok(entries.pop())
}

/// URLs from `urls` that have a fresh cache entry.
pub fn cached_urls(conn: &Connection, urls: &[String], ttl_hours: i64) -> Result<HashSet<String>> {
    Ok(cached_entries(conn, urls, ttl_hours)?
        .into_iter()
        .map(|e| e.url)
        .collect())
}

/// Write-through: overwrite any previous entry for the URL.
pub fn save_to_cache(conn: &Connection, entry: &CacheEntry) -> Result<()> {
    ensure_cache_table(conn)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {CACHE_TABLE}
             (url, status_code, content_type, body, error, response_time_ms, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
        ),
        params![
            entry.url,
            entry.status,
            none_if_empty(&entry.content_type),
            none_if_empty(&entry.body),
            none_if_empty(&entry.error),
            entry.response_time_ms,
        ],
    )?;
    Ok(())
}

fn none_if_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Database;

    fn entry(url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            status: 200,
            content_type: "text/html".into(),
            body: "<html></html>".into(),
            error: String::new(),
            response_time_ms: 12,
        }
    }

    #[test]
    fn batched_lookup_and_overwrite() {
        let db = Database::in_memory().unwrap();
        let conn = db.connect().unwrap();
        save_to_cache(&conn, &entry("https://h/a")).unwrap();
        save_to_cache(&conn, &entry("https://h/b")).unwrap();

        let urls = vec!["https://h/a".to_string(), "https://h/b".into(), "https://h/c".into()];
        let hits = cached_entries(&conn, &urls, 24).unwrap();
        assert_eq!(hits.len(), 2);

        let mut updated = entry("https://h/a");
        updated.status = 304;
        save_to_cache(&conn, &updated).unwrap();
        let hit = cached_entry(&conn, "https://h/a", 24).unwrap().unwrap();
        assert_eq!(hit.status, 304);
    }

    #[test]
    fn ttl_expiry() {
        let db = Database::in_memory().unwrap();
        let conn = db.connect().unwrap();
        save_to_cache(&conn, &entry("https://h/old")).unwrap();
        // Backdate past a 2-hour TTL.
        conn.execute(
            &format!(
                "UPDATE {CACHE_TABLE} SET cached_at = datetime('now', '-3 hours') WHERE url = ?1"
            ),
            ["https://h/old"],
        )
        .unwrap();

        assert!(cached_entry(&conn, "https://h/old", 2).unwrap().is_none());
        assert!(cached_entry(&conn, "https://h/old", 4).unwrap().is_some());
    }

    #[test]
    fn empty_url_list() {
        let db = Database::in_memory().unwrap();
        let conn = db.connect().unwrap();
        assert!(cached_entries(&conn, &[], 24).unwrap().is_empty());
        assert!(cached_urls(&conn, &[], 24).unwrap().is_empty());
    }
}
