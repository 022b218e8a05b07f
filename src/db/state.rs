//! User-named crawl-state tables.
//!
//! A state table records every URL a query has emitted, which makes
//! re-runs resumable: URLs already present are preloaded into the
//! operator's processed set and skipped. etag / last_modified validators
//! are stored for conditional refetches.

use std::collections::HashSet;

use rusqlite::{params, Connection};

use crate::error::{CrawlError, Result};
use crate::utils::sql::{is_valid_identifier, quote_identifier};

fn checked_table_name(table: &str) -> Result<String> {
    if !is_valid_identifier(table) {
        return Err(CrawlError::InvalidIdentifier(table.to_string()));
    }
    Ok(quote_identifier(table))
}

/// Create the state table if missing. The name must pass identifier
/// validation before it is interpolated.
pub fn ensure_state_table(conn: &Connection, table: &str) -> Result<()> {
    let quoted = checked_table_name(table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {quoted} (
            url TEXT PRIMARY KEY,
            http_status INTEGER,
            extracted TEXT,
            crawled_at TEXT DEFAULT (datetime('now')),
            etag TEXT,
            last_modified TEXT)",
    ))?;
    Ok(())
}

/// Load every URL already recorded, for resumability.
pub fn load_processed(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let quoted = checked_table_name(table)?;
    let mut stmt = conn.prepare(&format!("SELECT url FROM {quoted}"))?;
    let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
    let mut urls = HashSet::new();
    for row in rows {
        if let Some(url) = row? {
            urls.insert(url);
        }
    }
    Ok(urls)
}

/// Record one emitted row, overwriting any previous entry for the URL.
pub fn save_state(
    conn: &Connection,
    table: &str,
    url: &str,
    status: i32,
    extracted: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Result<()> {
    let quoted = checked_table_name(table)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {quoted}
             (url, http_status, extracted, crawled_at, etag, last_modified)
             VALUES (?1, ?2, ?3, datetime('now'), ?4, ?5)",
        ),
        params![
            url,
            status,
            if extracted.is_empty() { None } else { Some(extracted) },
            etag,
            last_modified,
        ],
    )?;
    Ok(())
}

/// Stored validators for a URL, offered as conditional request hints.
pub fn conditional_hints(
    conn: &Connection,
    table: &str,
    url: &str,
) -> Result<(Option<String>, Option<String>)> {
    let quoted = checked_table_name(table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT etag, last_modified FROM {quoted} WHERE url = ?1"
    ))?;
    let mut rows = stmt.query([url])?;
    if let Some(row) = rows.next()? {
        Ok((row.get(0)?, row.get(1)?))
    } else {
        Ok((None, None))
    }
}
