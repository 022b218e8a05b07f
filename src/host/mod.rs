//! The slice of the host SQL engine the crawler consumes.
//!
//! [`Database`] is a handle to one logical SQLite database that can hand
//! out child connections, the way the original operators opened fresh
//! connections against the owning database instance. Its process-local id
//! keys the pipeline-limit registry.

pub mod bridge;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::error::Result;
use crate::utils::sql::escape_sql_string;

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

struct DbInner {
    id: u64,
    uri: String,
    // Keeps a shared-memory database alive for the handle's lifetime.
    _anchor: Mutex<Connection>,
}

/// Handle to one logical database. Cloning shares the same database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    fn from_uri(id: u64, uri: String) -> Result<Self> {
        let anchor = Connection::open(&uri)?;
        Ok(Self {
            inner: Arc::new(DbInner {
                id,
                uri,
                _anchor: Mutex::new(anchor),
            }),
        })
    }

    /// Private shared-memory database, one per handle.
    pub fn in_memory() -> Result<Self> {
        let id = NEXT_DB_ID.fetch_add(1, Ordering::Relaxed);
        Self::from_uri(id, format!("file:crawlstream-mem-{id}?mode=memory&cache=shared"))
    }

    /// On-disk database at `path`, created if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let id = NEXT_DB_ID.fetch_add(1, Ordering::Relaxed);
        Self::from_uri(id, path.to_string_lossy().into_owned())
    }

    /// Process-local identity, used to key shared pipeline limits.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Open a child connection to the same database.
    pub fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.inner.uri)?)
    }
}

/// Materialized query result: column names, inferred column types, rows.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// SQL type name for a value, used when creating tables from query output.
pub fn value_type_name(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Integer(_) => "INTEGER",
        SqlValue::Real(_) => "REAL",
        SqlValue::Blob(_) => "BLOB",
        SqlValue::Text(_) | SqlValue::Null => "TEXT",
    }
}

/// Render a value as a SQL literal for generated statements. Strings go
/// through [`escape_sql_string`].
pub fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => format!("{f:?}"),
        SqlValue::Text(s) => escape_sql_string(s),
        SqlValue::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
            out.push('\'');
            out
        }
    }
}

/// Plain-text rendering used for join-key comparison sets.
pub fn value_to_string(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => format!("{f:?}"),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(bytes) => format!("{}b", bytes.len()),
    }
}

/// Run a query and materialize every row. Column types are inferred from
/// the first row; columns that never produce a non-null value are TEXT.
pub fn query_rows(conn: &Connection, sql: &str) -> Result<RowSet> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();
    let columns: Vec<String> = (0..column_count)
        .map(|i| stmt.column_name(i).map(|s| s.to_string()))
        .collect::<std::result::Result<_, _>>()?;

    let mut out_rows: Vec<Vec<SqlValue>> = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        out_rows.push(values);
    }

    let mut types = vec!["TEXT"; column_count];
    for (i, slot) in types.iter_mut().enumerate() {
        for row in &out_rows {
            if !matches!(row[i], SqlValue::Null) {
                *slot = value_type_name(&row[i]);
                break;
            }
        }
    }

    Ok(RowSet {
        columns,
        types: types.into_iter().map(String::from).collect(),
        rows: out_rows,
    })
}

/// Does a table with this exact name exist?
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1")?;
    let found = stmt.exists([table])?;
    Ok(found)
}
