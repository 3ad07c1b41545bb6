// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Read-only access to pseudo's `files.db` tracking database
//!
//! Each row records the identity pseudo associates with a path: device,
//! inode, owner, mode and a pending-deletion marker. Rows are parsed strictly;
//! a value of the wrong SQLite storage class is rejected rather than coerced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, Rows, Statement};
use thiserror::Error;
use tracing::debug;

/// Default wait for a write lock held by a running pseudo server
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(5);

const FILES_QUERY: &str = "SELECT * FROM files ORDER BY id";
const FILES_COLUMNS: [&str; 9] = [
    "id", "path", "dev", "ino", "uid", "gid", "mode", "rdev", "deleting",
];

#[derive(Error, Debug)]
pub enum FilesDbError {
    #[error(
        "Unexpected db value '{value}' of type '{kind}' in column '{column}'. Expected {expected}."
    )]
    RowParse {
        column: &'static str,
        value: String,
        kind: &'static str,
        expected: &'static str,
    },

    #[error("Unexpected db row size: found {found} columns, expected at least {}", FILES_COLUMNS.len())]
    RowSize { found: usize },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One row of the `files` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesDbRow {
    pub id: i64,
    pub path: PathBuf,
    pub dev: i64,
    pub ino: i64,
    pub uid: i64,
    pub gid: i64,
    pub mode: i64,
    pub rdev: i64,
    pub deleting: i64,
}

impl FilesDbRow {
    /// Inode as reported by `stat`; pseudo stores it as a signed integer
    pub fn inode(&self) -> u64 {
        self.ino as u64
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting != 0
    }

    fn parse(row: &Row<'_>) -> Result<Self, FilesDbError> {
        let found = row.as_ref().column_count();
        if found < FILES_COLUMNS.len() {
            return Err(FilesDbError::RowSize { found });
        }

        Ok(Self {
            id: parse_int(row, 0)?,
            path: PathBuf::from(parse_text(row, 1)?),
            dev: parse_int(row, 2)?,
            ino: parse_int(row, 3)?,
            uid: parse_int(row, 4)?,
            gid: parse_int(row, 5)?,
            mode: parse_int(row, 6)?,
            rdev: parse_int(row, 7)?,
            deleting: parse_int(row, 8)?,
        })
    }
}

/// Read-only connection to a `files.db`
pub struct FilesDb {
    conn: Connection,
}

impl FilesDb {
    /// Open `path` read-only, waiting up to `timeout` on a locked database
    pub fn open<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self, FilesDbError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(timeout)?;
        debug!(operation = "files_db_open", path = %path.display(), "Opened pseudo files db");
        Ok(Self { conn })
    }

    /// Prepare the ordered query over all tracking rows
    pub fn query(&self) -> Result<FilesDbQuery<'_>, FilesDbError> {
        Ok(FilesDbQuery {
            stmt: self.conn.prepare(FILES_QUERY)?,
        })
    }
}

/// Prepared `files` query; iterate it with [`FilesDbQuery::rows`]
pub struct FilesDbQuery<'conn> {
    stmt: Statement<'conn>,
}

impl FilesDbQuery<'_> {
    /// Lazily yield rows in ascending id order, stopping at the first error
    pub fn rows(&mut self) -> Result<FilesDbRows<'_>, FilesDbError> {
        Ok(FilesDbRows {
            rows: self.stmt.query([])?,
            done: false,
        })
    }
}

/// Single-pass, fused iterator over parsed tracking rows
pub struct FilesDbRows<'stmt> {
    rows: Rows<'stmt>,
    done: bool,
}

impl Iterator for FilesDbRows<'_> {
    type Item = Result<FilesDbRow, FilesDbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.rows.next() {
            Ok(Some(row)) => FilesDbRow::parse(row),
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e.into()),
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

/// Read every tracking row of the database at `db_path`
pub fn read_files_db_rows(
    db_path: &Path,
    timeout: Duration,
) -> Result<Vec<FilesDbRow>, FilesDbError> {
    let db = FilesDb::open(db_path, timeout)?;
    let mut query = db.query()?;
    let rows = query.rows()?.collect();
    rows
}

fn parse_int(row: &Row<'_>, idx: usize) -> Result<i64, FilesDbError> {
    match row.get_ref(idx)? {
        ValueRef::Integer(v) => Ok(v),
        other => Err(unexpected(idx, other, "an 'int'")),
    }
}

fn parse_text(row: &Row<'_>, idx: usize) -> Result<String, FilesDbError> {
    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(unexpected(idx, other, "a 'str'")),
    }
}

fn unexpected(idx: usize, value: ValueRef<'_>, expected: &'static str) -> FilesDbError {
    let (value, kind) = match value {
        ValueRef::Null => ("NULL".to_string(), "null"),
        ValueRef::Integer(v) => (v.to_string(), "integer"),
        ValueRef::Real(v) => (v.to_string(), "real"),
        ValueRef::Text(bytes) => (String::from_utf8_lossy(bytes).into_owned(), "text"),
        ValueRef::Blob(bytes) => (format!("<{} byte blob>", bytes.len()), "blob"),
    };
    FilesDbError::RowParse {
        column: FILES_COLUMNS[idx],
        value,
        kind,
        expected,
    }
}
