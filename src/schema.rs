//! SQL schema of a store file.

use crate::error::MatrixStoreError;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Stored in `PRAGMA user_version`. Bump whenever the tables or blob format change.
pub const SCHEMA_VERSION: i64 = 1;

/// Row id of the single `all_presentations` row.
pub const ALL_PRESENTATIONS_ID: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE date (
    position INTEGER PRIMARY KEY,
    date TEXT NOT NULL UNIQUE
);
CREATE TABLE organisation (
    position INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE
);
CREATE TABLE presentation (
    code TEXT PRIMARY KEY,
    is_generic INTEGER NOT NULL DEFAULT 0,
    adq_per_quantity REAL,
    name TEXT NOT NULL DEFAULT '',
    items BLOB,
    quantity BLOB,
    actual_cost BLOB,
    net_cost BLOB
);
CREATE TABLE organisation_statistic (
    name TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
CREATE TABLE all_presentations (
    id INTEGER PRIMARY KEY,
    items BLOB,
    quantity BLOB,
    actual_cost BLOB,
    net_cost BLOB
);
";

/// Create every table in an empty database and stamp the schema version.
pub fn create(connection: &Connection) -> Result<(), MatrixStoreError> {
    connection.execute_batch(CREATE_TABLES)?;
    connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Open a new build file for writing.
///
/// Durability is traded for speed: a failed build is discarded rather than recovered.
pub fn open_for_build(path: &Path) -> Result<Connection, MatrixStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(path, flags)?;
    connection.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF;")?;
    Ok(connection)
}

/// Open a published store file for reading.
pub fn open_read_only(path: &Path) -> Result<Connection, MatrixStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(path, flags)?;
    connection.execute_batch("PRAGMA query_only = ON;")?;
    check_version(&connection)?;
    Ok(connection)
}

/// Fail with [MatrixStoreError::SchemaMismatch] unless the file has the current schema version.
pub fn check_version(connection: &Connection) -> Result<(), MatrixStoreError> {
    let found: i64 = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found != SCHEMA_VERSION {
        return Err(MatrixStoreError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }
    Ok(())
}
