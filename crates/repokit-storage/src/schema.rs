//! SQL schema and connection setup for the SQLite backend.
//!
//! Uses `rusqlite_migration` to manage schema migrations via SQLite's
//! `user_version` pragma. Migrations are embedded at compile time via
//! `include_str!`.

use std::path::Path;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::config::SqliteOptions;
use crate::error::{RepositoryError, Result};

/// All schema migrations, applied in order via `user_version` tracking.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(include_str!("migrations/001_initial_schema.sql")),
        // Future migrations added here as new M::up(...) entries.
    ])
}

/// Opens (or creates) the database at `path` and applies pending migrations.
pub fn open_database(path: &Path, options: &SqliteOptions) -> Result<Connection> {
    let mut conn = open_connection(path, options)?;
    // WAL is persistent, so setting it once here covers later connections.
    // Readers then see the last committed state while a writer is open.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    migrations()
        .to_latest(&mut conn)
        .map_err(|e| RepositoryError::Migration(e.to_string()))?;
    Ok(conn)
}

/// Opens a connection to an already migrated database.
pub fn open_connection(path: &Path, options: &SqliteOptions) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, options)?;
    Ok(conn)
}

/// Applies per-connection pragmas.
fn configure(conn: &Connection, options: &SqliteOptions) -> Result<()> {
    // Wait for competing writers instead of failing with SQLITE_BUSY.
    conn.busy_timeout(options.busy_timeout)?;
    conn.pragma_update(None, "synchronous", options.synchronous.as_pragma())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db");
        let options = SqliteOptions::default();

        open_database(&path, &options).unwrap();
        let conn = open_database(&path, &options).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
