//! SQLite implementation of [`Repository`].
//!
//! [`SqliteRepository`] stores one row per record in the `documents` table,
//! scoped to a named collection so several repositories can share a database
//! file. The index column holds the codec-encoded index; the record is written
//! as a JSON column by serde_json directly, without the codec.
//!
//! Atomicity is delegated to SQLite. Each unit of work runs on its own
//! connection inside a `BEGIN IMMEDIATE` transaction. A commit or rollback
//! ends that transaction; the next write begins a new one, so work after a
//! commit is again subject to rollback. Every read-only call opens its own connection and
//! sees only committed data.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, JsonCodec};
use crate::config::SqliteOptions;
use crate::error::{RepositoryError, Result};
use crate::index::IndexFactory;
use crate::traits::{EntryIter, Repository, UnitOfWork};

// -----------------------------------------------------------------------
// Row helpers shared by the repository and its units of work
// -----------------------------------------------------------------------

fn fetch_value(conn: &Connection, collection: &str, id: &str) -> Result<Option<String>> {
    let value = conn
        .prepare_cached("SELECT value FROM documents WHERE collection = ?1 AND id = ?2")?
        .query_row(params![collection, id], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn count_rows(conn: &Connection, collection: &str) -> Result<usize> {
    let count: i64 = conn
        .prepare_cached("SELECT COUNT(*) FROM documents WHERE collection = ?1")?
        .query_row(params![collection], |row| row.get(0))?;
    Ok(count as usize)
}

fn fetch_rows(conn: &Connection, collection: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, value FROM documents WHERE collection = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![collection], |row| {
        let id: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok((id, value))
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn decode_value<R: DeserializeOwned>(id: &str, value: &str) -> Result<R> {
    serde_json::from_str(value).map_err(|err| RepositoryError::CorruptRecord {
        index: id.to_string(),
        reason: err.to_string(),
    })
}

fn decode_row<I, R, C>(codec: &C, id: &str, value: &str) -> Result<(I, R)>
where
    I: DeserializeOwned,
    R: DeserializeOwned,
    C: Codec,
{
    let index = codec
        .decode(id)
        .map_err(|err| RepositoryError::CorruptRecord {
            index: id.to_string(),
            reason: format!("undecodable index: {}", err),
        })?;
    Ok((index, decode_value(id, value)?))
}

fn decode_rows<'a, I, R, C>(codec: &'a C, rows: Vec<(String, String)>) -> EntryIter<'a, I, R>
where
    I: DeserializeOwned + 'a,
    R: DeserializeOwned + 'a,
    C: Codec,
{
    Box::new(
        rows.into_iter()
            .map(move |(id, value)| decode_row(codec, &id, &value)),
    )
}

// -----------------------------------------------------------------------
// Repository
// -----------------------------------------------------------------------

/// SQLite-backed implementation of [`Repository`].
///
/// The repository holds no open connection, so it is `Send + Sync` and may be
/// shared across threads; isolation between concurrent units of work is
/// SQLite's own.
pub struct SqliteRepository<I, R, C = JsonCodec> {
    path: PathBuf,
    options: SqliteOptions,
    codec: C,
    factory: Box<dyn IndexFactory<I>>,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> SqliteRepository<I, R, JsonCodec>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Opens (or creates) the database at `path`, using the default collection.
    pub fn new(path: impl AsRef<Path>, factory: impl IndexFactory<I> + 'static) -> Result<Self> {
        Self::with_options(path, factory, SqliteOptions::default())
    }

    /// Opens (or creates) the database at `path` with the given options.
    pub fn with_options(
        path: impl AsRef<Path>,
        factory: impl IndexFactory<I> + 'static,
        options: SqliteOptions,
    ) -> Result<Self> {
        Self::with_codec(path, factory, options, JsonCodec)
    }
}

impl<I, R, C> SqliteRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Opens (or creates) the database at `path`, encoding indices with `codec`.
    ///
    /// Pending schema migrations are applied here, once.
    pub fn with_codec(
        path: impl AsRef<Path>,
        factory: impl IndexFactory<I> + 'static,
        options: SqliteOptions,
        codec: C,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        crate::schema::open_database(&path, &options)?;
        tracing::debug!(
            "Opened SQLite repository {} (collection {})",
            path.display(),
            options.collection
        );
        Ok(SqliteRepository {
            path,
            options,
            codec,
            factory: Box::new(factory),
            _record: PhantomData,
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the collection this repository reads and writes.
    pub fn collection(&self) -> &str {
        &self.options.collection
    }

    /// Names of every non-empty collection in the database file.
    pub fn collections(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn connect(&self) -> Result<Connection> {
        crate::schema::open_connection(&self.path, &self.options)
    }

    fn encode_index(&self, index: &I) -> Result<String> {
        Ok(self.codec.encode(index)?)
    }
}

impl<I, R, C> Repository<I, R> for SqliteRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn get(&self, index: &I) -> Result<R> {
        let id = self.encode_index(index)?;
        match fetch_value(&self.connect()?, self.collection(), &id)? {
            Some(value) => decode_value(&id, &value),
            None => Err(RepositoryError::KeyNotFound { index: id }),
        }
    }

    fn try_get(&self, index: &I) -> Result<Option<R>> {
        let id = self.encode_index(index)?;
        fetch_value(&self.connect()?, self.collection(), &id)?
            .map(|value| decode_value(&id, &value))
            .transpose()
    }

    fn contains_key(&self, index: &I) -> Result<bool> {
        let id = self.encode_index(index)?;
        Ok(fetch_value(&self.connect()?, self.collection(), &id)?.is_some())
    }

    fn len(&self) -> Result<usize> {
        count_rows(&self.connect()?, self.collection())
    }

    fn entries(&self) -> Result<EntryIter<'_, I, R>> {
        let rows = fetch_rows(&self.connect()?, self.collection())?;
        Ok(decode_rows(&self.codec, rows))
    }

    fn start_work<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork<I, R>) -> std::result::Result<T, E>,
        E: From<RepositoryError>,
    {
        let conn = self.connect()?;
        let mut unit: SqliteUnitOfWork<'_, I, R, C> = SqliteUnitOfWork::open(
            &conn,
            self.collection(),
            &self.codec,
            self.factory.as_ref(),
        )?;
        let outcome = work(&mut unit);
        unit.close(outcome.is_ok());
        outcome
    }
}

// -----------------------------------------------------------------------
// Unit of work
// -----------------------------------------------------------------------

/// A unit of work over one open SQLite transaction.
///
/// All statements run on `conn`, so reads observe the transaction's own
/// uncommitted writes. Dropping the transaction rolls it back.
struct SqliteUnitOfWork<'c, I, R, C> {
    conn: &'c Connection,
    tx: Option<Transaction<'c>>,
    collection: &'c str,
    codec: &'c C,
    factory: &'c dyn IndexFactory<I>,
    commits: usize,
    _record: PhantomData<fn() -> R>,
}

impl<'c, I, R, C> SqliteUnitOfWork<'c, I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn open(
        conn: &'c Connection,
        collection: &'c str,
        codec: &'c C,
        factory: &'c dyn IndexFactory<I>,
    ) -> Result<Self> {
        let tx = Self::begin(conn)?;
        tracing::debug!("Began transaction on collection {}", collection);
        Ok(SqliteUnitOfWork {
            conn,
            tx: Some(tx),
            collection,
            codec,
            factory,
            commits: 0,
            _record: PhantomData,
        })
    }

    /// Takes the write lock up front so concurrent writers queue on the
    /// busy timeout instead of failing on lock upgrade.
    fn begin(conn: &'c Connection) -> Result<Transaction<'c>> {
        Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
    }

    /// Makes sure a transaction is open before a write.
    ///
    /// Commit and rollback leave no transaction behind, so a busy database
    /// surfaces here, on the next write, and never from an already durable
    /// commit.
    fn ensure_open(&mut self) -> Result<()> {
        if self.tx.is_none() {
            self.tx = Some(Self::begin(self.conn)?);
        }
        Ok(())
    }

    /// Ends the unit of work, rolling back anything uncommitted.
    fn close(mut self, succeeded: bool) {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = tx.rollback() {
                tracing::warn!("Failed to roll back open transaction: {}", err);
            }
        }
        if succeeded {
            tracing::debug!(
                "Closed unit of work on collection {} after {} commit(s)",
                self.collection,
                self.commits
            );
        } else {
            tracing::warn!(
                "Work on collection {} failed after {} commit(s); rolled back uncommitted changes",
                self.collection,
                self.commits
            );
        }
    }

    fn encode_index(&self, index: &I) -> Result<String> {
        Ok(self.codec.encode(index)?)
    }
}

impl<'c, I, R, C> UnitOfWork<I, R> for SqliteUnitOfWork<'c, I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn get(&self, index: &I) -> Result<R> {
        let id = self.encode_index(index)?;
        match fetch_value(self.conn, self.collection, &id)? {
            Some(value) => decode_value(&id, &value),
            None => Err(RepositoryError::NotFound { index: id }),
        }
    }

    fn set(&mut self, index: &I, record: &R) -> Result<()> {
        self.ensure_open()?;
        let id = self.encode_index(index)?;
        let value = serde_json::to_string(record)?;
        let rows = self
            .conn
            .prepare_cached("UPDATE documents SET value = ?3 WHERE collection = ?1 AND id = ?2")?
            .execute(params![self.collection, id, value])?;
        if rows == 0 {
            return Err(RepositoryError::NotFound { index: id });
        }
        Ok(())
    }

    fn add(&mut self, record: &R) -> Result<I> {
        self.ensure_open()?;
        let index = self.factory.next_index()?;
        let id = self.encode_index(&index)?;
        if fetch_value(self.conn, self.collection, &id)?.is_some() {
            return Err(RepositoryError::FactoryExhausted {
                reason: format!("index {} is already in use", id),
            });
        }
        let value = serde_json::to_string(record)?;
        self.conn
            .prepare_cached("INSERT INTO documents (collection, id, value) VALUES (?1, ?2, ?3)")?
            .execute(params![self.collection, id, value])?;
        Ok(index)
    }

    fn delete(&mut self, index: &I) -> Result<()> {
        self.ensure_open()?;
        let id = self.encode_index(index)?;
        let rows = self
            .conn
            .prepare_cached("DELETE FROM documents WHERE collection = ?1 AND id = ?2")?
            .execute(params![self.collection, id])?;
        if rows == 0 {
            return Err(RepositoryError::NotFound { index: id });
        }
        Ok(())
    }

    fn contains(&self, index: &I) -> Result<bool> {
        let id = self.encode_index(index)?;
        Ok(fetch_value(self.conn, self.collection, &id)?.is_some())
    }

    fn try_get(&self, index: &I) -> Result<Option<R>> {
        let id = self.encode_index(index)?;
        fetch_value(self.conn, self.collection, &id)?
            .map(|value| decode_value(&id, &value))
            .transpose()
    }

    fn len(&self) -> Result<usize> {
        count_rows(self.conn, self.collection)
    }

    fn entries(&self) -> Result<EntryIter<'_, I, R>> {
        let rows = fetch_rows(self.conn, self.collection)?;
        Ok(decode_rows(self.codec, rows))
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit()?;
        }
        self.commits += 1;
        tracing::debug!("Committed transaction on collection {}", self.collection);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback()?;
        }
        tracing::debug!("Rolled back transaction on collection {}", self.collection);
        Ok(())
    }
}
