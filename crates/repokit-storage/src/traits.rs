//! The [`Repository`] and [`UnitOfWork`] contracts shared by every backend.
//!
//! Two-layer API design:
//! - **Read-only façade** methods on [`Repository`] run directly against the
//!   backend's durable state. Every call re-reads the backend, so it observes
//!   all committed work and none in flight.
//! - **Unit of work**: [`Repository::start_work`] is the single mutation entry
//!   point. It hands the caller a `&mut dyn UnitOfWork` over an isolated
//!   working set; nothing becomes durable until [`UnitOfWork::commit`].
//!
//! All backends (MemoryRepository, FileRepository, SqliteRepository) implement
//! both traits with identical semantics, so they are swappable without
//! touching call sites.

use crate::error::{RepositoryError, Result};

/// Lazily decoded `(index, record)` pairs.
pub type EntryIter<'a, I, R> = Box<dyn Iterator<Item = Result<(I, R)>> + 'a>;

/// An isolated, mutable working set over one snapshot of a backend.
///
/// The trait is object safe; work closures receive `&mut dyn UnitOfWork<I, R>`.
pub trait UnitOfWork<I, R> {
    /// Returns the record stored at `index`.
    ///
    /// Fails with [`RepositoryError::NotFound`] if the index is absent.
    fn get(&self, index: &I) -> Result<R>;

    /// Replaces the record at an existing `index`.
    ///
    /// Fails with [`RepositoryError::NotFound`] if the index is absent;
    /// [`UnitOfWork::add`] is the only way to create an entry.
    fn set(&mut self, index: &I, record: &R) -> Result<()>;

    /// Inserts `record` under a fresh index from the index factory.
    ///
    /// The factory is invoked exactly once. If it yields an index already
    /// present, nothing is inserted and [`RepositoryError::FactoryExhausted`]
    /// is returned.
    fn add(&mut self, record: &R) -> Result<I>;

    /// Removes the entry at `index`.
    ///
    /// Fails with [`RepositoryError::NotFound`] if the index is absent, leaving
    /// the working set unchanged.
    fn delete(&mut self, index: &I) -> Result<()>;

    /// Returns true if `index` is present in the working set.
    fn contains(&self, index: &I) -> Result<bool>;

    /// Returns the record at `index`, or `None` if absent.
    fn try_get(&self, index: &I) -> Result<Option<R>>;

    /// Number of entries in the working set.
    fn len(&self) -> Result<usize>;

    /// Returns true if the working set holds no entries.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Enumerates the working set, including uncommitted changes.
    ///
    /// Each call starts a new pass over the current state.
    fn entries(&self) -> Result<EntryIter<'_, I, R>>;

    /// Indices of the working set, derived from [`UnitOfWork::entries`].
    fn keys<'a>(&'a self) -> Result<Box<dyn Iterator<Item = Result<I>> + 'a>>
    where
        I: 'a,
        R: 'a,
    {
        Ok(Box::new(self.entries()?.map(|entry| entry.map(|(index, _)| index))))
    }

    /// Records of the working set, derived from [`UnitOfWork::entries`].
    fn values<'a>(&'a self) -> Result<Box<dyn Iterator<Item = Result<R>> + 'a>>
    where
        I: 'a,
        R: 'a,
    {
        Ok(Box::new(self.entries()?.map(|entry| entry.map(|(_, record)| record))))
    }

    /// Durably persists the whole working set as one atomic operation.
    ///
    /// May be called repeatedly; changes made after a commit are again
    /// subject to rollback.
    fn commit(&mut self) -> Result<()>;

    /// Discards every change since the last commit (or since the unit of work
    /// was opened), re-seeding from the last committed state.
    fn rollback(&mut self) -> Result<()>;
}

/// Backend-facing façade over a typed key-value collection.
pub trait Repository<I, R> {
    /// Returns the durable record at `index`.
    ///
    /// Fails with [`RepositoryError::KeyNotFound`] if the index is absent.
    fn get(&self, index: &I) -> Result<R>;

    /// Returns the durable record at `index`, or `None` if absent.
    fn try_get(&self, index: &I) -> Result<Option<R>>;

    /// Returns true if `index` is durably stored.
    fn contains_key(&self, index: &I) -> Result<bool>;

    /// Number of durably stored entries.
    fn len(&self) -> Result<usize>;

    /// Returns true if nothing is durably stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Enumerates the durable state as of this call.
    fn entries(&self) -> Result<EntryIter<'_, I, R>>;

    /// Durable indices, derived from [`Repository::entries`].
    fn keys<'a>(&'a self) -> Result<Box<dyn Iterator<Item = Result<I>> + 'a>>
    where
        I: 'a,
        R: 'a,
    {
        Ok(Box::new(self.entries()?.map(|entry| entry.map(|(index, _)| index))))
    }

    /// Durable records, derived from [`Repository::entries`].
    fn values<'a>(&'a self) -> Result<Box<dyn Iterator<Item = Result<R>> + 'a>>
    where
        I: 'a,
        R: 'a,
    {
        Ok(Box::new(self.entries()?.map(|entry| entry.map(|(_, record)| record))))
    }

    /// Collects the whole durable state.
    fn all_items(&self) -> Result<Vec<(I, R)>> {
        self.entries()?.collect()
    }

    /// Opens a unit of work, runs `work` against it and tears it down.
    ///
    /// There is no implicit commit: only [`UnitOfWork::commit`] calls made
    /// inside `work` are durable. When `work` returns (with `Ok` or `Err`),
    /// anything staged but uncommitted is discarded. Memory and file backends
    /// serialize concurrent calls; the SQLite backend relies on the database's
    /// own write lock.
    fn start_work<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork<I, R>) -> std::result::Result<T, E>,
        E: From<RepositoryError>;
}
