//! Unit of work over a map of encoded entries, shared by the memory and file
//! backends.
//!
//! Both backends persist the same shape, [`SerializedEntries`]: encoded index
//! to encoded record, in insertion order. They differ only in where that map
//! lives, which is abstracted by [`EntryStore`]. [`SerializedUnitOfWork`]
//! owns a private copy of the map for the lifetime of one `start_work` call
//! and hands it back to the store on every commit.

use std::marker::PhantomData;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{RepositoryError, Result};
use crate::index::IndexFactory;
use crate::traits::{EntryIter, UnitOfWork};

/// Encoded index to encoded record, in insertion order.
pub type SerializedEntries = IndexMap<String, String>;

/// Where a backend keeps its durable [`SerializedEntries`].
pub(crate) trait EntryStore {
    /// Reads the last committed entries.
    fn load(&self) -> Result<SerializedEntries>;

    /// Atomically replaces the durable entries with `entries`.
    fn save(&self, entries: &SerializedEntries) -> Result<()>;
}

/// Decodes one stored record, reporting failures as corruption.
pub(crate) fn decode_record<R, C>(codec: &C, encoded_index: &str, raw: &str) -> Result<R>
where
    R: DeserializeOwned,
    C: Codec,
{
    codec
        .decode(raw)
        .map_err(|err| RepositoryError::CorruptRecord {
            index: encoded_index.to_string(),
            reason: err.to_string(),
        })
}

/// Decodes one stored `(index, record)` pair.
pub(crate) fn decode_entry<I, R, C>(codec: &C, encoded_index: &str, raw: &str) -> Result<(I, R)>
where
    I: DeserializeOwned,
    R: DeserializeOwned,
    C: Codec,
{
    let index = codec
        .decode(encoded_index)
        .map_err(|err| RepositoryError::CorruptRecord {
            index: encoded_index.to_string(),
            reason: format!("undecodable index: {}", err),
        })?;
    let record = decode_record(codec, encoded_index, raw)?;
    Ok((index, record))
}

/// Lazily decodes an owned entry map.
pub(crate) fn decode_entries<'a, I, R, C>(
    codec: &'a C,
    entries: SerializedEntries,
) -> EntryIter<'a, I, R>
where
    I: DeserializeOwned + 'a,
    R: DeserializeOwned + 'a,
    C: Codec,
{
    Box::new(
        entries
            .into_iter()
            .map(move |(index, raw)| decode_entry(codec, &index, &raw)),
    )
}

/// A working set of encoded entries seeded from an [`EntryStore`].
pub(crate) struct SerializedUnitOfWork<'s, I, R, C> {
    entries: SerializedEntries,
    store: &'s dyn EntryStore,
    codec: &'s C,
    factory: &'s dyn IndexFactory<I>,
    commits: usize,
    _record: PhantomData<fn() -> R>,
}

impl<'s, I, R, C> SerializedUnitOfWork<'s, I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Opens a unit of work seeded with the store's committed entries.
    pub(crate) fn open(
        store: &'s dyn EntryStore,
        codec: &'s C,
        factory: &'s dyn IndexFactory<I>,
    ) -> Result<Self> {
        let entries = store.load()?;
        tracing::debug!("Opened unit of work over {} entries", entries.len());
        Ok(SerializedUnitOfWork {
            entries,
            store,
            codec,
            factory,
            commits: 0,
            _record: PhantomData,
        })
    }

    /// Ends the unit of work, dropping any uncommitted changes.
    pub(crate) fn close(self, succeeded: bool) {
        if succeeded {
            tracing::debug!("Closed unit of work after {} commit(s)", self.commits);
        } else {
            tracing::warn!(
                "Work failed after {} commit(s); discarding uncommitted changes",
                self.commits
            );
        }
    }

    fn encode_index(&self, index: &I) -> Result<String> {
        Ok(self.codec.encode(index)?)
    }
}

impl<'s, I, R, C> UnitOfWork<I, R> for SerializedUnitOfWork<'s, I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn get(&self, index: &I) -> Result<R> {
        let key = self.encode_index(index)?;
        match self.entries.get(&key) {
            Some(raw) => decode_record(self.codec, &key, raw),
            None => Err(RepositoryError::NotFound { index: key }),
        }
    }

    fn set(&mut self, index: &I, record: &R) -> Result<()> {
        let key = self.encode_index(index)?;
        let encoded = self.codec.encode(record)?;
        match self.entries.get_mut(&key) {
            Some(slot) => {
                *slot = encoded;
                Ok(())
            }
            None => Err(RepositoryError::NotFound { index: key }),
        }
    }

    fn add(&mut self, record: &R) -> Result<I> {
        let index = self.factory.next_index()?;
        let key = self.encode_index(&index)?;
        if self.entries.contains_key(&key) {
            return Err(RepositoryError::FactoryExhausted {
                reason: format!("index {} is already in use", key),
            });
        }
        let encoded = self.codec.encode(record)?;
        self.entries.insert(key, encoded);
        Ok(index)
    }

    fn delete(&mut self, index: &I) -> Result<()> {
        let key = self.encode_index(index)?;
        match self.entries.shift_remove(&key) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound { index: key }),
        }
    }

    fn contains(&self, index: &I) -> Result<bool> {
        let key = self.encode_index(index)?;
        Ok(self.entries.contains_key(&key))
    }

    fn try_get(&self, index: &I) -> Result<Option<R>> {
        let key = self.encode_index(index)?;
        self.entries
            .get(&key)
            .map(|raw| decode_record(self.codec, &key, raw))
            .transpose()
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn entries(&self) -> Result<EntryIter<'_, I, R>> {
        let codec = self.codec;
        Ok(Box::new(
            self.entries
                .iter()
                .map(move |(index, raw)| decode_entry(codec, index, raw)),
        ))
    }

    fn commit(&mut self) -> Result<()> {
        self.store.save(&self.entries)?;
        self.commits += 1;
        tracing::debug!("Committed {} entries", self.entries.len());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.entries = self.store.load()?;
        tracing::debug!("Rolled back to {} committed entries", self.entries.len());
        Ok(())
    }
}
