//! In-memory implementation of [`Repository`].
//!
//! [`MemoryRepository`] is a first-class backend for tests, ephemeral
//! sessions, and anywhere persistence isn't needed. Durable state is a
//! shared map of encoded entries behind an `Arc`; committing swaps the `Arc`,
//! so readers always see one complete snapshot.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, JsonCodec};
use crate::error::{RepositoryError, Result};
use crate::index::IndexFactory;
use crate::serialized::{
    decode_entries, decode_record, EntryStore, SerializedEntries, SerializedUnitOfWork,
};
use crate::traits::{EntryIter, Repository, UnitOfWork};

/// The process-resident durable map.
#[derive(Debug, Default)]
struct MemoryEntries {
    durable: RwLock<Arc<SerializedEntries>>,
}

impl MemoryEntries {
    fn snapshot(&self) -> Result<Arc<SerializedEntries>> {
        let durable = self
            .durable
            .read()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(Arc::clone(&durable))
    }
}

impl EntryStore for MemoryEntries {
    fn load(&self) -> Result<SerializedEntries> {
        Ok(self.snapshot()?.as_ref().clone())
    }

    fn save(&self, entries: &SerializedEntries) -> Result<()> {
        let replacement = Arc::new(entries.clone());
        let mut durable = self
            .durable
            .write()
            .map_err(|_| RepositoryError::LockPoisoned)?;
        *durable = replacement;
        Ok(())
    }
}

/// In-memory implementation of [`Repository`].
///
/// Only one unit of work is open at a time per instance; concurrent
/// [`Repository::start_work`] calls block until the previous one returns.
pub struct MemoryRepository<I, R, C = JsonCodec> {
    entries: MemoryEntries,
    gate: Mutex<()>,
    codec: C,
    factory: Box<dyn IndexFactory<I>>,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> MemoryRepository<I, R, JsonCodec>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Creates an empty repository using the JSON codec.
    pub fn new(factory: impl IndexFactory<I> + 'static) -> Self {
        Self::with_codec(factory, JsonCodec)
    }
}

impl<I, R, C> MemoryRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Creates an empty repository using `codec`.
    pub fn with_codec(factory: impl IndexFactory<I> + 'static, codec: C) -> Self {
        MemoryRepository {
            entries: MemoryEntries::default(),
            gate: Mutex::new(()),
            codec,
            factory: Box::new(factory),
            _record: PhantomData,
        }
    }

    /// Seeds the durable state with `items`, replacing anything stored.
    pub fn with_entries<'a>(self, items: impl IntoIterator<Item = (&'a I, &'a R)>) -> Result<Self>
    where
        I: 'a,
        R: 'a,
    {
        let mut seeded = SerializedEntries::new();
        for (index, record) in items {
            seeded.insert(self.codec.encode(index)?, self.codec.encode(record)?);
        }
        self.entries.save(&seeded)?;
        Ok(self)
    }

    fn encode_index(&self, index: &I) -> Result<String> {
        Ok(self.codec.encode(index)?)
    }
}

impl<I, R, C> Repository<I, R> for MemoryRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn get(&self, index: &I) -> Result<R> {
        let key = self.encode_index(index)?;
        match self.entries.snapshot()?.get(&key) {
            Some(raw) => decode_record(&self.codec, &key, raw),
            None => Err(RepositoryError::KeyNotFound { index: key }),
        }
    }

    fn try_get(&self, index: &I) -> Result<Option<R>> {
        let key = self.encode_index(index)?;
        self.entries
            .snapshot()?
            .get(&key)
            .map(|raw| decode_record(&self.codec, &key, raw))
            .transpose()
    }

    fn contains_key(&self, index: &I) -> Result<bool> {
        let key = self.encode_index(index)?;
        Ok(self.entries.snapshot()?.contains_key(&key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.snapshot()?.len())
    }

    fn entries(&self) -> Result<EntryIter<'_, I, R>> {
        let snapshot = Arc::unwrap_or_clone(self.entries.snapshot()?);
        Ok(decode_entries(&self.codec, snapshot))
    }

    fn start_work<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork<I, R>) -> std::result::Result<T, E>,
        E: From<RepositoryError>,
    {
        // The gate guards no data, so a panic in an earlier work closure
        // leaves nothing to repair.
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut unit: SerializedUnitOfWork<'_, I, R, C> =
            SerializedUnitOfWork::open(&self.entries, &self.codec, self.factory.as_ref())?;
        let outcome = work(&mut unit);
        unit.close(outcome.is_ok());
        outcome
    }
}
