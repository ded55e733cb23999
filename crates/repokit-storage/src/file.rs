//! Flat-file implementation of [`Repository`].
//!
//! [`FileRepository`] keeps its durable state in a single JSON document that
//! maps encoded indices to encoded records. Every commit rewrites the whole
//! document into a temporary file in the same directory and renames it over
//! the original, so readers see either the old or the new document, never a
//! torn write. A missing file is an empty repository.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::codec::{Codec, JsonCodec};
use crate::config::FileOptions;
use crate::error::{RepositoryError, Result};
use crate::index::IndexFactory;
use crate::serialized::{
    decode_entries, decode_record, EntryStore, SerializedEntries, SerializedUnitOfWork,
};
use crate::traits::{EntryIter, Repository, UnitOfWork};

/// Work gates shared by every repository in the process, keyed by file path.
fn path_gates() -> &'static DashMap<PathBuf, Arc<Mutex<()>>> {
    static GATES: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();
    GATES.get_or_init(DashMap::new)
}

/// Normalizes `path` so different spellings of one file share a gate.
///
/// The nearest existing ancestor of the file is canonicalized and the
/// missing components are appended, so the key does not change when parent
/// directories are created later.
fn gate_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    let Some(name) = absolute.file_name() else {
        return absolute;
    };

    let mut missing = vec![name.to_os_string()];
    let mut ancestor = absolute.parent();
    while let Some(dir) = ancestor {
        if let Ok(canonical) = dir.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |key, component| key.join(component));
        }
        match dir.file_name() {
            Some(component) => missing.push(component.to_os_string()),
            None => break,
        }
        ancestor = dir.parent();
    }
    absolute
}

fn gate_for(path: &Path) -> Arc<Mutex<()>> {
    Arc::clone(path_gates().entry(gate_key(path)).or_default().value())
}

/// The on-disk document.
#[derive(Debug)]
struct FileEntries {
    path: PathBuf,
    options: FileOptions,
}

impl FileEntries {
    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Creates the temp file a commit is written to.
    ///
    /// The rename carries the temp file's mode over the original, so it takes
    /// the existing file's permissions, or the umask default for a new file.
    fn temp_file(&self, directory: &Path) -> Result<NamedTempFile> {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                let temp = NamedTempFile::new_in(directory)?;
                temp.as_file().set_permissions(metadata.permissions())?;
                Ok(temp)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => new_temp_file(directory),
            Err(err) => Err(RepositoryError::Io(err)),
        }
    }
}

#[cfg(unix)]
fn new_temp_file(directory: &Path) -> Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;

    Ok(tempfile::Builder::new()
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(directory)?)
}

#[cfg(not(unix))]
fn new_temp_file(directory: &Path) -> Result<NamedTempFile> {
    Ok(NamedTempFile::new_in(directory)?)
}

impl EntryStore for FileEntries {
    fn load(&self) -> Result<SerializedEntries> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(SerializedEntries::new());
            }
            Err(err) => return Err(RepositoryError::Io(err)),
        };
        if contents.trim().is_empty() {
            return Ok(SerializedEntries::new());
        }
        serde_json::from_str(&contents).map_err(|err| RepositoryError::CorruptFile {
            path: self.path.clone(),
            reason: err.to_string(),
        })
    }

    fn save(&self, entries: &SerializedEntries) -> Result<()> {
        let contents = if self.options.pretty {
            serde_json::to_string_pretty(entries)?
        } else {
            serde_json::to_string(entries)?
        };

        let directory = self.directory();
        fs::create_dir_all(directory)?;

        // Write to a sibling temp file, then rename over the original.
        let mut temp = self.temp_file(directory)?;
        temp.write_all(contents.as_bytes())?;
        temp.write_all(b"\n")?;
        if self.options.sync {
            temp.as_file().sync_all()?;
        }
        temp.persist(&self.path)
            .map_err(|err| RepositoryError::Io(err.error))?;

        tracing::debug!("Saved {} entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Flat-file implementation of [`Repository`].
///
/// Units of work are serialized per file path: two `FileRepository` values
/// pointing at the same file share one gate, so their
/// [`Repository::start_work`] calls never interleave.
pub struct FileRepository<I, R, C = JsonCodec> {
    store: FileEntries,
    gate: Arc<Mutex<()>>,
    codec: C,
    factory: Box<dyn IndexFactory<I>>,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> FileRepository<I, R, JsonCodec>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Creates a repository stored at `path` with default options.
    pub fn new(path: impl AsRef<Path>, factory: impl IndexFactory<I> + 'static) -> Self {
        Self::with_options(path, factory, FileOptions::default())
    }

    /// Creates a repository stored at `path` with the given options.
    pub fn with_options(
        path: impl AsRef<Path>,
        factory: impl IndexFactory<I> + 'static,
        options: FileOptions,
    ) -> Self {
        Self::with_codec(path, factory, options, JsonCodec)
    }
}

impl<I, R, C> FileRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Creates a repository stored at `path` using `codec`.
    pub fn with_codec(
        path: impl AsRef<Path>,
        factory: impl IndexFactory<I> + 'static,
        options: FileOptions,
        codec: C,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        FileRepository {
            gate: gate_for(&path),
            store: FileEntries { path, options },
            codec,
            factory: Box::new(factory),
            _record: PhantomData,
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.store.path
    }

    fn encode_index(&self, index: &I) -> Result<String> {
        Ok(self.codec.encode(index)?)
    }
}

impl<I, R, C> Repository<I, R> for FileRepository<I, R, C>
where
    I: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
    C: Codec,
{
    fn get(&self, index: &I) -> Result<R> {
        let key = self.encode_index(index)?;
        match self.store.load()?.get(&key) {
            Some(raw) => decode_record(&self.codec, &key, raw),
            None => Err(RepositoryError::KeyNotFound { index: key }),
        }
    }

    fn try_get(&self, index: &I) -> Result<Option<R>> {
        let key = self.encode_index(index)?;
        self.store
            .load()?
            .get(&key)
            .map(|raw| decode_record(&self.codec, &key, raw))
            .transpose()
    }

    fn contains_key(&self, index: &I) -> Result<bool> {
        let key = self.encode_index(index)?;
        Ok(self.store.load()?.contains_key(&key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.store.load()?.len())
    }

    fn entries(&self) -> Result<EntryIter<'_, I, R>> {
        Ok(decode_entries(&self.codec, self.store.load()?))
    }

    fn start_work<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork<I, R>) -> std::result::Result<T, E>,
        E: From<RepositoryError>,
    {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("Starting work on {}", self.store.path.display());

        let mut unit: SerializedUnitOfWork<'_, I, R, C> =
            SerializedUnitOfWork::open(&self.store, &self.codec, self.factory.as_ref())?;
        let outcome = work(&mut unit);
        unit.close(outcome.is_ok());
        outcome
    }
}
