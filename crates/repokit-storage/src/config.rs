//! Backend options.
//!
//! Both option types default to the settings the backends were designed
//! around; the `with_*` setters override one field at a time.

use std::time::Duration;

/// Options for [`FileRepository`](crate::file::FileRepository).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    /// Indent the stored JSON so the file diffs cleanly.
    pub pretty: bool,
    /// `fsync` the temporary file before it replaces the original.
    pub sync: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            pretty: true,
            sync: true,
        }
    }
}

impl FileOptions {
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/// SQLite `synchronous` pragma levels usable with WAL journaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
}

impl Synchronous {
    pub(crate) fn as_pragma(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Options for [`SqliteRepository`](crate::sqlite::SqliteRepository).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteOptions {
    /// Name of the collection the repository reads and writes.
    pub collection: String,
    /// How long a connection waits for another writer's lock.
    pub busy_timeout: Duration,
    /// Durability level for committed transactions.
    pub synchronous: Synchronous,
}

/// Collection used when none is named.
pub const DEFAULT_COLLECTION: &str = "records";

impl Default for SqliteOptions {
    fn default() -> Self {
        SqliteOptions {
            collection: DEFAULT_COLLECTION.to_string(),
            busy_timeout: Duration::from_secs(30),
            synchronous: Synchronous::Normal,
        }
    }
}

impl SqliteOptions {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }
}
