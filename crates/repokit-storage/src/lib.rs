//! Typed key-value repositories with transactional units of work.
//!
//! Provides the [`Repository`] and [`UnitOfWork`] traits defining the storage
//! contract that all backends implement, plus three first-class backends:
//! [`MemoryRepository`], [`FileRepository`] and [`SqliteRepository`].
//!
//! # Architecture
//!
//! - **Read-only access** (`get`, `entries`, `len`, ...) runs against the
//!   backend's committed state.
//! - **Mutation** happens only inside [`Repository::start_work`], which hands
//!   the caller an isolated working set. Changes become durable on
//!   [`UnitOfWork::commit`]; everything else is discarded when the closure
//!   returns.
//!
//! ```no_run
//! use repokit_storage::{FileRepository, Repository, SequentialIndex};
//!
//! let repo: FileRepository<u64, String> =
//!     FileRepository::new("notes.json", SequentialIndex::new());
//! let index = repo.start_work(|work| -> repokit_storage::Result<u64> {
//!     let index = work.add(&"remember the milk".to_string())?;
//!     work.commit()?;
//!     Ok(index)
//! })?;
//! assert_eq!(repo.get(&index)?, "remember the milk");
//! # Ok::<(), repokit_storage::RepositoryError>(())
//! ```
//!
//! # Modules
//!
//! - [`error`]: RepositoryError enum with all failure modes
//! - [`codec`]: Codec trait and the default JsonCodec
//! - [`index`]: IndexFactory trait and the provided factories
//! - [`traits`]: Repository and UnitOfWork trait definitions
//! - [`config`]: FileOptions and SqliteOptions
//! - [`memory`]: MemoryRepository implementation
//! - [`file`]: FileRepository implementation
//! - [`schema`]: SQL migrations and connection setup
//! - [`sqlite`]: SqliteRepository implementation

pub mod codec;
pub mod config;
pub mod error;
pub mod file;
pub mod index;
pub mod memory;
pub mod schema;
mod serialized;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{FileOptions, SqliteOptions, Synchronous, DEFAULT_COLLECTION};
pub use error::{RepositoryError, Result};
pub use file::FileRepository;
pub use index::{IndexFactory, SequentialIndex, UuidIndex};
pub use memory::MemoryRepository;
pub use serialized::SerializedEntries;
pub use sqlite::SqliteRepository;
pub use traits::{EntryIter, Repository, UnitOfWork};
