#![deny(missing_docs)]

//! The on-disk storage of cppan: the directory layout under the storage
//! root, per-package stamp files, advisory cross-process locks and the
//! [`AccessTable`] that decides whether generated files are still current.

mod access_table;
mod directories;
mod lock;
mod stamp;

pub use access_table::AccessTable;
pub use directories::Directories;
pub use lock::FileLock;
pub use stamp::{read_stamp, write_stamp};

/// An error of the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Persisting or loading access-table state failed.
    #[error(transparent)]
    Database(#[from] cppan_database::DatabaseError),

    /// A lock file could not be opened or locked.
    #[error("{0}")]
    Lock(String, #[source] std::io::Error),
}
