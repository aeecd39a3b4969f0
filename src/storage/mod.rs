//! Staged persistence.
//!
//! Every mutable store in the node exposes the same four operations:
//! - `save` writes the changes made since the last commit to disk atomically
//! - `commit` makes the current contents the new baseline
//! - `discard` restores the last baseline in memory
//! - `clear` stages the removal of everything
//!
//! Stores run purely in memory or on top of a `sled::Tree`.

mod staged;

pub use staged::{StagedMap, StagedVec};

use std::path::Path;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    /// Value could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Stored keys are not a dense sequence
    #[error("corrupt store {tree}: {reason}")]
    Corrupt {
        /// Tree name
        tree: String,
        /// What is wrong
        reason: String,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Save/commit/discard/clear discipline shared by all stores
pub trait Transactional {
    /// Persist the staged changes
    ///
    /// # Errors
    /// Returns error if the backend write fails; the staged changes stay
    /// in memory and can still be discarded
    fn save(&mut self) -> StorageResult<()>;

    /// Accept the staged changes as the new baseline
    fn commit(&mut self);

    /// Drop the staged changes
    fn discard(&mut self);

    /// Stage removal of every entry
    fn clear(&mut self);
}

/// Open (or create) the node database
///
/// # Errors
/// Returns error if the database cannot be opened
pub fn open_database(path: &Path) -> StorageResult<sled::Db> {
    Ok(sled::open(path)?)
}

/// Open a throwaway database that is deleted on drop
///
/// # Errors
/// Returns error if the database cannot be created
pub fn open_temporary() -> StorageResult<sled::Db> {
    Ok(sled::Config::new().temporary(true).open()?)
}
