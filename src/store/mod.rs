//! Credential-store collaborators.
//!
//! The worker never touches the persisted vault directly: it asks a store to
//! open a location into a [`DatabaseTree`] and to persist each mutation before
//! the in-memory tree is changed.

use std::path::Path;

use crate::error::StoreError;
use crate::model::ItemId;
use crate::tree::{DatabaseTree, Record};

pub mod memory;
mod schema;
pub mod sqlite;

pub use memory::{MemoryStore, StoreOp};
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait CredentialStore: Send {
    /// Loads the vault at `location`. Decryption, if any, happens behind this call.
    fn open(&mut self, location: &Path) -> StoreResult<DatabaseTree>;

    fn insert(&mut self, record: &Record) -> StoreResult<()>;

    fn rename(&mut self, id: ItemId, title: &str, subtitle: &str) -> StoreResult<()>;

    /// Deletes `id` together with everything below it.
    fn delete(&mut self, id: ItemId) -> StoreResult<()>;
}
