use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::model::ItemId;
use crate::store::{CredentialStore, StoreResult};
use crate::tree::{DatabaseTree, Record};

/// Operation persisted through a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Opened(PathBuf),
    Inserted(ItemId),
    Renamed { id: ItemId, title: String },
    Deleted(ItemId),
}

/// Store that serves a prebuilt tree and records what the worker persisted.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    seed: DatabaseTree,
    open_error: Option<String>,
    read_only: bool,
    journal: Arc<Mutex<Vec<StoreOp>>>,
}

impl MemoryStore {
    pub fn new(seed: DatabaseTree) -> Self {
        Self {
            seed,
            open_error: None,
            read_only: false,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every `open` fails with a corrupt-vault error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut store = Self::new(DatabaseTree::new(0, "Root"));
        store.open_error = Some(message.into());
        store
    }

    /// Mutations are refused, the tree still opens.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Shared handle to the journal; stays valid after the store moves to the worker.
    pub fn journal(&self) -> Arc<Mutex<Vec<StoreOp>>> {
        Arc::clone(&self.journal)
    }

    fn record(&self, op: StoreOp) -> StoreResult<()> {
        if self.read_only && !matches!(op, StoreOp::Opened(_)) {
            return Err(StoreError::Corrupt("vault is read-only".into()));
        }
        self.journal.lock().push(op);
        Ok(())
    }
}

impl CredentialStore for MemoryStore {
    fn open(&mut self, location: &Path) -> StoreResult<DatabaseTree> {
        if let Some(message) = &self.open_error {
            return Err(StoreError::Corrupt(message.clone()));
        }
        self.record(StoreOp::Opened(location.to_path_buf()))?;
        Ok(self.seed.clone())
    }

    fn insert(&mut self, record: &Record) -> StoreResult<()> {
        self.record(StoreOp::Inserted(record.id))
    }

    fn rename(&mut self, id: ItemId, title: &str, _subtitle: &str) -> StoreResult<()> {
        self.record(StoreOp::Renamed {
            id,
            title: title.to_string(),
        })
    }

    fn delete(&mut self, id: ItemId) -> StoreResult<()> {
        self.record(StoreOp::Deleted(id))
    }
}
