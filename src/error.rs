use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ItemId, Token};

/// Failures raised by a credential-store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vault {0} does not exist")]
    Missing(PathBuf),

    #[error("vault is unreadable: {0}")]
    Corrupt(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy shared by the worker, registry and views.
///
/// Only `BackendUnavailable` ever reaches the presentation layer as a failure;
/// the tree-query variants are absorbed by the worker into empty completions.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("item {0} not found")]
    NotFound(ItemId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential store unavailable at {location}: {source}")]
    BackendUnavailable {
        location: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("event for unregistered token {0}")]
    RaceOnUnregister(Token),

    #[error("database worker is no longer running")]
    WorkerUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, VaultError>;
