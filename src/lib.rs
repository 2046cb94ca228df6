pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod search;
pub mod store;
pub mod tree;
pub mod view;

pub use backend::{Backend, BackendNotice};
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{Result, StoreError, VaultError};
pub use model::{Item, ItemId, ItemKind, Listing, Token};
pub use view::{ViewKind, ViewProxy, ViewState};
