//! Request and event protocol between the foreground views and the database worker.
//!
//! Requests travel on one queue into the worker. Each attached view gets its own
//! event queue back, so the registry decides explicitly which views see an event.

use std::path::PathBuf;

use crossbeam_channel::Sender;

use crate::error::VaultError;
use crate::model::{Item, ItemId, ItemKind, Listing, Token};

/// Identifies one attached view proxy for the lifetime of the proxy.
pub type ProxyId = u64;

/// Proxy-local sequence number of a load or search request.
pub type RequestId = u64;

#[derive(Debug)]
pub enum Request {
    Open {
        location: PathBuf,
    },
    Close,
    Attach {
        proxy: ProxyId,
        events: Sender<ViewEvent>,
    },
    Detach {
        proxy: ProxyId,
    },
    LoadMasterGroups {
        proxy: ProxyId,
        request: RequestId,
    },
    LoadGroupContents {
        proxy: ProxyId,
        request: RequestId,
        group: ItemId,
    },
    Search {
        proxy: ProxyId,
        request: RequestId,
        query: String,
        root: Option<ItemId>,
    },
    Unregister {
        proxy: ProxyId,
        token: Token,
    },
    Add {
        parent: ItemId,
        kind: ItemKind,
        title: String,
        subtitle: String,
    },
    /// A `None` subtitle keeps the one the item already has.
    Rename {
        id: ItemId,
        title: String,
        subtitle: Option<String>,
    },
    Delete {
        id: ItemId,
    },
    Registrations {
        reply: Sender<Vec<RegistrationInfo>>,
    },
    Ping {
        reply: Sender<()>,
    },
    Shutdown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::Close => "close",
            Request::Attach { .. } => "attach",
            Request::Detach { .. } => "detach",
            Request::LoadMasterGroups { .. } => "load_master_groups",
            Request::LoadGroupContents { .. } => "load_group_contents",
            Request::Search { .. } => "search",
            Request::Unregister { .. } => "unregister",
            Request::Add { .. } => "add",
            Request::Rename { .. } => "rename",
            Request::Delete { .. } => "delete",
            Request::Registrations { .. } => "registrations",
            Request::Ping { .. } => "ping",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Events delivered to a single view proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Acknowledges `request` and names the token its results will carry.
    Registered { request: RequestId, token: Token },
    Inserted { token: Token, item: Item },
    Updated {
        token: Token,
        id: ItemId,
        title: String,
        subtitle: String,
    },
    Deleted { token: Token, id: ItemId },
    Completed {
        token: Token,
        listing: Listing,
        count: usize,
    },
    /// The database was closed or replaced; the view must drop its rows.
    Invalidated { token: Token },
}

impl ViewEvent {
    pub fn token(&self) -> Token {
        match self {
            ViewEvent::Registered { token, .. }
            | ViewEvent::Inserted { token, .. }
            | ViewEvent::Updated { token, .. }
            | ViewEvent::Deleted { token, .. }
            | ViewEvent::Completed { token, .. }
            | ViewEvent::Invalidated { token } => *token,
        }
    }
}

/// Database-wide notices for the owner of the backend, outside any view stream.
#[derive(Debug)]
pub enum BackendNotice {
    Opened {
        location: PathBuf,
        groups: usize,
        entries: usize,
    },
    OpenFailed {
        error: VaultError,
    },
    Closed,
    ItemAdded {
        parent: ItemId,
        item: Item,
    },
    MutationFailed {
        error: VaultError,
    },
}

/// Snapshot row of the registration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub token: Token,
    pub proxy: ProxyId,
    pub listing: Listing,
}
