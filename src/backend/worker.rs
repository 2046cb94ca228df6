use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::backend::messages::{BackendNotice, ProxyId, Request, RequestId, ViewEvent};
use crate::backend::registry::ViewRegistry;
use crate::config::SearchOptions;
use crate::error::VaultError;
use crate::model::{Item, ItemId, ItemKind, Listing, Token};
use crate::search::SearchQuery;
use crate::store::CredentialStore;
use crate::tree::{DatabaseTree, Record};

/// Owns the loaded tree and the registration table. Runs on the worker thread only.
pub struct DatabaseWorker {
    store: Box<dyn CredentialStore>,
    tree: Option<DatabaseTree>,
    location: Option<PathBuf>,
    registry: ViewRegistry,
    search: SearchOptions,
    notices: Sender<BackendNotice>,
}

impl DatabaseWorker {
    pub fn new(
        store: Box<dyn CredentialStore>,
        search: SearchOptions,
        notices: Sender<BackendNotice>,
    ) -> Self {
        Self {
            store,
            tree: None,
            location: None,
            registry: ViewRegistry::new(),
            search,
            notices,
        }
    }

    pub fn run(mut self, requests: Receiver<Request>) {
        tracing::debug!("database worker started");
        while let Ok(request) = requests.recv() {
            if !self.handle(request) {
                break;
            }
        }
        self.registry.invalidate_all();
        tracing::debug!("database worker stopped");
    }

    /// Processes one request. Returns `false` once the worker should stop.
    pub fn handle(&mut self, request: Request) -> bool {
        let span = tracing::debug_span!("worker_request", kind = request.name());
        let _guard = span.enter();

        match request {
            Request::Open { location } => self.open(location),
            Request::Close => self.close(),
            Request::Attach { proxy, events } => self.registry.attach(proxy, events),
            Request::Detach { proxy } => self.registry.detach(proxy),
            Request::LoadMasterGroups { proxy, request } => self.load_master_groups(proxy, request),
            Request::LoadGroupContents {
                proxy,
                request,
                group,
            } => self.load_group_contents(proxy, request, group),
            Request::Search {
                proxy,
                request,
                query,
                root,
            } => self.search(proxy, request, query, root),
            Request::Unregister { proxy, token } => {
                if self.registry.unregister(token, proxy) {
                    tracing::debug!(%token, proxy, "view unregistered");
                }
            }
            Request::Add {
                parent,
                kind,
                title,
                subtitle,
            } => self.apply_add(parent, kind, &title, &subtitle),
            Request::Rename {
                id,
                title,
                subtitle,
            } => self.apply_rename(id, &title, subtitle),
            Request::Delete { id } => self.apply_delete(id),
            Request::Registrations { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Request::Ping { reply } => {
                let _ = reply.send(());
            }
            Request::Shutdown => return false,
        }
        true
    }

    pub fn tree(&self) -> Option<&DatabaseTree> {
        self.tree.as_ref()
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    fn open(&mut self, location: PathBuf) {
        match self.store.open(&location) {
            Ok(tree) => {
                let stale = self.registry.invalidate_all();
                if stale > 0 {
                    tracing::debug!(stale, "invalidated views of the previous database");
                }
                let (groups, entries) = (tree.group_count(), tree.entry_count());
                tracing::info!(location = %location.display(), groups, entries, "database opened");
                self.tree = Some(tree);
                self.location = Some(location.clone());
                self.notify(BackendNotice::Opened {
                    location,
                    groups,
                    entries,
                });
            }
            Err(source) => {
                let error = VaultError::BackendUnavailable { location, source };
                tracing::warn!(%error, "failed to open credential store");
                self.notify(BackendNotice::OpenFailed { error });
            }
        }
    }

    fn close(&mut self) {
        self.registry.invalidate_all();
        if self.tree.take().is_some() {
            tracing::info!(location = ?self.location, "database closed");
        }
        self.location = None;
        self.notify(BackendNotice::Closed);
    }

    fn load_master_groups(&mut self, proxy: ProxyId, request: RequestId) {
        let token = self.registry.allocate_token();
        if !self.subscribe(proxy, request, token, Listing::MasterGroups) {
            return;
        }
        let items = match &self.tree {
            Some(tree) => to_items(tree.master_groups()),
            None => {
                absorb(VaultError::InvalidRequest("no database is open".into()));
                Vec::new()
            }
        };
        self.stream(token, items);
    }

    fn load_group_contents(&mut self, proxy: ProxyId, request: RequestId, group: ItemId) {
        let token = self.registry.allocate_token();
        if !self.subscribe(proxy, request, token, Listing::GroupContents(group)) {
            return;
        }
        let items = match &self.tree {
            Some(tree) => tree.children_of(group).map(to_items).unwrap_or_else(|err| {
                absorb(err);
                Vec::new()
            }),
            None => {
                absorb(VaultError::InvalidRequest("no database is open".into()));
                Vec::new()
            }
        };
        self.stream(token, items);
    }

    fn search(&mut self, proxy: ProxyId, request: RequestId, text: String, root: Option<ItemId>) {
        let listing = Listing::Search {
            query: text.clone(),
            root,
        };
        if !self.subscribe(proxy, request, Token::Search, listing) {
            return;
        }
        let items = match (&self.tree, SearchQuery::parse(&text, &self.search)) {
            (Some(tree), Some(query)) => {
                tree.search(&query, root).map(to_items).unwrap_or_else(|err| {
                    absorb(err);
                    Vec::new()
                })
            }
            (None, _) => {
                absorb(VaultError::InvalidRequest("no database is open".into()));
                Vec::new()
            }
            (_, None) => {
                absorb(VaultError::InvalidRequest("empty search text".into()));
                Vec::new()
            }
        };
        self.stream(Token::Search, items);
    }

    /// Registers `token` for `proxy` and acknowledges `request` on its queue.
    fn subscribe(&mut self, proxy: ProxyId, request: RequestId, token: Token, listing: Listing) -> bool {
        if !self.registry.is_attached(proxy) {
            tracing::debug!(proxy, "request from a detached view ignored");
            return false;
        }
        self.registry.register(token, proxy, listing);
        self.registry
            .send_to(proxy, ViewEvent::Registered { request, token })
    }

    fn stream(&mut self, token: Token, items: Vec<Item>) {
        let count = items.len();
        for item in items {
            if !self.registry.route_insert(token, item) {
                return;
            }
        }
        self.registry.route_completed(token, count);
        tracing::debug!(%token, count, "listing streamed");
    }

    fn apply_add(&mut self, parent: ItemId, kind: ItemKind, title: &str, subtitle: &str) {
        let Some(tree) = self.tree.as_mut() else {
            return self.reject(VaultError::InvalidRequest("no database is open".into()));
        };
        let record = match tree.insert(parent, kind, title, subtitle) {
            Ok(record) => record,
            Err(error) => return self.reject(error),
        };
        if let Err(err) = self.store.insert(&record) {
            let _ = tree.remove(record.id);
            return self.reject(err.into());
        }

        let item = record.to_item();
        let search = &self.search;
        let delivered = self
            .registry
            .route_added(&item, |listing| listing_shows(tree, search, listing, &record));
        tracing::debug!(id = item.id, parent, delivered, "item added");
        self.notify(BackendNotice::ItemAdded { parent, item });
    }

    fn apply_rename(&mut self, id: ItemId, title: &str, subtitle: Option<String>) {
        let Some(tree) = self.tree.as_mut() else {
            return self.reject(VaultError::InvalidRequest("no database is open".into()));
        };
        let Some(current) = tree.get(id) else {
            return self.reject(VaultError::NotFound(id));
        };
        let subtitle = subtitle.unwrap_or_else(|| current.subtitle.clone());
        if let Err(err) = self.store.rename(id, title, &subtitle) {
            return self.reject(err.into());
        }
        if let Err(error) = tree.rename(id, title, &subtitle) {
            return self.reject(error);
        }
        let delivered = self.registry.route_update(id, title, &subtitle);
        tracing::debug!(id, delivered, "item renamed");
    }

    fn apply_delete(&mut self, id: ItemId) {
        let Some(tree) = self.tree.as_mut() else {
            return self.reject(VaultError::InvalidRequest("no database is open".into()));
        };
        if id == tree.root() {
            return self.reject(VaultError::InvalidRequest(
                "the root group cannot be deleted".into(),
            ));
        }
        if !tree.contains(id) {
            return self.reject(VaultError::NotFound(id));
        }
        if let Err(err) = self.store.delete(id) {
            return self.reject(err.into());
        }
        let removed = match tree.remove(id) {
            Ok(removed) => removed,
            Err(error) => return self.reject(error),
        };
        for removed_id in &removed {
            self.registry.route_delete(*removed_id);
        }
        tracing::debug!(id, removed = removed.len(), "item deleted");
    }

    fn reject(&mut self, error: VaultError) {
        tracing::warn!(%error, "mutation rejected");
        self.notify(BackendNotice::MutationFailed { error });
    }

    fn notify(&self, notice: BackendNotice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("backend owner is gone, notice dropped");
        }
    }
}

/// Whether a view registered for `listing` should show the freshly added `record`.
///
/// Searches stop taking live additions once the scope holds more matches than
/// `max_results`, so a capped search view never grows past the cap.
fn listing_shows(
    tree: &DatabaseTree,
    options: &SearchOptions,
    listing: &Listing,
    record: &Record,
) -> bool {
    match listing {
        Listing::MasterGroups => record.parent == Some(tree.root()),
        Listing::GroupContents(group) => record.parent == Some(*group),
        Listing::Search { query, root } => {
            if !root.map_or(true, |root| tree.is_within(record.id, root)) {
                return false;
            }
            let Some(query) = SearchQuery::parse(query, options) else {
                return false;
            };
            // The record is already in the tree, so it counts toward the cap itself.
            query.matches(record)
                && (query.max_results == 0
                    || tree
                        .count_matches(&query, *root)
                        .is_ok_and(|count| count <= query.max_results))
        }
    }
}

fn to_items(records: Vec<&Record>) -> Vec<Item> {
    records.into_iter().map(Record::to_item).collect()
}

fn absorb(error: VaultError) {
    tracing::debug!(%error, "query absorbed into an empty listing");
}
