use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use strum::Display;

use crate::backend::{ProxyId, Request, RequestId, ViewEvent};
use crate::error::{Result, VaultError};
use crate::model::{ItemId, Listing, Token};
use crate::view::{ViewSignal, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ViewKind {
    MasterGroups,
    GroupList,
    SearchList,
}

/// End of one listing stream, carrying the token that tagged its inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub token: Token,
    pub listing: Listing,
    pub count: usize,
}

/// Foreground handle for one open list view.
///
/// Requests return immediately; results arrive on the proxy's own event queue
/// and are applied by [`ViewProxy::process_events`]. Dropping the proxy
/// unregisters it from the worker.
#[derive(Debug)]
pub struct ViewProxy {
    id: ProxyId,
    kind: ViewKind,
    requests: Sender<Request>,
    events: Receiver<ViewEvent>,
    state: ViewState,
    next_request: RequestId,
    /// Request whose `Registered` acknowledgement has not arrived yet.
    pending: Option<RequestId>,
    search_root: Option<ItemId>,
    attached: bool,
}

impl ViewProxy {
    pub(crate) fn new(
        id: ProxyId,
        kind: ViewKind,
        requests: Sender<Request>,
        events: Receiver<ViewEvent>,
    ) -> Self {
        Self {
            id,
            kind,
            requests,
            events,
            state: ViewState::new(),
            next_request: 0,
            pending: None,
            search_root: None,
            attached: true,
        }
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn token(&self) -> Token {
        self.state.token()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take_signals(&mut self) -> Vec<ViewSignal> {
        self.state.take_signals()
    }

    pub fn search_root(&self) -> Option<ItemId> {
        self.search_root
    }

    /// Scope used by [`ViewProxy::search`] when no explicit root is given.
    pub fn set_search_root(&mut self, root: Option<ItemId>) {
        self.search_root = root;
    }

    pub fn load_root(&mut self) -> Result<()> {
        self.release_subscription();
        let request = self.begin_request();
        self.dispatch(Request::LoadMasterGroups {
            proxy: self.id,
            request,
        })
    }

    pub fn load_children(&mut self, group: ItemId) -> Result<()> {
        self.release_subscription();
        let request = self.begin_request();
        self.dispatch(Request::LoadGroupContents {
            proxy: self.id,
            request,
            group,
        })
    }

    /// Starts a search under `root` (or the configured search root).
    ///
    /// The token is switched to `Search` before the request leaves, so that
    /// broadcasts aimed at the search view are attributable right away.
    pub fn search(&mut self, query: &str, root: Option<ItemId>) -> Result<()> {
        self.release_subscription();
        self.state.set_token(Token::Search);
        let request = self.begin_request();
        self.dispatch(Request::Search {
            proxy: self.id,
            request,
            query: query.to_string(),
            root: root.or(self.search_root),
        })
    }

    /// Applies every queued event without blocking and returns completed listings.
    pub fn process_events(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => completions.extend(self.apply(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!(proxy = self.id, "event queue disconnected");
                    break;
                }
            }
        }
        completions
    }

    /// Blocks until the current request completes or `timeout` elapses.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Result<Option<Completion>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(completion) = self.apply(event) {
                        return Ok(Some(completion));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(VaultError::WorkerUnavailable),
            }
        }
    }

    /// Unregisters and detaches from the worker. Safe to call repeatedly.
    pub fn close(&mut self) {
        if !self.attached {
            return;
        }
        self.release_subscription();
        self.pending = None;
        let _ = self.send(Request::Detach { proxy: self.id });
        self.attached = false;
    }

    pub fn is_closed(&self) -> bool {
        !self.attached
    }

    fn apply(&mut self, event: ViewEvent) -> Option<Completion> {
        if !self.attached {
            return None;
        }
        match event {
            ViewEvent::Registered { request, token } => {
                if self.pending == Some(request) {
                    self.pending = None;
                    self.state.set_token(token);
                } else {
                    tracing::debug!(proxy = self.id, request, %token, "stale acknowledgement dropped");
                    // A superseded load may still hold a registration of its own.
                    if token.is_registered() && token != self.state.token() {
                        let _ = self.send(Request::Unregister {
                            proxy: self.id,
                            token,
                        });
                    }
                }
                None
            }
            ViewEvent::Inserted { token, item } => {
                if self.accepts(token) {
                    self.state.insert(item);
                } else {
                    self.drop_stale(token);
                }
                None
            }
            ViewEvent::Updated {
                token,
                id,
                title,
                subtitle,
            } => {
                if self.accepts(token) {
                    self.state.update(id, &title, &subtitle);
                } else {
                    self.drop_stale(token);
                }
                None
            }
            ViewEvent::Deleted { token, id } => {
                if self.accepts(token) {
                    self.state.remove(id);
                } else {
                    self.drop_stale(token);
                }
                None
            }
            ViewEvent::Completed {
                token,
                listing,
                count,
            } => {
                if self.accepts(token) {
                    tracing::debug!(proxy = self.id, %token, count, "listing complete");
                    Some(Completion {
                        token,
                        listing,
                        count,
                    })
                } else {
                    self.drop_stale(token);
                    None
                }
            }
            ViewEvent::Invalidated { token } => {
                if token == self.state.token() {
                    self.state.clear();
                }
                None
            }
        }
    }

    fn accepts(&self, token: Token) -> bool {
        self.pending.is_none() && token.is_registered() && token == self.state.token()
    }

    fn drop_stale(&self, token: Token) {
        tracing::debug!(
            proxy = self.id,
            error = %VaultError::RaceOnUnregister(token),
            "event for a discarded token dropped"
        );
    }

    /// Empties the view and hands its current token back to the worker.
    fn release_subscription(&mut self) {
        let token = self.state.token();
        self.state.clear();
        if token.is_registered() {
            let _ = self.send(Request::Unregister {
                proxy: self.id,
                token,
            });
        }
    }

    fn begin_request(&mut self) -> RequestId {
        self.next_request += 1;
        self.pending = Some(self.next_request);
        self.next_request
    }

    /// Sends a load or search; if the worker is gone the view is left idle and unregistered.
    fn dispatch(&mut self, request: Request) -> Result<()> {
        let sent = self.send(request);
        if sent.is_err() {
            self.pending = None;
            self.state.set_token(Token::Unregistered);
        }
        sent
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|err| {
            tracing::debug!(proxy = self.id, request = err.0.name(), "worker is gone");
            VaultError::WorkerUnavailable
        })
    }
}

impl Drop for ViewProxy {
    fn drop(&mut self) {
        self.close();
    }
}
