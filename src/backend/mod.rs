//! The database session: one worker thread owning the tree and the registration
//! table, and the foreground [`Backend`] handle that talks to it.
//!
//! # Architecture
//!
//! - `messages`: request, per-view event and notice types
//! - `registry`: token → view routing table
//! - `worker`: request execution against the loaded tree

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::config::AppConfig;
use crate::error::{Result, VaultError};
use crate::model::{ItemId, ItemKind};
use crate::store::CredentialStore;
use crate::view::{ViewKind, ViewProxy};

pub mod messages;
pub mod registry;
pub mod worker;

pub use messages::{BackendNotice, ProxyId, RegistrationInfo, Request, RequestId, ViewEvent};
pub use registry::ViewRegistry;
pub use worker::DatabaseWorker;

/// Process-wide database session, constructed once at startup and handed to
/// every view it creates. Dropping it stops and joins the worker thread.
pub struct Backend {
    requests: Sender<Request>,
    notices: Receiver<BackendNotice>,
    next_proxy: AtomicU64,
    reply_timeout: Duration,
    worker: Option<JoinHandle<()>>,
}

impl Backend {
    pub fn start(config: &AppConfig, store: Box<dyn CredentialStore>) -> anyhow::Result<Self> {
        let (requests, inbox) = unbounded::<Request>();
        let (notice_tx, notices) = unbounded::<BackendNotice>();
        let worker = DatabaseWorker::new(store, config.search.clone(), notice_tx);
        let handle = thread::Builder::new()
            .name(config.worker.thread_name.clone())
            .spawn(move || worker.run(inbox))
            .context("spawning database worker thread")?;
        Ok(Self {
            requests,
            notices,
            next_proxy: AtomicU64::new(1),
            reply_timeout: config.worker.reply_timeout(),
            worker: Some(handle),
        })
    }

    /// Asks the worker to load the vault at `location`; the outcome arrives as a notice.
    pub fn open(&self, location: impl Into<PathBuf>) -> Result<()> {
        self.send(Request::Open {
            location: location.into(),
        })
    }

    pub fn close(&self) -> Result<()> {
        self.send(Request::Close)
    }

    pub fn create_view(&self, kind: ViewKind) -> Result<ViewProxy> {
        let id = self.next_proxy.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events) = unbounded::<ViewEvent>();
        self.send(Request::Attach {
            proxy: id,
            events: events_tx,
        })?;
        tracing::debug!(proxy = id, %kind, "view created");
        Ok(ViewProxy::new(id, kind, self.requests.clone(), events))
    }

    pub fn add(&self, parent: ItemId, kind: ItemKind, title: &str, subtitle: &str) -> Result<()> {
        self.send(Request::Add {
            parent,
            kind,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
        })
    }

    /// Renames `id`; its subtitle is left alone when `subtitle` is `None`.
    pub fn rename(&self, id: ItemId, title: &str, subtitle: Option<&str>) -> Result<()> {
        self.send(Request::Rename {
            id,
            title: title.to_string(),
            subtitle: subtitle.map(str::to_string),
        })
    }

    pub fn delete(&self, id: ItemId) -> Result<()> {
        self.send(Request::Delete { id })
    }

    /// Snapshot of the registration table, after every earlier request was handled.
    pub fn registrations(&self) -> Result<Vec<RegistrationInfo>> {
        let (reply, answer) = bounded(1);
        self.send(Request::Registrations { reply })?;
        answer
            .recv_timeout(self.reply_timeout)
            .map_err(|_| VaultError::WorkerUnavailable)
    }

    /// Waits until the worker has handled every request sent before this call.
    pub fn flush(&self) -> Result<()> {
        let (reply, answer) = bounded(1);
        self.send(Request::Ping { reply })?;
        answer
            .recv_timeout(self.reply_timeout)
            .map_err(|_| VaultError::WorkerUnavailable)
    }

    pub fn next_notice(&self, timeout: Duration) -> Option<BackendNotice> {
        self.notices.recv_timeout(timeout).ok()
    }

    pub fn try_notice(&self) -> Option<BackendNotice> {
        self.notices.try_recv().ok()
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let _ = self.requests.send(Request::Shutdown);
        if handle.join().is_err() {
            tracing::warn!("database worker panicked");
        }
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| VaultError::WorkerUnavailable)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}
