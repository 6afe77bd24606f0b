use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::documents::Documents;
use crate::error::Result;
use crate::presence::{now_millis, PresenceUpdate, SessionSnapshot};
use crate::session::SessionKey;

/// The two operations the presence core needs from a document store.
pub trait PresenceStore: Clone + Send + Sync + 'static {
    /// Subscribes to a session document. The first snapshot is the current
    /// state; every later one follows a change.
    fn observe_session(
        &self,
        session: &SessionKey,
    ) -> impl Future<Output = Result<Subscription>> + Send;

    /// Merge-writes `participant`'s own record in `session`.
    fn update_self(
        &self,
        session: &SessionKey,
        participant: &str,
        update: PresenceUpdate,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Handle to a live session subscription. Dropping it cancels the
/// subscription.
pub struct Subscription {
    snapshots: UnboundedReceiver<SessionSnapshot>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(snapshots: UnboundedReceiver<SessionSnapshot>) -> Self {
        Subscription {
            snapshots,
            release: None,
        }
    }

    pub fn with_release(
        snapshots: UnboundedReceiver<SessionSnapshot>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Subscription {
            snapshots,
            release: Some(Box::new(release)),
        }
    }

    /// Waits for the next snapshot; `None` once the store has gone away.
    pub async fn next(&mut self) -> Option<SessionSnapshot> {
        self.snapshots.next().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Close first so the store sees the channel as gone when it handles
        // the release.
        self.snapshots.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// In-process document store, for running both participants in one process
/// and for tests.
#[derive(Clone)]
pub struct MemoryStore {
    documents: Arc<Mutex<Documents>>,
    next_subscriber: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new(enforce_membership: bool) -> Self {
        MemoryStore {
            documents: Arc::new(Mutex::new(Documents::new(enforce_membership))),
            next_subscriber: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn snapshot(&self, session: &SessionKey) -> SessionSnapshot {
        self.documents.lock().await.snapshot(session)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(true)
    }
}

impl PresenceStore for MemoryStore {
    async fn observe_session(&self, session: &SessionKey) -> Result<Subscription> {
        let (tx, rx) = unbounded();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        // Local subscribers may watch any session; membership is only
        // checked for writes.
        let (reader, _) = session.participants();
        self.documents
            .lock()
            .await
            .subscribe(session, reader, id, tx)?;
        Ok(Subscription::new(rx))
    }

    async fn update_self(
        &self,
        session: &SessionKey,
        participant: &str,
        update: PresenceUpdate,
    ) -> Result<()> {
        self.documents
            .lock()
            .await
            .merge(session, participant, update, now_millis())
    }
}
