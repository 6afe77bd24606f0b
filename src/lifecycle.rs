use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::presence::PresenceUpdate;
use crate::reconciler::{PresenceView, Reconciler};
use crate::session::SessionKey;
use crate::store::PresenceStore;
use crate::touch::TouchHandler;
use crate::writer::SelfWriter;

/// A mounted shared space between `me` and `friend`.
///
/// Mounting marks us online and starts listening to the session document.
/// Leaving, either through [`PresenceSession::leave`] or by dropping the
/// value, marks us offline exactly once and cancels the subscription.
pub struct PresenceSession {
    session: SessionKey,
    me: String,
    friend: String,
    writer: SelfWriter,
    /// Local touch flag shared by every handler of this mount.
    touching: Arc<AtomicBool>,
    writer_task: Option<JoinHandle<()>>,
    listener: JoinHandle<()>,
    mounted: Arc<AtomicBool>,
    view: watch::Receiver<PresenceView>,
}

impl PresenceSession {
    pub async fn mount<S: PresenceStore>(store: S, me: &str, friend: &str) -> Result<Self> {
        let session = SessionKey::new(me, friend)?;
        let (writer, writer_task) =
            SelfWriter::spawn(store.clone(), session.clone(), me.to_owned());
        writer.submit(PresenceUpdate::entered());

        let mut subscription = match store.observe_session(&session).await {
            Ok(subscription) => subscription,
            Err(e) => {
                writer.submit(PresenceUpdate::left());
                writer.close();
                return Err(e);
            }
        };

        let mounted = Arc::new(AtomicBool::new(true));
        let (view_tx, view) = watch::channel(PresenceView::default());
        let reconciler = Reconciler::new(me, friend);
        let listener = tokio::spawn({
            let mounted = mounted.clone();
            let session = session.clone();
            async move {
                while let Some(snapshot) = subscription.next().await {
                    if !mounted.load(Ordering::Acquire) {
                        break;
                    }
                    let next = reconciler.reconcile(&snapshot);
                    view_tx.send_if_modified(|current| {
                        let changed = *current != next;
                        *current = next;
                        changed
                    });
                }
                debug!("Stopped listening to {}", session);
            }
        });

        info!("{} entered shared space {}", me, session);
        Ok(PresenceSession {
            session,
            me: me.to_owned(),
            friend: friend.to_owned(),
            writer,
            touching: Arc::new(AtomicBool::new(false)),
            writer_task: Some(writer_task),
            listener,
            mounted,
            view,
        })
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    pub fn friend(&self) -> &str {
        &self.friend
    }

    /// A touch handler bound to this mount. It goes quiet once we leave.
    pub fn touch_handler(&self) -> TouchHandler {
        TouchHandler::new(self.writer.clone(), self.touching.clone())
    }

    /// The latest reconciled view.
    pub fn view(&self) -> PresenceView {
        *self.view.borrow()
    }

    /// A receiver that wakes on every change of the reconciled view.
    pub fn watch(&self) -> watch::Receiver<PresenceView> {
        self.view.clone()
    }

    /// Waits for the reconciled view to change. `None` once the listener has
    /// stopped.
    pub async fn changed(&mut self) -> Option<PresenceView> {
        self.view.changed().await.ok()?;
        Some(*self.view.borrow_and_update())
    }

    /// Leaves the shared space and waits until the queued writes, the final
    /// offline write included, have been attempted.
    pub async fn leave(mut self) {
        self.unmount();
        if let Some(task) = self.writer_task.take() {
            if let Err(e) = task.await {
                warn!("Presence writer of {} ended abnormally: {}", self.me, e);
            }
        }
    }

    fn unmount(&mut self) {
        if !self.mounted.swap(false, Ordering::AcqRel) {
            return;
        }
        self.writer.submit(PresenceUpdate::left());
        self.writer.close();
        self.listener.abort();
        info!("{} left shared space {}", self.me, self.session);
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        self.unmount();
    }
}
