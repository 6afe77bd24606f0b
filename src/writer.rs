use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::presence::PresenceUpdate;
use crate::session::SessionKey;
use crate::store::PresenceStore;

/// Queue of this participant's own writes.
///
/// Submitting never blocks. A single task drains the queue, so writes reach
/// the store in submission order. Failed writes are logged and dropped; the
/// next write supersedes them.
#[derive(Clone)]
pub struct SelfWriter {
    queue: UnboundedSender<PresenceUpdate>,
}

impl SelfWriter {
    pub fn spawn<S: PresenceStore>(
        store: S,
        session: SessionKey,
        participant: String,
    ) -> (SelfWriter, JoinHandle<()>) {
        let (queue, mut pending) = unbounded::<PresenceUpdate>();
        let task = tokio::spawn(async move {
            while let Some(update) = pending.next().await {
                if let Err(e) = store.update_self(&session, &participant, update).await {
                    warn!(
                        "Failed to write presence of {} in {}: {}",
                        participant, session, e
                    );
                }
            }
            debug!("Writer for {} in {} finished", participant, session);
        });
        (SelfWriter { queue }, task)
    }

    /// Queues a write. Returns `false` once the writer has been closed.
    pub fn submit(&self, update: PresenceUpdate) -> bool {
        self.queue.unbounded_send(update).is_ok()
    }

    /// Stops accepting writes for every clone; already queued writes still run.
    pub fn close(&self) {
        self.queue.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
