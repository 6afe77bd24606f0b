use std::collections::{BTreeMap, HashMap};

use futures_channel::mpsc::UnboundedSender;
use log::debug;

use crate::error::{PresenceError, Result};
use crate::presence::{PresenceRecord, PresenceUpdate, SessionSnapshot};
use crate::session::SessionKey;

pub type SubscriberId = u64;
pub type SnapshotTx = UnboundedSender<SessionSnapshot>;

/// Session documents plus the subscribers watching them.
///
/// Records are never deleted; leaving a session only flips its flags.
pub struct Documents {
    documents: HashMap<SessionKey, BTreeMap<String, PresenceRecord>>,
    subscribers: HashMap<SessionKey, Vec<(SubscriberId, SnapshotTx)>>,
    enforce_membership: bool,
}

impl Documents {
    pub fn new(enforce_membership: bool) -> Self {
        Documents {
            documents: Default::default(),
            subscribers: Default::default(),
            enforce_membership,
        }
    }

    fn check_member(&self, session: &SessionKey, participant: &str) -> Result<()> {
        if self.enforce_membership && !session.contains(participant) {
            return Err(PresenceError::NotAParticipant {
                participant: participant.to_owned(),
                session: session.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn snapshot(&self, session: &SessionKey) -> SessionSnapshot {
        match self.documents.get(session) {
            Some(participants) => SessionSnapshot {
                session: session.clone(),
                exists: true,
                participants: participants.clone(),
            },
            None => SessionSnapshot::missing(session.clone()),
        }
    }

    /// Registers `tx` for changes to `session` and immediately sends it the
    /// current snapshot. A second call with the same id replaces the first.
    pub fn subscribe(
        &mut self,
        session: &SessionKey,
        reader: &str,
        id: SubscriberId,
        tx: SnapshotTx,
    ) -> Result<()> {
        self.check_member(session, reader)?;
        let snapshot = self.snapshot(session);
        let subscribers = self.subscribers.entry(session.clone()).or_default();
        subscribers.retain(|(existing, _)| *existing != id);
        if tx.unbounded_send(snapshot).is_ok() {
            subscribers.push((id, tx));
        } else if subscribers.is_empty() {
            self.subscribers.remove(session);
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, session: &SessionKey, id: SubscriberId) {
        if let Some(subscribers) = self.subscribers.get_mut(session) {
            subscribers.retain(|(existing, _)| *existing != id);
            if subscribers.is_empty() {
                self.subscribers.remove(session);
            }
        }
    }

    /// Merges `update` into the writer's own record and notifies subscribers.
    pub fn merge(
        &mut self,
        session: &SessionKey,
        writer: &str,
        update: PresenceUpdate,
        now: u64,
    ) -> Result<()> {
        self.check_member(session, writer)?;
        if update.is_empty() {
            return Ok(());
        }
        let record = self
            .documents
            .entry(session.clone())
            .or_default()
            .entry(writer.to_owned())
            .or_default();
        update.apply_to(record, now);
        self.notify(session);
        Ok(())
    }

    fn notify(&mut self, session: &SessionKey) {
        let snapshot = self.snapshot(session);
        if let Some(subscribers) = self.subscribers.get_mut(session) {
            subscribers.retain(|(id, tx)| {
                let delivered = tx.unbounded_send(snapshot.clone()).is_ok();
                if !delivered {
                    debug!("dropping closed subscriber {} of {}", id, session);
                }
                delivered
            });
            if subscribers.is_empty() {
                self.subscribers.remove(session);
            }
        }
    }

    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn num_subscriptions(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }
}
