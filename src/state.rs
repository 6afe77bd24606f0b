use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_channel::mpsc::UnboundedSender;
use log::{info, warn};
use rand::{thread_rng, Rng};
use tokio::sync::Mutex;
use warp::ws::Message;

use crate::config::Config;
use crate::documents::{Documents, SnapshotTx};
use crate::error::{PresenceError, Result};
use crate::metrics;
use crate::presence::PresenceUpdate;
use crate::presence_message::PresenceMessage;
use crate::session::{validate_participant, SessionKey};

pub type Tx = UnboundedSender<Message>;
pub type ConnectionId = u64;

pub struct Connection {
    pub participant: Option<String>,
    pub sender: Tx,
    pub snapshots: SnapshotTx,
    pub subscriptions: HashSet<SessionKey>,
    /// Sessions this connection has written to, for the disconnect cleanup.
    pub written: HashSet<SessionKey>,
    pub connected_at: Instant,
}

pub struct State {
    pub documents: Documents,
    pub connections: HashMap<ConnectionId, Connection>,
    mark_offline_on_disconnect: bool,
}

pub type StateType = Arc<Mutex<State>>;

impl State {
    pub fn new(config: &Config) -> StateType {
        Arc::new(Mutex::new(State {
            documents: Documents::new(config.enforce_membership),
            connections: Default::default(),
            mark_offline_on_disconnect: config.mark_offline_on_disconnect,
        }))
    }

    pub fn add_connection(&mut self, sender: Tx, snapshots: SnapshotTx) -> ConnectionId {
        let mut id: ConnectionId = thread_rng().gen();
        while self.connections.contains_key(&id) {
            id = thread_rng().gen();
        }
        self.connections.insert(
            id,
            Connection {
                participant: None,
                sender,
                snapshots,
                subscriptions: Default::default(),
                written: Default::default(),
                connected_at: Instant::now(),
            },
        );
        id
    }

    fn connection(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| {
                PresenceError::StoreUnavailable(format!("unknown connection {}", id)).into()
            })
    }

    fn participant_of(&mut self, id: ConnectionId) -> Result<String> {
        self.connection(id)?
            .participant
            .clone()
            .ok_or_else(|| PresenceError::NotIdentified.into())
    }

    /// Binds the connection to a participant. Writes through this connection
    /// only ever touch that participant's records.
    pub fn identify(&mut self, id: ConnectionId, participant: String) -> Result<()> {
        validate_participant(&participant)?;
        let connection = self.connection(id)?;
        match &connection.participant {
            Some(existing) if *existing != participant => {
                Err(PresenceError::AlreadyIdentified(existing.clone()).into())
            }
            _ => {
                info!("Connection {} is {}", id, participant);
                connection.participant = Some(participant);
                Ok(())
            }
        }
    }

    pub fn subscribe(&mut self, id: ConnectionId, session: SessionKey) -> Result<()> {
        let participant = self.participant_of(id)?;
        let snapshots = self.connection(id)?.snapshots.clone();
        self.documents
            .subscribe(&session, &participant, id, snapshots)?;
        self.connection(id)?.subscriptions.insert(session);
        metrics::NUM_ACTIVE_SUBSCRIPTIONS.set(self.documents.num_subscriptions() as i64);
        Ok(())
    }

    pub fn unsubscribe(&mut self, id: ConnectionId, session: &SessionKey) -> Result<()> {
        self.connection(id)?.subscriptions.remove(session);
        self.documents.unsubscribe(session, id);
        metrics::NUM_ACTIVE_SUBSCRIPTIONS.set(self.documents.num_subscriptions() as i64);
        Ok(())
    }

    pub fn update(
        &mut self,
        id: ConnectionId,
        session: SessionKey,
        update: PresenceUpdate,
        now: u64,
    ) -> Result<()> {
        let participant = self.participant_of(id)?;
        if let Err(e) = self.documents.merge(&session, &participant, update, now) {
            metrics::PRESENCE_WRITES.with_label_values(&["rejected"]).inc();
            return Err(e);
        }
        metrics::PRESENCE_WRITES.with_label_values(&["applied"]).inc();
        metrics::NUM_SESSION_DOCUMENTS.set(self.documents.num_documents() as i64);
        self.connection(id)?.written.insert(session);
        Ok(())
    }

    /// Tells the connection why its last request was refused.
    pub fn reject(&self, id: ConnectionId, reason: String) {
        if let Some(connection) = self.connections.get(&id) {
            let reply = PresenceMessage::Rejected { reason };
            match serde_json::to_string(&reply) {
                Ok(text) => {
                    if let Err(e) = connection.sender.unbounded_send(Message::text(text)) {
                        info!("Error sending rejection to {}: {}", id, e);
                    }
                }
                Err(e) => warn!("Error encoding rejection: {}", e),
            }
        }
    }

    /// Drops the connection's subscriptions and, unless disabled, marks its
    /// participant offline wherever it wrote. Sessions the participant is
    /// still writing through another connection are left alone.
    pub fn on_disconnect(&mut self, id: ConnectionId, now: u64) {
        let connection = match self.connections.remove(&id) {
            Some(connection) => connection,
            None => return,
        };
        for session in &connection.subscriptions {
            self.documents.unsubscribe(session, id);
        }
        let participant = match &connection.participant {
            Some(participant) if self.mark_offline_on_disconnect => Some(participant),
            _ => None,
        };
        if let Some(participant) = participant {
            for session in &connection.written {
                let record = self.documents.snapshot(session).record(participant);
                if !record.online && !record.touching {
                    continue;
                }
                let still_connected = self.connections.values().any(|other| {
                    other.participant.as_deref() == Some(participant.as_str())
                        && other.written.contains(session)
                });
                if still_connected {
                    continue;
                }
                info!("Marking {} offline in {} after disconnect", participant, session);
                if let Err(e) = self
                    .documents
                    .merge(session, participant, PresenceUpdate::left(), now)
                {
                    warn!("Could not mark {} offline in {}: {}", participant, session, e);
                }
            }
        }
        metrics::NUM_ACTIVE_SUBSCRIPTIONS.set(self.documents.num_subscriptions() as i64);
        metrics::CONNECTION_DURATION_SEC.observe(connection.connected_at.elapsed().as_secs_f64());
    }
}
