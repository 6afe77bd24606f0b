use std::collections::HashMap;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{PresenceError, Result};
use crate::presence::{PresenceUpdate, SessionSnapshot};
use crate::presence_message::PresenceMessage;
use crate::session::{validate_participant, SessionKey};
use crate::store::{PresenceStore, Subscription};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Subscribe {
        session: SessionKey,
        snapshots: UnboundedSender<SessionSnapshot>,
    },
    Release(SessionKey),
    Update {
        session: SessionKey,
        update: PresenceUpdate,
    },
}

#[derive(Default)]
struct Route {
    subscribers: Vec<UnboundedSender<SessionSnapshot>>,
    latest: Option<SessionSnapshot>,
}

/// Document store living on a presence server, reached over one websocket.
///
/// A background task owns the socket; this handle only queues commands for
/// it, so every method is cheap and never waits on the network.
#[derive(Clone)]
pub struct RemoteStore {
    participant: String,
    commands: UnboundedSender<Command>,
}

impl RemoteStore {
    pub async fn connect(url: &str, participant: &str) -> Result<RemoteStore> {
        validate_participant(participant)?;
        let (socket, _) = connect_async(url).await?;
        info!("Connected to presence server {} as {}", url, participant);

        let hello = encode(&PresenceMessage::Identify {
            participant: participant.to_owned(),
        })?;
        let (commands, pending) = unbounded();
        tokio::spawn(drive(socket, pending, hello));
        Ok(RemoteStore {
            participant: participant.to_owned(),
            commands,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.unbounded_send(command).map_err(|_| {
            PresenceError::StoreUnavailable("connection to presence server closed".to_owned())
                .into()
        })
    }
}

impl PresenceStore for RemoteStore {
    async fn observe_session(&self, session: &SessionKey) -> Result<Subscription> {
        let (snapshots, rx) = unbounded();
        self.send(Command::Subscribe {
            session: session.clone(),
            snapshots,
        })?;
        let commands = self.commands.clone();
        let session = session.clone();
        Ok(Subscription::with_release(rx, move || {
            let _ = commands.unbounded_send(Command::Release(session));
        }))
    }

    async fn update_self(
        &self,
        session: &SessionKey,
        participant: &str,
        update: PresenceUpdate,
    ) -> Result<()> {
        if participant != self.participant {
            return Err(PresenceError::ForeignRecord {
                writer: self.participant.clone(),
                participant: participant.to_owned(),
            }
            .into());
        }
        self.send(Command::Update {
            session: session.clone(),
            update,
        })
    }
}

fn encode(message: &PresenceMessage) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(message)?))
}

/// Applies a local command to the routing table and returns what, if
/// anything, has to go to the server.
fn apply_command(
    routes: &mut HashMap<SessionKey, Route>,
    command: Command,
) -> Option<PresenceMessage> {
    match command {
        Command::Subscribe { session, snapshots } => {
            let route = routes.entry(session.clone()).or_default();
            let first = route.subscribers.is_empty();
            if let Some(latest) = &route.latest {
                let _ = snapshots.unbounded_send(latest.clone());
            }
            route.subscribers.push(snapshots);
            first.then(|| PresenceMessage::Subscribe { session })
        }
        Command::Release(session) => {
            let route = routes.get_mut(&session)?;
            route.subscribers.retain(|tx| !tx.is_closed());
            if !route.subscribers.is_empty() {
                return None;
            }
            routes.remove(&session);
            Some(PresenceMessage::Unsubscribe { session })
        }
        Command::Update { session, update } => Some(PresenceMessage::update(session, update)),
    }
}

fn route_incoming(routes: &mut HashMap<SessionKey, Route>, text: &str) {
    match serde_json::from_str::<PresenceMessage>(text) {
        Ok(PresenceMessage::Snapshot(snapshot)) => {
            if let Some(route) = routes.get_mut(&snapshot.session) {
                route
                    .subscribers
                    .retain(|tx| tx.unbounded_send(snapshot.clone()).is_ok());
                route.latest = Some(snapshot);
            }
        }
        Ok(PresenceMessage::Rejected { reason }) => {
            warn!("Presence server rejected a request: {}", reason);
        }
        Ok(other) => debug!("Ignoring unexpected message {:?}", other),
        Err(e) => warn!("Malformed message from presence server: {}", e),
    }
}

async fn drive(socket: Socket, mut commands: UnboundedReceiver<Command>, hello: Message) {
    let (mut outgoing, mut incoming) = socket.split();
    if let Err(e) = outgoing.send(hello).await {
        warn!("Could not identify to presence server: {}", e);
        return;
    }

    let mut routes: HashMap<SessionKey, Route> = HashMap::new();
    loop {
        tokio::select! {
            command = commands.next() => {
                let command = match command {
                    Some(command) => command,
                    None => break,
                };
                let message = match apply_command(&mut routes, command) {
                    Some(message) => message,
                    None => continue,
                };
                let sent = match encode(&message) {
                    Ok(frame) => outgoing.send(frame).await,
                    Err(e) => {
                        warn!("Error encoding {:?}: {}", message, e);
                        continue;
                    }
                };
                if let Err(e) = sent {
                    warn!("Lost connection to presence server: {}", e);
                    break;
                }
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => route_incoming(&mut routes, &text),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Presence server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Lost connection to presence server: {}", e);
                    break;
                }
            },
        }
    }
    let _ = outgoing.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("alice", "bob").unwrap()
    }

    fn snapshot_frame(online: bool) -> String {
        format!(
            r#"{{"type":"snapshot","session":"alice_bob","exists":true,"participants":{{"bob":{{"online":{}}}}}}}"#,
            online
        )
    }

    #[test]
    fn only_the_first_local_subscriber_subscribes_remotely() {
        let mut routes = HashMap::new();
        let (first, _first_rx) = unbounded();
        let (second, mut second_rx) = unbounded();

        let sent = apply_command(
            &mut routes,
            Command::Subscribe {
                session: key(),
                snapshots: first,
            },
        );
        assert_eq!(sent, Some(PresenceMessage::Subscribe { session: key() }));

        route_incoming(&mut routes, &snapshot_frame(true));
        let sent = apply_command(
            &mut routes,
            Command::Subscribe {
                session: key(),
                snapshots: second,
            },
        );
        assert_eq!(sent, None);
        // late subscribers start from the cached snapshot
        assert!(second_rx.try_next().unwrap().unwrap().record("bob").online);
    }

    #[test]
    fn last_release_unsubscribes() {
        let mut routes = HashMap::new();
        let (first, first_rx) = unbounded();
        let (second, second_rx) = unbounded();
        for snapshots in [first, second] {
            apply_command(
                &mut routes,
                Command::Subscribe {
                    session: key(),
                    snapshots,
                },
            );
        }

        drop(first_rx);
        assert_eq!(apply_command(&mut routes, Command::Release(key())), None);
        drop(second_rx);
        assert_eq!(
            apply_command(&mut routes, Command::Release(key())),
            Some(PresenceMessage::Unsubscribe { session: key() })
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn snapshots_reach_every_live_subscriber() {
        let mut routes = HashMap::new();
        let (tx, mut rx) = unbounded();
        apply_command(
            &mut routes,
            Command::Subscribe {
                session: key(),
                snapshots: tx,
            },
        );
        route_incoming(&mut routes, &snapshot_frame(true));
        route_incoming(&mut routes, "not json");
        route_incoming(&mut routes, &snapshot_frame(false));
        assert!(rx.try_next().unwrap().unwrap().record("bob").online);
        assert!(!rx.try_next().unwrap().unwrap().record("bob").online);
    }

    #[tokio::test]
    async fn only_our_own_record_is_written() {
        let (commands, mut pending) = unbounded();
        let store = RemoteStore {
            participant: "alice".to_owned(),
            commands,
        };

        let err = store
            .update_self(&key(), "bob", PresenceUpdate::touching(true))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PresenceError>(),
            Some(&PresenceError::ForeignRecord {
                writer: "alice".into(),
                participant: "bob".into(),
            })
        );
        assert!(pending.try_next().is_err());

        store
            .update_self(&key(), "alice", PresenceUpdate::touching(true))
            .await
            .unwrap();
        match pending.try_next() {
            Ok(Some(Command::Update { session, update })) => {
                assert_eq!(session, key());
                assert_eq!(update, PresenceUpdate::touching(true));
            }
            _ => panic!("expected a queued update"),
        }
        assert!(pending.try_next().is_err());
    }

    #[test]
    fn updates_are_forwarded_as_is() {
        let mut routes = HashMap::new();
        let sent = apply_command(
            &mut routes,
            Command::Update {
                session: key(),
                update: PresenceUpdate::touching(true),
            },
        );
        assert_eq!(
            sent,
            Some(PresenceMessage::update(key(), PresenceUpdate::touching(true)))
        );
    }
}
