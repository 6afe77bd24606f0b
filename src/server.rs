use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures_channel::mpsc::unbounded;
use futures_util::{future, pin_mut, stream, stream::TryStreamExt, StreamExt};
use log::{info, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::presence::{now_millis, PresenceUpdate, SessionSnapshot};
use crate::presence_message::PresenceMessage;
use crate::state::{ConnectionId, State, StateType};

pub(crate) fn handle_message(
    state: &mut State,
    id: ConnectionId,
    raw_payload: &str,
    now: u64,
) -> Result<()> {
    let msg: PresenceMessage = serde_json::from_str(raw_payload)?;

    match msg {
        PresenceMessage::Identify { participant } => state.identify(id, participant)?,
        PresenceMessage::Subscribe { session } => {
            state.subscribe(id, session.clone())?;
            info!("Connection {} subscribed to {}", id, session);
        }
        PresenceMessage::Unsubscribe { session } => state.unsubscribe(id, &session)?,
        PresenceMessage::Update {
            session,
            online,
            touching,
        } => state.update(id, session, PresenceUpdate { online, touching }, now)?,
        PresenceMessage::KeepAlive {}
        | PresenceMessage::Snapshot(_)
        | PresenceMessage::Rejected { .. } => {}
    };
    Ok(())
}

async fn process_message(
    msg: Message,
    state: StateType,
    id: ConnectionId,
) -> std::result::Result<(), warp::Error> {
    if !msg.is_text() {
        return Ok(());
    }

    if let Ok(s) = msg.to_str() {
        let mut locked_state = state.lock().await;
        if let Err(e) = handle_message(&mut locked_state, id, s, now_millis()) {
            info!(
                "Error occurred when handling message: {}\nMessage: {}",
                e, s
            );
            locked_state.reject(id, e.to_string());
        }
    }
    Ok(())
}

fn snapshot_message(snapshot: SessionSnapshot) -> Option<Message> {
    match serde_json::to_string(&PresenceMessage::Snapshot(snapshot)) {
        Ok(text) => Some(Message::text(text)),
        Err(e) => {
            warn!("Error encoding snapshot: {}", e);
            None
        }
    }
}

async fn handle_connection(config: Config, state: StateType, websocket: WebSocket, addr: IpAddr) {
    let hashed_ip = metrics::hash_ip(addr, &config.ip_hash_salt).unwrap_or_else(|e| {
        warn!("Could not hash client ip: {}", e);
        "unknown".to_owned()
    });

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .inc();

    // Replies and snapshots share the socket's write half.
    let (tx, rx) = unbounded();
    let (snapshots_tx, snapshots_rx) = unbounded();
    let id = state.lock().await.add_connection(tx, snapshots_tx);
    info!("WebSocket connection {} established: {}", id, addr);

    let (outgoing, incoming) = websocket.split();

    let handle_incoming = incoming.try_for_each(|msg| process_message(msg, state.clone(), id));

    let snapshots = snapshots_rx.filter_map(|snapshot| future::ready(snapshot_message(snapshot)));
    let receive_from_store = stream::select(rx, snapshots).map(Ok).forward(outgoing);

    pin_mut!(handle_incoming, receive_from_store);
    future::select(handle_incoming, receive_from_store).await;

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .dec();
    info!("{} ({}) disconnected", id, addr);
    state.lock().await.on_disconnect(id, now_millis());
}

pub async fn start_server(addr: SocketAddr, config: Config, state: StateType) {
    metrics::register();

    use warp::{any, ws};
    let metrics_route = warp::path!("metrics").and_then(metrics::metrics_handler);
    let ws_route = warp::path::end()
        .and(ws())
        .and(warp_real_ip::get_forwarded_for())
        .and(warp::addr::remote())
        .and(any().map(move || config.clone()))
        .and(any().map(move || state.clone()))
        .map(
            |ws: ws::Ws,
             forwarded: Vec<IpAddr>,
             remote: Option<SocketAddr>,
             config: Config,
             state: StateType| {
                let ip = forwarded
                    .last()
                    .copied()
                    .or_else(|| remote.map(|r| r.ip()))
                    .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                ws.on_upgrade(move |socket| handle_connection(config, state, socket, ip))
            },
        );

    info!("Server listening on {}", addr);
    warp::serve(metrics_route.or(ws_route)).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionKey;
    use futures_channel::mpsc::UnboundedReceiver;

    struct Client {
        id: ConnectionId,
        replies: UnboundedReceiver<Message>,
        snapshots: UnboundedReceiver<SessionSnapshot>,
    }

    fn connect(state: &mut State) -> Client {
        let (tx, replies) = unbounded();
        let (snapshots_tx, snapshots) = unbounded();
        let id = state.add_connection(tx, snapshots_tx);
        Client {
            id,
            replies,
            snapshots,
        }
    }

    fn new_state(config: &Config) -> State {
        match std::sync::Arc::try_unwrap(State::new(config)) {
            Ok(state) => state.into_inner(),
            Err(_) => unreachable!(),
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("alice", "bob").unwrap()
    }

    #[test]
    fn identified_client_writes_its_own_record() {
        let mut state = new_state(&Config::default());
        let mut alice = connect(&mut state);
        let mut bob = connect(&mut state);

        handle_message(&mut state, alice.id, r#"{"type":"identify","participant":"alice"}"#, 1)
            .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"identify","participant":"bob"}"#, 1)
            .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"subscribe","session":"alice_bob"}"#, 1)
            .unwrap();
        assert!(!bob.snapshots.try_next().unwrap().unwrap().exists);

        handle_message(
            &mut state,
            alice.id,
            r#"{"type":"update","session":"alice_bob","online":true,"touching":false}"#,
            5,
        )
        .unwrap();

        let snapshot = bob.snapshots.try_next().unwrap().unwrap();
        assert!(snapshot.record("alice").online);
        assert_eq!(snapshot.record("alice").last_updated, Some(5));
        assert!(snapshot.participants.get("bob").is_none());
        assert!(alice.snapshots.try_next().is_err());
        assert!(alice.replies.try_next().is_err());
    }

    #[test]
    fn anonymous_and_foreign_writes_are_refused() {
        let mut state = new_state(&Config::default());
        let carol = connect(&mut state);

        let update = r#"{"type":"update","session":"alice_bob","online":true}"#;
        assert!(handle_message(&mut state, carol.id, update, 1).is_err());

        handle_message(&mut state, carol.id, r#"{"type":"identify","participant":"carol"}"#, 1)
            .unwrap();
        assert!(handle_message(&mut state, carol.id, update, 1).is_err());
        assert!(!state.documents.snapshot(&key()).exists);

        assert!(handle_message(
            &mut state,
            carol.id,
            r#"{"type":"identify","participant":"alice"}"#,
            1
        )
        .is_err());
    }

    #[test]
    fn rejections_are_sent_back() {
        let mut state = new_state(&Config::default());
        let mut carol = connect(&mut state);
        state.reject(carol.id, "nope".into());
        match carol.replies.try_next().unwrap().unwrap().to_str() {
            Ok(text) => assert_eq!(text, r#"{"type":"rejected","reason":"nope"}"#),
            Err(_) => panic!("expected a text reply"),
        }
    }

    #[test]
    fn dropped_connection_is_marked_offline() {
        let mut state = new_state(&Config::default());
        let alice = connect(&mut state);
        let mut bob = connect(&mut state);
        handle_message(&mut state, alice.id, r#"{"type":"identify","participant":"alice"}"#, 1)
            .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"identify","participant":"bob"}"#, 1)
            .unwrap();
        handle_message(
            &mut state,
            alice.id,
            r#"{"type":"update","session":"alice_bob","online":true,"touching":true}"#,
            2,
        )
        .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"subscribe","session":"alice_bob"}"#, 3)
            .unwrap();
        assert!(bob.snapshots.try_next().unwrap().unwrap().record("alice").touching);

        state.on_disconnect(alice.id, 9);

        let snapshot = bob.snapshots.try_next().unwrap().unwrap();
        assert!(!snapshot.record("alice").online);
        assert!(!snapshot.record("alice").touching);
        assert_eq!(snapshot.record("alice").last_updated, Some(9));
        assert!(!state.connections.contains_key(&alice.id));
    }

    #[test]
    fn stale_connection_does_not_unmount_a_reconnected_participant() {
        let mut state = new_state(&Config::default());
        let old = connect(&mut state);
        let new = connect(&mut state);
        let mounted = r#"{"type":"update","session":"alice_bob","online":true,"touching":false}"#;
        for id in [old.id, new.id] {
            handle_message(&mut state, id, r#"{"type":"identify","participant":"alice"}"#, 1)
                .unwrap();
            handle_message(&mut state, id, mounted, 2).unwrap();
        }

        state.on_disconnect(old.id, 5);

        let record = state.documents.snapshot(&key()).record("alice");
        assert!(record.online);
        assert_eq!(record.last_updated, Some(2));

        state.on_disconnect(new.id, 7);
        let record = state.documents.snapshot(&key()).record("alice");
        assert!(!record.online);
        assert_eq!(record.last_updated, Some(7));
    }

    #[test]
    fn disconnect_cleanup_can_be_disabled() {
        let config = Config {
            mark_offline_on_disconnect: false,
            ..Config::default()
        };
        let mut state = new_state(&config);
        let alice = connect(&mut state);
        handle_message(&mut state, alice.id, r#"{"type":"identify","participant":"alice"}"#, 1)
            .unwrap();
        handle_message(
            &mut state,
            alice.id,
            r#"{"type":"update","session":"alice_bob","online":true}"#,
            2,
        )
        .unwrap();
        state.on_disconnect(alice.id, 3);
        assert!(state.documents.snapshot(&key()).record("alice").online);
    }

    #[test]
    fn unsubscribed_clients_stop_hearing_changes() {
        let mut state = new_state(&Config::default());
        let mut bob = connect(&mut state);
        handle_message(&mut state, bob.id, r#"{"type":"identify","participant":"bob"}"#, 1)
            .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"subscribe","session":"alice_bob"}"#, 1)
            .unwrap();
        handle_message(&mut state, bob.id, r#"{"type":"unsubscribe","session":"alice_bob"}"#, 1)
            .unwrap();
        bob.snapshots.try_next().unwrap();
        handle_message(
            &mut state,
            bob.id,
            r#"{"type":"update","session":"alice_bob","online":true}"#,
            2,
        )
        .unwrap();
        assert!(bob.snapshots.try_next().is_err());
    }
}
