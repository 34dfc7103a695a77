//! Room task integration tests over the in-memory network.

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use webtalk_core::{
    MemoryMessageStore, MemoryNetwork, MessageStore, MessageType, NormalMessage, PeerId, Room,
    RoomConfig, RoomError, RoomEvent, RoomHandle, RoomId, RoomResult, StaticIdentity, Storage,
    Transport, UserInfo,
};

const BASE_TIME: i64 = 1_700_000_000_000;

fn virtual_clock() -> impl Fn() -> i64 + Send + Sync + 'static {
    let start = Instant::now();
    move || BASE_TIME + start.elapsed().as_millis() as i64
}

fn spawn_room<S: MessageStore>(
    network: &MemoryNetwork,
    room_id: &RoomId,
    user: UserInfo,
    store: S,
    config: RoomConfig,
) -> RoomHandle {
    let (transport, events) = network.connect(room_id);
    Room::new(room_id.clone(), transport, events, store, StaticIdentity::new(user))
        .with_config(config)
        .with_clock(virtual_clock())
        .spawn()
}

/// Transport that can never reach the room.
struct RefusingTransport {
    peer_id: PeerId,
}

impl Transport for RefusingTransport {
    fn peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn join_room(&self) -> RoomResult<()> {
        Err(RoomError::Transport("Signaling server unreachable".to_string()))
    }

    fn leave_room(&self) -> RoomResult<()> {
        Ok(())
    }

    fn send(&self, _payload: &str, _targets: Option<&[PeerId]>) -> RoomResult<()> {
        Err(RoomError::SendFailed("Not connected".to_string()))
    }
}

fn message(id: &str, send_time: i64) -> NormalMessage {
    NormalMessage {
        id: id.to_string(),
        kind: MessageType::Normal,
        body: format!("body of {}", id),
        send_time,
        receive_time: send_time,
        user_id: "u-alice".to_string(),
        username: "alice".to_string(),
        user_avatar: String::new(),
        like_users: vec![],
        hate_users: vec![],
        at_users: vec![],
    }
}

async fn next_matching(
    rx: &mut broadcast::Receiver<RoomEvent>,
    pred: impl Fn(&RoomEvent) -> bool,
) -> RoomEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Room closed"),
            }
        }
    })
    .await
    .expect("event within timeout")
}

async fn wait_for_messages(room: &RoomHandle, count: usize) -> Vec<NormalMessage> {
    for _ in 0..500 {
        let messages = room.messages().await.unwrap();
        if messages.len() >= count {
            return messages;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {} messages", count);
}

async fn wait_for_users(room: &RoomHandle, count: usize) {
    for _ in 0..500 {
        if room.users().await.unwrap().len() == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {} users", count);
}

#[tokio::test(start_paused = true)]
async fn test_live_text_between_rooms() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::from_host("example.com");
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let bob = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-bob", "bob", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let mut bob_events = bob.subscribe();

    alice.join().unwrap();
    bob.join().unwrap();
    wait_for_users(&alice, 2).await;
    wait_for_users(&bob, 2).await;

    alice.send_text("hello bob").unwrap();
    let event = next_matching(&mut bob_events, |e| matches!(e, RoomEvent::TextReceived(_))).await;
    match event {
        RoomEvent::TextReceived(text) => {
            assert_eq!(text.body, "hello bob");
            assert_eq!(text.user_id, "u-alice");
        }
        other => panic!("Unexpected event {:?}", other),
    }

    let messages = wait_for_messages(&bob, 1).await;
    assert_eq!(messages[0].body, "hello bob");
    assert_eq!(alice.messages().await.unwrap().len(), 1);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_before_join_is_rejected() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let mut events = alice.subscribe();

    alice.send_text("too early").unwrap();
    let event = next_matching(&mut events, RoomEvent::is_error).await;
    assert_eq!(event.error(), Some(&RoomError::NotJoined));
    assert!(alice.messages().await.unwrap().is_empty());
    assert!(!alice.is_joined().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_newcomer_receives_paced_history() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");
    let config = RoomConfig::default().with_batch_size(2);

    let history: Vec<_> = (1..=5).map(|i| message(&format!("m{}", i), BASE_TIME - 1000 + i)).collect();
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::with_messages(history),
        config.clone(),
    );
    let mut alice_events = alice.subscribe();
    alice.join().unwrap();
    assert!(alice.is_joined().await.unwrap());

    let started = Instant::now();
    let bob = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-bob", "bob", ""),
        MemoryMessageStore::new(),
        config,
    );
    bob.join().unwrap();

    let messages = wait_for_messages(&bob, 5).await;
    let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3", "m4", "m5"]);
    // Three batches, the last one two batch delays after the first.
    assert!(started.elapsed() >= Duration::from_millis(1000));

    let mut batches = 0;
    while batches < 3 {
        next_matching(&mut alice_events, |e| matches!(e, RoomEvent::SyncHistorySent(_))).await;
        batches += 1;
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_is_not_recorded() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let mut events = alice.subscribe();
    alice.join().unwrap();
    assert!(alice.is_joined().await.unwrap());

    network.disconnect(&room_id, alice.peer_id());
    let transport_error = next_matching(&mut events, RoomEvent::is_error).await;
    assert!(matches!(transport_error.error(), Some(RoomError::Transport(_))));

    alice.send_text("into the void").unwrap();
    let send_error = next_matching(&mut events, RoomEvent::is_error).await;
    assert!(matches!(send_error.error(), Some(RoomError::SendFailed(_))));
    assert!(alice.messages().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_room_and_closes_handle() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let bob = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-bob", "bob", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    alice.join().unwrap();
    bob.join().unwrap();
    wait_for_users(&bob, 2).await;

    alice.shutdown().await;
    wait_for_users(&bob, 1).await;
    assert_eq!(network.members(&room_id), vec![bob.peer_id().clone()]);

    assert_eq!(alice.join(), Err(RoomError::Closed));
    assert_eq!(alice.users().await, Err(RoomError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_reactions_through_handles() {
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");
    let alice = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-alice", "alice", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    let bob = spawn_room(
        &network,
        &room_id,
        UserInfo::new("u-bob", "bob", ""),
        MemoryMessageStore::new(),
        RoomConfig::default(),
    );
    alice.join().unwrap();
    bob.join().unwrap();
    wait_for_users(&alice, 2).await;

    alice.send_text("rate me").unwrap();
    let id = wait_for_messages(&bob, 1).await[0].id.clone();

    let mut alice_events = alice.subscribe();
    bob.send_like(&id).unwrap();
    next_matching(&mut alice_events, |e| {
        matches!(e, RoomEvent::MessageReceived(m) if m.kind() == "Like")
    })
    .await;
    let liked = alice.messages().await.unwrap();
    assert!(liked[0].is_liked_by("u-bob"));

    let mut bob_events = bob.subscribe();
    bob.send_hate("missing").unwrap();
    let event = next_matching(&mut bob_events, RoomEvent::is_error).await;
    assert_eq!(
        event.error(),
        Some(&RoomError::MessageNotFound("missing".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_persisted_history_survives_restart() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("webtalk.redb");
    let network = MemoryNetwork::new();
    let room_id = RoomId::new("room");

    {
        let storage = Storage::new(&db_path).unwrap();
        let user = storage.load_or_create_identity("alice").unwrap();
        let alice = spawn_room(&network, &room_id, user, storage, RoomConfig::default());
        alice.join().unwrap();
        alice.send_text("remember me").unwrap();
        wait_for_messages(&alice, 1).await;
        alice.shutdown().await;
    }

    let storage = Storage::new(&db_path).unwrap();
    assert_eq!(storage.message_count().unwrap(), 1);
    let user = storage.load_identity().unwrap().unwrap();
    assert_eq!(user.name, "alice");

    let alice = spawn_room(&network, &room_id, user, storage, RoomConfig::default());
    let messages = alice.messages().await.unwrap();
    assert_eq!(messages[0].body, "remember me");

    alice.clear_history().unwrap();
    assert!(alice.messages().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refused_join_returns_to_initial() {
    let (_transport_tx, transport_rx) = tokio::sync::mpsc::unbounded_channel();
    let room = Room::new(
        RoomId::new("room"),
        RefusingTransport {
            peer_id: PeerId::new("p1"),
        },
        transport_rx,
        MemoryMessageStore::new(),
        StaticIdentity::new(UserInfo::new("u-alice", "alice", "")),
    )
    .with_clock(virtual_clock())
    .spawn();
    let mut events = room.subscribe();

    room.join().unwrap();
    let event = next_matching(&mut events, RoomEvent::is_error).await;
    assert!(matches!(event.error(), Some(RoomError::Transport(_))));
    assert!(!room.is_joined().await.unwrap());
    assert!(room.users().await.unwrap().is_empty());

    room.send_text("hello").unwrap();
    let event = next_matching(&mut events, RoomEvent::is_error).await;
    assert_eq!(event.error(), Some(&RoomError::NotJoined));

    room.shutdown().await;
}
