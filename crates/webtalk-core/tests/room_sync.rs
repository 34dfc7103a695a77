//! Multi-peer scenarios over the deterministic mesh.

mod common;

use common::{normal, Mesh};
use webtalk_core::{MessageStore, PeerId, RoomConfig, RoomError, RoomEvent, RoomMessage};

fn mesh() -> Mesh {
    Mesh::new(RoomConfig::default())
}

#[test]
fn test_rejoin_catches_up_newcomer() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));

    mesh.at(0).join(a);
    mesh.at(10);
    let m1 = mesh.send_text(a, "m1").unwrap();
    mesh.at(20).leave(a);

    mesh.at(30).join(b);
    mesh.settle();
    assert!(mesh.node(b).store.is_empty());
    assert!(!mesh
        .node(b)
        .sent
        .iter()
        .any(|m| matches!(m, RoomMessage::SyncUser(_))));

    mesh.at(40).join(a);
    mesh.settle();

    assert_eq!(mesh.node(b).ids(), vec![m1.clone()]);
    assert_eq!(mesh.node(b).message(&m1).send_time, 10);
    assert_eq!(mesh.node(a).user_ids(), vec!["u-a", "u-b"]);
    assert_eq!(mesh.node(b).user_ids(), vec!["u-a", "u-b"]);

    let a_history = mesh
        .node(a)
        .sent
        .iter()
        .filter(|m| matches!(m, RoomMessage::SyncHistory(_)))
        .count();
    assert_eq!(a_history, 1);
    // B is behind, so it never pushes.
    assert!(!mesh
        .node(b)
        .sent
        .iter()
        .any(|m| matches!(m, RoomMessage::SyncHistory(_))));
}

#[test]
fn test_send_before_join_leaves_store_untouched() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));

    assert!(mesh.send_text(a, "too early").is_none());

    assert!(mesh.node(a).store.is_empty());
    assert!(mesh.node(a).sent.is_empty());
    assert_eq!(mesh.node(a).errors(), vec![RoomError::NotJoined]);
}

#[test]
fn test_oversized_text_yields_one_error_and_no_send() {
    let mut mesh = Mesh::new(RoomConfig::default().with_max_message_size(1024));
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));
    mesh.join(a);
    mesh.join(b);
    mesh.settle();
    let sent_before = mesh.node(a).sent.len();

    mesh.send_text(a, &"x".repeat(2048));
    mesh.settle();

    let errors = mesh.node(a).errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], RoomError::MessageTooLarge { limit: 1024, .. }));
    assert_eq!(mesh.node(a).sent.len(), sent_before);
    assert!(mesh.node(a).store.is_empty());
    assert!(mesh.node(b).store.is_empty());
}

#[test]
fn test_two_tabs_one_user() {
    let mut mesh = mesh();
    let alice = Mesh::user("alice");
    let tab1 = mesh.add_peer(alice.clone());
    let tab2 = mesh.add_peer(alice);
    let bob = mesh.add_peer(Mesh::user("bob"));

    mesh.join(bob);
    mesh.join(tab1);
    mesh.join(tab2);
    mesh.settle();

    let users = mesh.node(bob).users();
    assert_eq!(users.len(), 2);
    let alice_entry = users.iter().find(|u| u.user_id == "u-alice").unwrap();
    assert_eq!(alice_entry.connection_count(), 2);

    mesh.disconnect(tab1);
    mesh.settle();
    let users = mesh.node(bob).users();
    let alice_entry = users.iter().find(|u| u.user_id == "u-alice").unwrap();
    assert_eq!(
        alice_entry.peer_ids.iter().cloned().collect::<Vec<_>>(),
        vec![mesh.node(tab2).peer_id()]
    );

    mesh.leave(tab2);
    mesh.settle();
    assert_eq!(mesh.node(bob).user_ids(), vec!["u-bob"]);
}

#[test]
fn test_live_text_and_reactions_propagate() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));
    mesh.join(a);
    mesh.join(b);
    mesh.settle();

    mesh.at(100);
    let id = mesh.send_text(a, "hello").unwrap();
    mesh.settle();
    assert!(mesh
        .node(b)
        .events
        .iter()
        .any(|e| matches!(e, RoomEvent::TextReceived(t) if t.body == "hello")));

    mesh.at(200).like(b, &id);
    mesh.settle();
    assert!(mesh.node(a).message(&id).is_liked_by("u-b"));
    assert!(mesh.node(b).message(&id).is_liked_by("u-b"));
    assert_eq!(mesh.node(a).message(&id).receive_time, 200);

    mesh.at(300).like(b, &id);
    mesh.hate(b, &id);
    mesh.settle();
    for node in [a, b] {
        let message = mesh.node(node).message(&id);
        assert!(!message.is_liked_by("u-b"));
        assert!(message.is_hated_by("u-b"));
    }
}

#[test]
fn test_reaction_toggle_twice_restores_state() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    mesh.join(a);
    let author = Mesh::user("z");
    mesh.node_mut(a).store.create(normal("m1", &author, 1)).unwrap();
    let original = mesh.node(a).message("m1");

    mesh.hate(a, "m1");
    assert_ne!(mesh.node(a).message("m1"), original);
    mesh.hate(a, "m1");
    assert_eq!(mesh.node(a).message("m1"), original);
}

#[test]
fn test_sync_history_is_idempotent() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    mesh.join(a);

    let author = Mesh::user("z");
    let payload = serde_json::json!({
        "type": "SyncHistory",
        "id": "h1",
        "sendTime": 5,
        "userId": "u-z",
        "username": "z",
        "userAvatar": "",
        "messages": [normal("m1", &author, 1), normal("m2", &author, 2)],
    })
    .to_string();

    let from = PeerId::new("remote");
    mesh.inject(a, &from, &payload);
    let once = mesh.node(a).store.list().unwrap();
    mesh.inject(a, &from, &payload);
    let twice = mesh.node(a).store.list().unwrap();

    assert_eq!(once.len(), 2);
    assert_eq!(once, twice);
}

#[test]
fn test_directional_partial_convergence() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));
    let c = mesh.add_peer(Mesh::user("c"));
    let d = mesh.add_peer(Mesh::user("d"));
    let e = mesh.add_peer(Mesh::user("e"));

    // A and B chat, then go offline.
    mesh.at(0).join(a);
    mesh.join(b);
    mesh.at(10);
    let ab = mesh.send_text(a, "from a").unwrap();
    mesh.settle();
    mesh.at(20).leave(a);
    mesh.leave(b);

    // C and D chat later.
    mesh.at(30).join(c);
    mesh.join(d);
    mesh.at(40);
    let cd = mesh.send_text(c, "from c").unwrap();
    mesh.settle();

    // A and B return: C and D are ahead and push; A and B are behind.
    mesh.at(50).join(a);
    mesh.join(b);
    mesh.settle();

    for node in [a, b] {
        let ids = mesh.node(node).ids();
        assert!(ids.contains(&ab), "node {} lost its own history", node);
        assert!(ids.contains(&cd), "node {} was not caught up", node);
    }
    for node in [c, d] {
        assert!(!mesh.node(node).ids().contains(&ab), "node {} should not converge", node);
    }

    // A newcomer gets everything.
    mesh.at(60).join(e);
    mesh.settle();
    let ids = mesh.node(e).ids();
    assert!(ids.contains(&ab));
    assert!(ids.contains(&cd));
}

#[test]
fn test_large_history_is_split_and_oversized_dropped() {
    let config = RoomConfig::default()
        .with_max_message_size(1500)
        .with_batch_size(4);
    let mut mesh = Mesh::new(config);
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));

    let author = Mesh::user("a");
    {
        let store = &mut mesh.node_mut(a).store;
        for i in 1..=4 {
            let mut m = normal(&format!("m{}", i), &author, i);
            m.body = "y".repeat(600);
            store.create(m).unwrap();
        }
        let mut huge = normal("huge", &author, 5);
        huge.body = "z".repeat(4000);
        store.create(huge).unwrap();
    }

    mesh.at(10).join(a);
    mesh.join(b);
    mesh.settle();

    let histories: Vec<_> = mesh
        .node(a)
        .sent
        .iter()
        .filter_map(|m| match m {
            RoomMessage::SyncHistory(h) => Some(h.messages.len()),
            _ => None,
        })
        .collect();
    assert_eq!(histories, vec![1, 1, 1, 1]);
    assert_eq!(mesh.node(b).ids(), vec!["m1", "m2", "m3", "m4"]);
}

#[test]
fn test_garbage_payload_changes_nothing() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    mesh.join(a);
    let events_before = mesh.node(a).events.len();

    let from = PeerId::new("remote");
    mesh.inject(a, &from, "not json");
    mesh.inject(a, &from, r#"{"type":"Poke","id":"x"}"#);
    mesh.inject(a, &from, r#"{"type":"SyncUser","id":"x"}"#);

    assert_eq!(mesh.node(a).events.len(), events_before);
    assert_eq!(mesh.node(a).user_ids(), vec!["u-a"]);
    assert!(mesh.node(a).store.is_empty());
}

#[test]
fn test_rejoin_drops_users_who_left_while_away() {
    let mut mesh = mesh();
    let a = mesh.add_peer(Mesh::user("a"));
    let b = mesh.add_peer(Mesh::user("b"));

    mesh.at(0).join(a);
    mesh.join(b);
    mesh.settle();
    assert_eq!(mesh.node(a).user_ids(), vec!["u-a", "u-b"]);

    mesh.at(10).leave(a);
    mesh.settle();
    assert!(mesh.node(a).users().is_empty());

    mesh.at(20).leave(b);
    mesh.at(30).join(a);
    mesh.settle();

    assert_eq!(mesh.node(a).user_ids(), vec!["u-a"]);
    let users = mesh.node(a).users();
    assert_eq!(users[0].peer_ids.len(), 1);
    assert!(users[0].has_peer(&mesh.node(a).peer_id()));
}
