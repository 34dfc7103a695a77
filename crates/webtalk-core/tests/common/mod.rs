//! Deterministic mesh of room cores on a virtual clock.
//!
//! Effects are routed between cores without tokio: each send is queued with
//! a delivery time and processed in (time, sequence) order.

#![allow(dead_code)]

use webtalk_core::{
    Delivery, Effect, MemoryMessageStore, MessageStore, NormalMessage, PeerId, RoomConfig,
    RoomCore, RoomError, RoomEvent, RoomId, RoomMessage, RoomUser, StoreCommand, TextDraft,
    TransportCommand, TransportEvent, UserInfo,
};

pub struct Node {
    pub core: RoomCore,
    pub store: MemoryMessageStore,
    pub user: UserInfo,
    pub connected: bool,
    /// Every event the core emitted, in order
    pub events: Vec<RoomEvent>,
    /// Every message handed to the transport, in order
    pub sent: Vec<RoomMessage>,
}

impl Node {
    pub fn peer_id(&self) -> PeerId {
        self.core.peer_id().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.store.ids()
    }

    pub fn message(&self, id: &str) -> NormalMessage {
        self.store.get(id).unwrap().expect("message present")
    }

    pub fn errors(&self) -> Vec<RoomError> {
        self.events.iter().filter_map(|e| e.error().cloned()).collect()
    }

    pub fn users(&self) -> Vec<RoomUser> {
        self.core.users()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.core.users().into_iter().map(|u| u.user_id).collect()
    }
}

struct Pending {
    at: i64,
    seq: u64,
    to: PeerId,
    event: TransportEvent,
}

pub struct Mesh {
    pub now: i64,
    seq: u64,
    nodes: Vec<Node>,
    pending: Vec<Pending>,
    config: RoomConfig,
    room_id: RoomId,
}

impl Mesh {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            now: 0,
            seq: 0,
            nodes: Vec::new(),
            pending: Vec::new(),
            config,
            room_id: RoomId::from_host("example.com"),
        }
    }

    pub fn user(id: &str) -> UserInfo {
        UserInfo::new(format!("u-{}", id), id, "")
    }

    /// Open a new connection (tab) for `user`. Returns its node index.
    pub fn add_peer(&mut self, user: UserInfo) -> usize {
        let peer_id = PeerId::new(format!("peer-{}", self.nodes.len()));
        self.nodes.push(Node {
            core: RoomCore::new(self.room_id.clone(), peer_id, self.config.clone()),
            store: MemoryMessageStore::new(),
            user,
            connected: false,
            events: Vec::new(),
            sent: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn node_mut(&mut self, i: usize) -> &mut Node {
        &mut self.nodes[i]
    }

    fn index_of(&self, peer: &PeerId) -> Option<usize> {
        self.nodes.iter().position(|n| n.core.peer_id() == peer)
    }

    pub fn at(&mut self, now: i64) -> &mut Self {
        self.settle();
        self.now = now;
        self
    }

    pub fn join(&mut self, i: usize) {
        let user = self.nodes[i].user.clone();
        let effects = self.nodes[i].core.join(&user, self.now);
        self.apply(i, effects);
    }

    pub fn leave(&mut self, i: usize) {
        let user = self.nodes[i].user.clone();
        let effects = self.nodes[i].core.leave(&user);
        self.apply(i, effects);
    }

    pub fn send_text(&mut self, i: usize, body: &str) -> Option<String> {
        let effects = self.nodes[i].core.send_text(TextDraft::new(body), self.now);
        let id = effects.iter().find_map(|e| match e {
            Effect::Store(StoreCommand::Create(m)) => Some(m.id.clone()),
            _ => None,
        });
        self.apply(i, effects);
        id
    }

    pub fn like(&mut self, i: usize, id: &str) {
        let node = &self.nodes[i];
        let effects =
            node.core
                .send_reaction(&node.store, id, webtalk_core::ReactionKind::Like, self.now);
        self.apply(i, effects);
    }

    pub fn hate(&mut self, i: usize, id: &str) {
        let node = &self.nodes[i];
        let effects =
            node.core
                .send_reaction(&node.store, id, webtalk_core::ReactionKind::Hate, self.now);
        self.apply(i, effects);
    }

    /// Drop a connection without a clean leave.
    pub fn disconnect(&mut self, i: usize) {
        if !self.nodes[i].connected {
            return;
        }
        self.nodes[i].connected = false;
        let peer = self.nodes[i].peer_id();
        self.broadcast_from(i, TransportEvent::PeerLeft(peer), 0);
    }

    /// Inject a raw payload as if `from` had sent it to `to`.
    pub fn inject(&mut self, to: usize, from: &PeerId, payload: &str) {
        let event = TransportEvent::Message {
            from: from.clone(),
            payload: payload.to_string(),
        };
        self.deliver(to, event);
    }

    /// Process queued deliveries until nothing is pending, advancing the
    /// clock to each delivery time.
    pub fn settle(&mut self) {
        while let Some(pos) = self.next_pending() {
            let pending = self.pending.remove(pos);
            self.now = self.now.max(pending.at);
            if let Some(to) = self.index_of(&pending.to) {
                if self.nodes[to].connected {
                    self.deliver(to, pending.event);
                }
            }
        }
    }

    fn next_pending(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.at, p.seq))
            .map(|(i, _)| i)
    }

    fn deliver(&mut self, to: usize, event: TransportEvent) {
        let node = &mut self.nodes[to];
        let effects = node.core.handle_transport(&node.store, event, self.now);
        self.apply(to, effects);
    }

    fn enqueue(&mut self, to: PeerId, event: TransportEvent, delay_ms: i64) {
        self.seq += 1;
        self.pending.push(Pending {
            at: self.now + delay_ms,
            seq: self.seq,
            to,
            event,
        });
    }

    fn broadcast_from(&mut self, from: usize, event: TransportEvent, delay_ms: i64) {
        let others: Vec<PeerId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(j, n)| *j != from && n.connected)
            .map(|(_, n)| n.peer_id())
            .collect();
        for peer in others {
            self.enqueue(peer, event.clone(), delay_ms);
        }
    }

    /// Apply effects the way the room driver does.
    fn apply(&mut self, i: usize, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Store(command) => self.nodes[i].store.apply(command).unwrap(),
                Effect::Emit(event) => self.nodes[i].events.push(event),
                Effect::Transport(TransportCommand::Join) => {
                    if self.nodes[i].connected {
                        continue;
                    }
                    let me = self.nodes[i].peer_id();
                    let others: Vec<PeerId> = self
                        .nodes
                        .iter()
                        .enumerate()
                        .filter(|(j, n)| *j != i && n.connected)
                        .map(|(_, n)| n.peer_id())
                        .collect();
                    for other in others {
                        self.enqueue(other.clone(), TransportEvent::PeerJoined(me.clone()), 0);
                        self.enqueue(me.clone(), TransportEvent::PeerJoined(other), 0);
                    }
                    self.nodes[i].connected = true;
                }
                Effect::Transport(TransportCommand::Leave) => {
                    if self.nodes[i].connected {
                        self.nodes[i].connected = false;
                        let me = self.nodes[i].peer_id();
                        self.broadcast_from(i, TransportEvent::PeerLeft(me), 0);
                    }
                }
                Effect::Transport(TransportCommand::Send {
                    message,
                    targets,
                    delivery,
                }) => {
                    let delay = match delivery {
                        Delivery::Immediate => 0,
                        Delivery::After(d) => d.as_millis() as i64,
                    };
                    if !self.nodes[i].connected {
                        if delivery == Delivery::Immediate {
                            self.nodes[i].events.push(RoomEvent::Error(RoomError::SendFailed(
                                "Connection is not established yet.".to_string(),
                            )));
                            return;
                        }
                        continue;
                    }
                    self.nodes[i].sent.push(message.clone());
                    let payload = message.encode().unwrap();
                    let event = TransportEvent::Message {
                        from: self.nodes[i].peer_id(),
                        payload,
                    };
                    match targets {
                        Some(targets) => {
                            for target in targets {
                                self.enqueue(target, event.clone(), delay);
                            }
                        }
                        None => self.broadcast_from(i, event, delay),
                    }
                }
            }
        }
    }
}

/// A normal message authored by `user` at `send_time`.
pub fn normal(id: &str, user: &UserInfo, send_time: i64) -> NormalMessage {
    NormalMessage {
        id: id.to_string(),
        kind: webtalk_core::MessageType::Normal,
        body: format!("body of {}", id),
        send_time,
        receive_time: send_time,
        user_id: user.id.clone(),
        username: user.name.clone(),
        user_avatar: user.avatar.clone(),
        like_users: vec![],
        hate_users: vec![],
        at_users: vec![],
    }
}
