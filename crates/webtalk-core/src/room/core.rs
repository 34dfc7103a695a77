//! Room reconciliation core
//!
//! [`RoomCore`] is the synchronous heart of a room. Each handler processes
//! one input to completion, updating membership in place and returning the
//! [`Effect`]s the driver must apply: store mutations, transport requests
//! and events. Handlers never touch the store or the transport themselves.

use tracing::{debug, error, info, warn};

use super::events::{Delivery, Effect, RoomEvent, TransportCommand};
use super::history::plan_history_sync;
use super::membership::{Membership, PeerPresence};
use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::protocol::{
    Inbound, ReactionMessage, RoomMessage, SyncHistoryMessage, SyncUserMessage, TextMessage,
};
use crate::store::{MessageStore, StoreCommand};
use crate::transport::TransportEvent;
use crate::types::{
    new_message_id, toggle_reactor, AtUser, NormalMessage, PeerId, RoomId, RoomUser, UserInfo,
};

/// Join state of the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStatus {
    /// Not joined; application sends are rejected
    #[default]
    Initial,
    /// Joined; local user is registered in membership
    Joined,
}

/// Which reaction set a like/hate toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Hate,
}

/// Body and mentions of an outbound text message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDraft {
    pub body: String,
    pub at_users: Vec<AtUser>,
}

impl TextDraft {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            at_users: Vec::new(),
        }
    }

    pub fn with_mentions(mut self, at_users: Vec<AtUser>) -> Self {
        self.at_users = at_users;
        self
    }
}

impl From<&str> for TextDraft {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl From<String> for TextDraft {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

/// Membership and sync state of one room, as seen by one connection
#[derive(Debug, Clone)]
pub struct RoomCore {
    room_id: RoomId,
    peer_id: PeerId,
    config: RoomConfig,
    membership: Membership,
    status: JoinStatus,
}

impl RoomCore {
    pub fn new(room_id: RoomId, peer_id: PeerId, config: RoomConfig) -> Self {
        Self {
            room_id,
            peer_id,
            config,
            membership: Membership::new(),
            status: JoinStatus::Initial,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn status(&self) -> JoinStatus {
        self.status
    }

    pub fn is_joined(&self) -> bool {
        self.status == JoinStatus::Joined
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn users(&self) -> Vec<RoomUser> {
        self.membership.users()
    }

    /// The local user, present only while joined
    pub fn self_user(&self) -> Option<&RoomUser> {
        if !self.is_joined() {
            return None;
        }
        let user = self.membership.find_by_peer(&self.peer_id);
        if user.is_none() {
            error!(peer = %self.peer_id.short(), "Local user missing from membership");
        }
        user
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local Commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Register the local user and connect.
    ///
    /// Membership and events are settled before the transport join effect.
    pub fn join(&mut self, user: &UserInfo, now: i64) -> Vec<Effect> {
        self.membership.add_peer(PeerPresence {
            user_id: user.id.clone(),
            username: user.name.clone(),
            user_avatar: user.avatar.clone(),
            peer_id: self.peer_id.clone(),
            join_time: now,
        });
        self.status = JoinStatus::Joined;
        info!(room = %self.room_id, user_id = %user.id, "Joining room");

        vec![
            Effect::emit(RoomEvent::Joined(self.room_id.clone())),
            Effect::emit(RoomEvent::SelfJoined(self.room_id.clone())),
            Effect::Transport(TransportCommand::Join),
        ]
    }

    /// Disconnect and forget every user. Peers still present announce
    /// themselves again on rejoin.
    pub fn leave(&mut self, user: &UserInfo) -> Vec<Effect> {
        self.membership.clear();
        self.status = JoinStatus::Initial;
        info!(room = %self.room_id, user_id = %user.id, "Leaving room");

        vec![
            Effect::emit(RoomEvent::Left(self.room_id.clone())),
            Effect::emit(RoomEvent::SelfLeft(self.room_id.clone())),
            Effect::Transport(TransportCommand::Leave),
        ]
    }

    /// Undo [`join`](Self::join) after the transport refused to connect.
    pub fn join_failed(&mut self, user: &UserInfo) {
        self.membership.remove_peer(&user.id, &self.peer_id);
        self.status = JoinStatus::Initial;
        warn!(room = %self.room_id, user_id = %user.id, "Join failed, back to initial");
    }

    /// Broadcast a text message and record it locally.
    pub fn send_text(&self, draft: TextDraft, now: i64) -> Vec<Effect> {
        let Some(me) = self.self_user() else {
            warn!("Cannot send message: user not joined to room yet");
            return vec![Effect::error(RoomError::NotJoined)];
        };

        let text = TextMessage {
            id: new_message_id(),
            body: draft.body,
            send_time: now,
            at_users: draft.at_users,
            user_id: me.user_id.clone(),
            username: me.username.clone(),
            user_avatar: me.user_avatar.clone(),
        };
        let message = RoomMessage::Text(text.clone());

        let size = match message.byte_size() {
            Ok(size) => size,
            Err(e) => return vec![Effect::error(e)],
        };
        let limit = self.config.max_message_size;
        if size >= limit {
            warn!(size, limit, "Message too large to send");
            return vec![Effect::error(RoomError::MessageTooLarge { size, limit })];
        }

        vec![
            Effect::broadcast(message),
            Effect::Store(StoreCommand::Create(text.to_normal(now))),
            Effect::emit(RoomEvent::TextSent(text)),
        ]
    }

    /// Toggle the local user's like or hate on a stored message.
    pub fn send_reaction<S>(
        &self,
        store: &S,
        message_id: &str,
        kind: ReactionKind,
        now: i64,
    ) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let Some(me) = self.self_user() else {
            warn!(?kind, "Cannot send reaction: user not joined to room yet");
            return vec![Effect::error(RoomError::NotJoined)];
        };

        let local = match store.get(message_id) {
            Ok(Some(local)) => local,
            Ok(None) => {
                return vec![Effect::error(RoomError::MessageNotFound(
                    message_id.to_string(),
                ))]
            }
            Err(e) => return vec![Effect::error(e)],
        };

        let reaction = ReactionMessage {
            id: message_id.to_string(),
            send_time: now,
            user_id: me.user_id.clone(),
            username: me.username.clone(),
            user_avatar: me.user_avatar.clone(),
        };
        let updated = apply_reaction(local, &reaction, kind, None);

        let (message, event) = match kind {
            ReactionKind::Like => (
                RoomMessage::Like(reaction.clone()),
                RoomEvent::LikeSent(reaction),
            ),
            ReactionKind::Hate => (
                RoomMessage::Hate(reaction.clone()),
                RoomEvent::HateSent(reaction),
            ),
        };

        vec![
            Effect::broadcast(message),
            Effect::Store(StoreCommand::Update(updated)),
            Effect::emit(event),
        ]
    }

    /// Announce the local user to one peer, carrying the local history
    /// cursor.
    pub fn send_sync_user<S>(&self, store: &S, peer_id: &PeerId, now: i64) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let Some(me) = self.self_user() else {
            debug!(peer = %peer_id.short(), "Not joined, skipping user sync");
            return Vec::new();
        };

        let last_message_time = match store.last_message_time() {
            Ok(t) => t,
            Err(e) => return vec![Effect::error(e)],
        };

        let sync = SyncUserMessage {
            id: new_message_id(),
            peer_id: self.peer_id.clone(),
            join_time: me.join_time,
            send_time: now,
            last_message_time,
            user_id: me.user_id.clone(),
            username: me.username.clone(),
            user_avatar: me.user_avatar.clone(),
        };

        vec![
            Effect::unicast(
                RoomMessage::SyncUser(sync.clone()),
                peer_id.clone(),
                Delivery::Immediate,
            ),
            Effect::emit(RoomEvent::SyncUserSent(sync)),
        ]
    }

    /// Push every eligible message newer than `last_message_time` to one
    /// peer, as paced `SyncHistory` payloads.
    pub fn send_sync_history<S>(
        &self,
        store: &S,
        peer_id: &PeerId,
        last_message_time: i64,
        now: i64,
    ) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let Some(me) = self.self_user() else {
            debug!(peer = %peer_id.short(), "Not joined, skipping history sync");
            return Vec::new();
        };

        let messages = match store.list() {
            Ok(messages) => messages,
            Err(e) => return vec![Effect::error(e)],
        };

        let plan = plan_history_sync(
            &me.as_message_user(),
            &messages,
            last_message_time,
            now,
            &self.config,
        );
        if plan.is_empty() {
            return Vec::new();
        }

        info!(
            peer = %peer_id.short(),
            count = plan.message_ids().len(),
            payloads = plan.sends.len(),
            dropped = plan.dropped.len(),
            "Syncing history"
        );

        let mut effects = Vec::with_capacity(plan.sends.len() * 2);
        for send in plan.sends {
            effects.push(Effect::unicast(
                RoomMessage::SyncHistory(send.message.clone()),
                peer_id.clone(),
                Delivery::After(send.delay),
            ));
            effects.push(Effect::emit(RoomEvent::SyncHistorySent(send.message)));
        }
        effects
    }

    /// Remove every message from the local store.
    pub fn clear_history(&self) -> Vec<Effect> {
        vec![Effect::Store(StoreCommand::Clear)]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transport Events
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle one notification from the transport.
    pub fn handle_transport<S>(&mut self, store: &S, event: TransportEvent, now: i64) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        match event {
            TransportEvent::PeerJoined(peer_id) => self.on_peer_joined(store, peer_id, now),
            TransportEvent::PeerLeft(peer_id) => self.on_peer_left(peer_id),
            TransportEvent::Message { from, payload } => {
                debug!(from = %from.short(), len = payload.len(), "Received payload");
                self.on_payload(store, &payload, now)
            }
            TransportEvent::Error(message) => {
                error!(%message, "Transport error");
                vec![Effect::error(RoomError::Transport(message))]
            }
        }
    }

    fn on_peer_joined<S>(&mut self, store: &S, peer_id: PeerId, now: i64) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let mut effects = vec![Effect::emit(RoomEvent::PeerJoined(peer_id.clone()))];
        if peer_id != self.peer_id {
            effects.extend(self.send_sync_user(store, &peer_id, now));
        }
        effects
    }

    fn on_peer_left(&mut self, peer_id: PeerId) -> Vec<Effect> {
        if self.status == JoinStatus::Initial {
            debug!(peer = %peer_id.short(), "Ignoring disconnect after local leave");
            return Vec::new();
        }

        let holder = self
            .membership
            .find_by_peer(&peer_id)
            .map(|u| u.user_id.clone());
        if let Some(user_id) = holder {
            let removed = self.membership.remove_peer(&user_id, &peer_id);
            info!(%user_id, peer = %peer_id.short(), removed, "Peer left");
        }

        vec![Effect::emit(RoomEvent::PeerLeft(peer_id))]
    }

    /// Validate and dispatch one inbound payload.
    pub fn on_payload<S>(&mut self, store: &S, payload: &str, now: i64) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let message = match RoomMessage::decode(payload) {
            Ok(Inbound::Message(message)) => message,
            Ok(Inbound::Unsupported(tag)) => {
                warn!(%tag, "Unsupported message type");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Invalid message format");
                return Vec::new();
            }
        };

        let mut effects = vec![Effect::emit(RoomEvent::MessageReceived(message.clone()))];
        if let RoomMessage::Text(text) = &message {
            effects.push(Effect::emit(RoomEvent::TextReceived(text.clone())));
        }

        match message {
            RoomMessage::SyncUser(sync) => effects.extend(self.on_sync_user(store, sync, now)),
            RoomMessage::SyncHistory(history) => effects.extend(on_sync_history(history)),
            RoomMessage::Text(text) => {
                effects.push(Effect::Store(StoreCommand::Create(text.to_normal(now))));
            }
            RoomMessage::Like(reaction) => {
                effects.extend(on_reaction(store, reaction, ReactionKind::Like, now));
            }
            RoomMessage::Hate(reaction) => {
                effects.extend(on_reaction(store, reaction, ReactionKind::Hate, now));
            }
        }

        effects
    }

    fn on_sync_user<S>(&mut self, store: &S, sync: SyncUserMessage, now: i64) -> Vec<Effect>
    where
        S: MessageStore + ?Sized,
    {
        let is_new = self.membership.add_peer(PeerPresence {
            user_id: sync.user_id.clone(),
            username: sync.username.clone(),
            user_avatar: sync.user_avatar.clone(),
            peer_id: sync.peer_id.clone(),
            join_time: sync.join_time,
        });
        info!(
            user_id = %sync.user_id,
            peer = %sync.peer_id.short(),
            is_new,
            "User synced"
        );

        let local_last = match store.last_message_time() {
            Ok(t) => t,
            Err(e) => return vec![Effect::error(e)],
        };

        if local_last > sync.last_message_time {
            debug!(
                local_last,
                remote_last = sync.last_message_time,
                "Peer is behind, pushing history"
            );
            self.send_sync_history(store, &sync.peer_id, sync.last_message_time, now)
        } else {
            Vec::new()
        }
    }
}

fn on_sync_history(history: SyncHistoryMessage) -> Vec<Effect> {
    debug!(count = history.messages.len(), from = %history.user_id, "Applying history");
    history
        .messages
        .into_iter()
        .map(|m| Effect::Store(StoreCommand::Upsert(m)))
        .collect()
}

fn on_reaction<S>(store: &S, reaction: ReactionMessage, kind: ReactionKind, now: i64) -> Vec<Effect>
where
    S: MessageStore + ?Sized,
{
    match store.get(&reaction.id) {
        Ok(Some(local)) => {
            let updated = apply_reaction(local, &reaction, kind, Some(now));
            vec![Effect::Store(StoreCommand::Update(updated))]
        }
        Ok(None) => {
            debug!(id = %reaction.id, ?kind, "Dropping reaction for unknown message");
            Vec::new()
        }
        Err(e) => vec![Effect::error(e)],
    }
}

/// Toggle the reactor in the set named by `kind`, refreshing the receive
/// time when one is given.
fn apply_reaction(
    mut message: NormalMessage,
    reaction: &ReactionMessage,
    kind: ReactionKind,
    received_at: Option<i64>,
) -> NormalMessage {
    match kind {
        ReactionKind::Like => {
            message.like_users = toggle_reactor(&message.like_users, reaction.reactor());
        }
        ReactionKind::Hate => {
            message.hate_users = toggle_reactor(&message.hate_users, reaction.reactor());
        }
    }
    if let Some(at) = received_at {
        message.receive_time = at;
    }
    message
}
