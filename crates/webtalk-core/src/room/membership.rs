//! Presence tracking keyed by logical user
//!
//! One human may be connected over several transport connections (tabs,
//! reconnects). Membership is keyed by `user_id` and each entry carries the
//! set of live `peer_id`s; an entry exists exactly while that set is
//! non-empty.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{PeerId, RoomUser};

/// A user plus the connection that announced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPresence {
    pub user_id: String,
    pub username: String,
    pub user_avatar: String,
    pub peer_id: PeerId,
    pub join_time: i64,
}

/// The set of users present in a room
#[derive(Debug, Clone, Default)]
pub struct Membership {
    users: BTreeMap<String, RoomUser>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for a user, creating the user if needed.
    ///
    /// Identity fields and join time are taken from `presence`; the peer id
    /// is unioned into whatever the user already held. Returns `true` when
    /// the user was not present before.
    pub fn add_peer(&mut self, presence: PeerPresence) -> bool {
        let PeerPresence {
            user_id,
            username,
            user_avatar,
            peer_id,
            join_time,
        } = presence;

        match self.users.get_mut(&user_id) {
            Some(user) => {
                user.username = username;
                user.user_avatar = user_avatar;
                user.join_time = join_time;
                user.peer_ids.insert(peer_id);
                false
            }
            None => {
                let mut peer_ids = BTreeSet::new();
                peer_ids.insert(peer_id);
                self.users.insert(
                    user_id.clone(),
                    RoomUser {
                        user_id,
                        username,
                        user_avatar,
                        peer_ids,
                        join_time,
                    },
                );
                true
            }
        }
    }

    /// Remove one connection of a user, deleting the user when it was the
    /// last. Returns `true` when the user was deleted.
    pub fn remove_peer(&mut self, user_id: &str, peer_id: &PeerId) -> bool {
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        user.peer_ids.remove(peer_id);
        if user.peer_ids.is_empty() {
            self.users.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Drop every user.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// The user holding `peer_id`, if any
    pub fn find_by_peer(&self, peer_id: &PeerId) -> Option<&RoomUser> {
        self.users.values().find(|u| u.has_peer(peer_id))
    }

    pub fn get(&self, user_id: &str) -> Option<&RoomUser> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Users ordered by user id
    pub fn users(&self) -> Vec<RoomUser> {
        self.users.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Total number of live connections across all users
    pub fn peer_count(&self) -> usize {
        self.users.values().map(|u| u.peer_ids.len()).sum()
    }
}
