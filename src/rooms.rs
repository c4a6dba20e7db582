//! Room identity and membership.
//!
//! A room is a delivery scope: either the conversation between two users or
//! a group. Room identity is structural: a tagged id, never inferred from
//! the shape of a string. Membership maps rooms to live connection ids;
//! the store, not the room table, decides who is *allowed* in a room.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use crate::presence::ConnId;

/// Identifies a delivery scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Conversation between two users, pair sorted so both directions
    /// name the same room.
    Peer(String, String),
    /// A group's room.
    Group(String),
}

impl RoomId {
    /// Room for a pair of users. Argument order does not matter.
    pub fn peer(user_a: &str, user_b: &str) -> Self {
        if user_a <= user_b {
            RoomId::Peer(user_a.to_string(), user_b.to_string())
        } else {
            RoomId::Peer(user_b.to_string(), user_a.to_string())
        }
    }

    pub fn group(group_id: &str) -> Self {
        RoomId::Group(group_id.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Peer(a, b) => write!(f, "peer:{a}:{b}"),
            RoomId::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Tracks which live connections are joined to which rooms.
///
/// Rooms are created lazily on first subscribe and dropped when their last
/// member leaves; an empty manager after everyone disconnects is the
/// steady state.
#[derive(Default)]
pub struct RoomManager {
    rooms: DashMap<RoomId, HashSet<ConnId>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection to a room. Re-joining is a no-op.
    pub fn subscribe(&self, room: RoomId, conn: ConnId) {
        self.rooms.entry(room).or_default().insert(conn);
    }

    /// Current member connections of a room.
    pub fn members_of(&self, room: &RoomId) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop one connection from one room, removing the room if it empties.
    pub fn prune(&self, room: &RoomId, conn: ConnId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
    }

    /// Drop a connection from every room it joined. Called on disconnect.
    pub fn unsubscribe_all(&self, conn: ConnId) {
        self.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    /// Number of rooms with at least one live member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
