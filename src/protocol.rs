//! Wire protocol definitions.
//!
//! The relay speaks JSON over WebSocket. Both directions use internally
//! tagged enums so every event carries a `type` field.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::rooms::RoomId;
use crate::store::MessageRow;

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Events sent from a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a registered user.
    /// Must be sent first after connecting.
    Authenticate {
        handle: String,
    },

    /// Send a persisted text message to another user, addressed by handle.
    SendPeerMessage {
        recipient_handle: String,
        body: String,
    },

    /// Send a persisted text message to a group the sender belongs to.
    SendGroupMessage {
        group_id: String,
        body: String,
    },

    /// Create a group. The creator becomes admin and is always a member,
    /// even if omitted from `member_handles`.
    CreateGroup {
        name: String,
        member_handles: Vec<String>,
    },

    /// Add a friend (bidirectional, idempotent).
    AddFriend {
        handle: String,
    },

    /// Remove a friend (both directions).
    RemoveFriend {
        handle: String,
    },

    /// Rename a group (admin only).
    RenameGroup {
        group_id: String,
        name: String,
    },

    /// Remove a member from a group (admin only).
    RemoveMember {
        group_id: String,
        member_handle: String,
    },

    /// Hand group adminship to another current member (admin only).
    TransferAdmin {
        group_id: String,
        new_admin_handle: String,
    },

    /// Delete a group (admin only). Cascades membership, never messages.
    DeleteGroup {
        group_id: String,
    },

    /// Flag peer messages addressed to the caller as read.
    MarkRead {
        message_ids: Vec<i64>,
    },

    /// Delete one of the caller's own messages.
    DeleteMessage {
        message_id: i64,
    },

    /// Keep-alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Events sent from the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication succeeded; carries the caller's profile snapshot.
    Authenticated {
        profile: ProfileSnapshot,
    },

    /// A persisted message delivered to a room this connection belongs to.
    /// Always carries the store-assigned id and timestamp; clients must
    /// never trust a locally generated timestamp.
    Message {
        message: MessageEvent,
    },

    /// A friend's online status changed.
    Presence {
        handle: String,
        is_online: bool,
    },

    /// A friendship now exists (sent to both sides).
    FriendAdded {
        friend: FriendInfo,
    },

    /// A friendship was removed (sent to both sides).
    FriendRemoved {
        handle: String,
    },

    /// A group this user belongs to was created.
    GroupCreated {
        group: GroupInfo,
    },

    /// A group was renamed, lost a member, changed admin, or was deleted.
    GroupUpdated {
        group: GroupInfo,
        change: GroupChange,
    },

    /// Request failed; `kind` is the stable error class.
    Error {
        kind: String,
        message: String,
    },

    /// Generic acknowledgement for fire-and-forget requests.
    Ack {
        id: String,
    },

    /// Keep-alive response.
    Pong,
}

impl ServerMessage {
    /// Build an error event from a core failure.
    pub fn from_error(err: &RelayError) -> Self {
        ServerMessage::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What changed in a `group_updated` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupChange {
    Renamed,
    MemberRemoved,
    AdminTransferred,
    Deleted,
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// A user as seen by their friends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    pub is_online: bool,
}

/// Group metadata plus current member handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub name: String,
    pub admin_id: String,
    pub created_at: i64,
    pub member_handles: Vec<String>,
}

/// The authenticated user's view of themselves, returned on bind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    pub friends: Vec<FriendInfo>,
    pub groups: Vec<GroupInfo>,
}

/// A persisted message as delivered over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Store-assigned, monotonic within the process.
    pub id: i64,
    /// Wire form of the room the message belongs to.
    pub room: String,
    pub sender_id: String,
    pub sender_handle: String,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub body: String,
    pub kind: String,
    /// Store-assigned epoch milliseconds, authoritative for ordering.
    pub timestamp: i64,
    pub is_read: bool,
}

impl MessageEvent {
    /// Build the wire payload for a persisted row. The room is derived from
    /// the row's target, never from the shape of an id string.
    pub fn from_row(row: &MessageRow) -> Self {
        let room = match (&row.recipient_id, &row.group_id) {
            (Some(recipient), _) => RoomId::peer(&row.sender_id, recipient),
            (None, Some(group)) => RoomId::group(group),
            // The store's CHECK constraint makes this unreachable; fall
            // back to a self-pair rather than panicking on bad data.
            (None, None) => RoomId::peer(&row.sender_id, &row.sender_id),
        };
        MessageEvent {
            id: row.id,
            room: room.to_string(),
            sender_id: row.sender_id.clone(),
            sender_handle: row.sender_handle.clone(),
            sender_name: row.sender_display_name.clone(),
            recipient_id: row.recipient_id.clone(),
            group_id: row.group_id.clone(),
            body: row.body.clone(),
            kind: row.kind.clone(),
            timestamp: row.timestamp,
            is_read: row.is_read,
        }
    }
}
