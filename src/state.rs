//! Shared relay state and the orchestration that spans components.
//!
//! `RelayState` is handed explicitly to every handler, never a global. It owns
//! the store, the presence registry, and the room manager, and hosts the
//! operations that touch more than one of them: connection bind/unbind,
//! presence broadcast, and room fan-out.

use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::presence::{Binding, ClientSender, ConnId, PresenceRegistry};
use crate::protocol::{FriendInfo, GroupInfo, ProfileSnapshot, ServerMessage};
use crate::rooms::{RoomId, RoomManager};
use crate::store::{FriendRow, GroupRow, Store, UserRecord};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// `None` opens an in-memory store (tests).
    pub db_path: Option<String>,
    /// Default page size for history queries.
    pub history_page: usize,
    /// Result cap for user search.
    pub search_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: Some("courier.db".to_string()),
            history_page: 50,
            search_limit: 10,
        }
    }
}

/// Shared state, cheap to clone into every handler.
#[derive(Clone)]
pub struct RelayState {
    pub store: Store,
    pub presence: Arc<PresenceRegistry>,
    pub rooms: Arc<RoomManager>,
    pub config: Arc<RelayConfig>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let store = Store::open(config.db_path.as_deref())?;
        Ok(Self {
            store,
            presence: Arc::new(PresenceRegistry::new()),
            rooms: Arc::new(RoomManager::new()),
            config: Arc::new(config),
        })
    }

    /// In-memory state for tests.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(RelayConfig {
            db_path: None,
            ..RelayConfig::default()
        })
        .expect("in-memory store")
    }

    /// Bind a connection to the user behind `handle` and return their
    /// profile snapshot. Joins the connection to its standing rooms and,
    /// on the user's first socket, flips the persisted flag and tells
    /// their friends.
    pub fn authenticate_connection(
        &self,
        conn: ConnId,
        sender: ClientSender,
        handle: &str,
    ) -> Result<ProfileSnapshot> {
        let user = self
            .store
            .user_by_handle(handle)?
            .ok_or_else(|| RelayError::NotFound(format!("no user with handle '{handle}'")))?;

        let friends = self.store.friends_of(&user.id)?;
        let groups = self.store.groups_for_user(&user.id)?;

        let binding = Binding {
            user_id: user.id.clone(),
            handle: user.handle.clone(),
            display_name: user.display_name.clone(),
        };
        let first_socket = self.presence.bind(conn, sender, binding);

        // Standing subscriptions: one peer room per friend, one per group.
        for friend in &friends {
            self.rooms
                .subscribe(RoomId::peer(&user.id, &friend.user_id), conn);
        }
        for group in &groups {
            self.rooms.subscribe(RoomId::group(&group.id), conn);
        }

        if first_socket {
            self.store.set_online(&user.id, true)?;
            self.broadcast_presence(&user, true);
        }

        tracing::info!(handle = %user.handle, %conn, first_socket, "Connection authenticated");
        Ok(self.profile_snapshot(&user, friends, groups))
    }

    /// Tear down a connection. On the user's last socket, flips the
    /// persisted flag and tells their friends. Store failures here are
    /// logged, not propagated; the socket is already gone.
    pub fn disconnect_connection(&self, conn: ConnId) {
        self.rooms.unsubscribe_all(conn);
        let Some((user_id, last_socket)) = self.presence.unbind(conn) else {
            return;
        };
        tracing::info!(%conn, %user_id, last_socket, "Connection closed");
        if !last_socket {
            return;
        }
        match self.store.set_online(&user_id, false) {
            Ok(()) => {
                if let Ok(Some(user)) = self.store.user_by_id(&user_id) {
                    self.broadcast_presence(&user, false);
                }
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Failed to persist offline status");
            }
        }
    }

    /// Tell a user's friends (every socket of each) about a presence edge.
    /// Non-friends never receive presence.
    fn broadcast_presence(&self, user: &UserRecord, is_online: bool) {
        let friends = match self.store.friends_of(&user.id) {
            Ok(friends) => friends,
            Err(e) => {
                tracing::error!(handle = %user.handle, error = %e, "Presence broadcast skipped");
                return;
            }
        };
        let event = ServerMessage::Presence {
            handle: user.handle.clone(),
            is_online,
        };
        for friend in friends {
            for conn in self.presence.connections_for_user(&friend.user_id) {
                self.presence.send_to_conn(conn, event.clone());
            }
        }
    }

    /// Fan an event out to every live member of a room. A dead connection
    /// is pruned, never an error: the message is already durable and the
    /// peer will catch up from history.
    pub fn deliver_to_room(&self, room: &RoomId, msg: &ServerMessage) -> usize {
        let mut delivered = 0;
        for conn in self.rooms.members_of(room) {
            if self.presence.send_to_conn(conn, msg.clone()) {
                delivered += 1;
            } else {
                tracing::debug!(%room, %conn, "Pruning dead room member");
                self.rooms.prune(room, conn);
            }
        }
        delivered
    }

    /// Send an event to every live socket of one user.
    pub fn deliver_to_user(&self, user_id: &str, msg: &ServerMessage) {
        for conn in self.presence.connections_for_user(user_id) {
            self.presence.send_to_conn(conn, msg.clone());
        }
    }

    pub fn friend_info(&self, row: &FriendRow) -> FriendInfo {
        FriendInfo {
            user_id: row.user_id.clone(),
            handle: row.handle.clone(),
            display_name: row.display_name.clone(),
            // Live presence beats the persisted flag.
            is_online: self.presence.is_online(&row.user_id),
        }
    }

    /// Group metadata with its current member handles, for the wire.
    pub fn group_info(&self, group: &GroupRow) -> Result<GroupInfo> {
        let member_handles = self
            .store
            .group_members(&group.id)?
            .into_iter()
            .map(|m| m.handle)
            .collect();
        Ok(GroupInfo {
            group_id: group.id.clone(),
            name: group.name.clone(),
            admin_id: group.admin_id.clone(),
            created_at: group.created_at,
            member_handles,
        })
    }

    fn profile_snapshot(
        &self,
        user: &UserRecord,
        friends: Vec<FriendRow>,
        groups: Vec<GroupRow>,
    ) -> ProfileSnapshot {
        ProfileSnapshot {
            user_id: user.id.clone(),
            handle: user.handle.clone(),
            display_name: user.display_name.clone(),
            friends: friends.iter().map(|f| self.friend_info(f)).collect(),
            groups: groups
                .iter()
                .filter_map(|g| self.group_info(g).ok())
                .collect(),
        }
    }
}
