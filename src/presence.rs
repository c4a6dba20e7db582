//! Presence registry: live connections and their user bindings.
//!
//! A user may hold several sockets at once (desktop and phone). Presence is
//! derived from the connection set: a user is online while at least one
//! bound connection survives, and goes offline only when the last one
//! unbinds. The registry holds no store handle; persistence of the online
//! flag is orchestrated one layer up.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Opaque id for one WebSocket connection.
pub type ConnId = Uuid;

/// Outbound channel to one connection's writer task.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Identity a connection authenticated as.
#[derive(Debug, Clone)]
pub struct Binding {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
}

struct ConnEntry {
    binding: Binding,
    sender: ClientSender,
}

/// Registry of authenticated connections.
#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<ConnId, ConnEntry>,
    by_user: DashMap<String, HashSet<ConnId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a user. Returns true if this is the user's
    /// first live connection (the offline→online edge).
    pub fn bind(&self, conn: ConnId, sender: ClientSender, binding: Binding) -> bool {
        let user_id = binding.user_id.clone();
        self.connections.insert(conn, ConnEntry { binding, sender });
        let mut conns = self.by_user.entry(user_id).or_default();
        let first = conns.is_empty();
        conns.insert(conn);
        first
    }

    /// Unbind a connection. Returns the user id and whether this was the
    /// user's last connection (the online→offline edge). `None` if the
    /// connection never authenticated.
    pub fn unbind(&self, conn: ConnId) -> Option<(String, bool)> {
        let (_, entry) = self.connections.remove(&conn)?;
        let user_id = entry.binding.user_id;
        let mut last = false;
        self.by_user.remove_if_mut(&user_id, |_, conns| {
            conns.remove(&conn);
            last = conns.is_empty();
            last
        });
        Some((user_id, last))
    }

    /// Identity a connection is bound to, if any.
    pub fn lookup(&self, conn: ConnId) -> Option<Binding> {
        self.connections.get(&conn).map(|e| e.binding.clone())
    }

    /// All live connections for a user.
    pub fn connections_for_user(&self, user_id: &str) -> Vec<ConnId> {
        self.by_user
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Queue an event to one connection. Returns false if the connection is
    /// unknown or its writer task is gone; callers prune on false.
    pub fn send_to_conn(&self, conn: ConnId, msg: ServerMessage) -> bool {
        match self.connections.get(&conn) {
            Some(entry) => entry.sender.send(msg).is_ok(),
            None => false,
        }
    }

    /// Number of authenticated connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of distinct online users.
    pub fn online_count(&self) -> usize {
        self.by_user.len()
    }
}
