//! SQLite-backed persistence store.
//!
//! The store is the source of truth for users, friendships, groups, and
//! message history. A single connection behind a mutex serializes
//! conflicting writes; duplicate friendship/membership inserts resolve via
//! `INSERT OR IGNORE` rather than surfacing constraint errors. Transient
//! busy/locked failures get a bounded retry with linear backoff, never
//! unbounded recursion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::schema;
use crate::error::{RelayError, Result};

/// Maximum attempts for a store operation hitting busy/locked errors.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff between attempts; grows linearly with the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

// ── Records ───────────────────────────────────────────────────────────────────

/// A full user row, credential hash included. Never serialized to the wire.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub credential_hash: String,
    pub is_online: bool,
    pub created_at: i64,
}

/// A user as listed in friend lists, member lists, and search results.
#[derive(Debug, Clone, Serialize)]
pub struct FriendRow {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    pub is_online: bool,
}

/// Group metadata.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub admin_id: String,
    pub created_at: i64,
}

/// A persisted message joined with its sender's identity.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub sender_handle: String,
    pub sender_display_name: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub body: String,
    pub kind: String,
    pub timestamp: i64,
    pub is_read: bool,
}

/// Most recent peer message per conversation partner.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    pub is_online: bool,
    pub last_body: String,
    pub last_timestamp: i64,
    pub last_sender_id: String,
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Handle to the relay's SQLite store. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.sender_id, u.handle, u.display_name, \
     m.recipient_id, m.group_id, m.body, m.kind, m.timestamp, m.is_read \
     FROM messages m JOIN users u ON m.sender_id = u.id";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_handle: row.get(2)?,
        sender_display_name: row.get(3)?,
        recipient_id: row.get(4)?,
        group_id: row.get(5)?,
        body: row.get(6)?,
        kind: row.get(7)?,
        timestamp: row.get(8)?,
        is_read: row.get(9)?,
    })
}

fn friend_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRow> {
    Ok(FriendRow {
        user_id: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        is_online: row.get(3)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        credential_hash: row.get(3)?,
        is_online: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _)
        if e.code == rusqlite::ErrorCode::DatabaseBusy
            || e.code == rusqlite::ErrorCode::DatabaseLocked)
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _)
        if e.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn map_sql(err: rusqlite::Error) -> RelayError {
    if is_busy(&err) {
        RelayError::StoreUnavailable(err.to_string())
    } else {
        RelayError::Database(err.to_string())
    }
}

impl Store {
    /// Open or create a store. `None` opens an in-memory database (tests).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| RelayError::StoreUnavailable(format!("failed to open store: {e}")))?,
            None => Connection::open_in_memory()
                .map_err(|e| RelayError::StoreUnavailable(format!("failed to open store: {e}")))?,
        };
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sql)?;
        conn.busy_timeout(Duration::from_millis(250))
            .map_err(map_sql)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES).map_err(map_sql)?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(map_sql)?;
                tracing::info!(version = schema::SCHEMA_VERSION, "Store schema created");
            }
            Some(v) => {
                tracing::debug!(version = v, "Store schema present");
            }
        }
        Ok(())
    }

    /// Run an operation with bounded retry for busy/locked errors.
    /// The mutex is released between attempts; all other errors return
    /// immediately without retry.
    fn run_raw<T, F>(&self, mut op: F) -> std::result::Result<T, rusqlite::Error>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let mut conn = self.conn.lock();
                op(&mut conn)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Store busy, retrying");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T>,
    {
        self.run_raw(op).map_err(map_sql)
    }

    // ── Users ─────────────────────────────────────────────────────────────

    /// Register a user. Fails validation if the handle is already taken.
    pub fn create_user(
        &self,
        handle: &str,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<UserRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();
        let result = self.run_raw(|conn| {
            conn.execute(
                "INSERT INTO users (id, handle, display_name, credential_hash, is_online, created_at) \
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![id, handle, display_name, credential_hash, created_at],
            )
        });
        match result {
            Ok(_) => Ok(UserRecord {
                id,
                handle: handle.to_string(),
                display_name: display_name.to_string(),
                credential_hash: credential_hash.to_string(),
                is_online: false,
                created_at,
            }),
            Err(e) if is_constraint(&e) => Err(RelayError::Validation(format!(
                "handle '{handle}' is already registered"
            ))),
            Err(e) => Err(map_sql(e)),
        }
    }

    pub fn user_by_handle(&self, handle: &str) -> Result<Option<UserRecord>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT id, handle, display_name, credential_hash, is_online, created_at \
                 FROM users WHERE handle = ?1",
                params![handle],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT id, handle, display_name, credential_hash, is_online, created_at \
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn set_online(&self, user_id: &str, online: bool) -> Result<()> {
        self.run(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?1 WHERE id = ?2",
                params![online, user_id],
            )
        })?;
        Ok(())
    }

    /// Update a user's display name. The handle is immutable.
    pub fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<bool> {
        let changed = self.run(|conn| {
            conn.execute(
                "UPDATE users SET display_name = ?1 WHERE id = ?2",
                params![display_name, user_id],
            )
        })?;
        Ok(changed > 0)
    }

    /// Substring search over handles and display names, bounded result count.
    pub fn search_users(&self, query: &str, limit: usize) -> Result<Vec<FriendRow>> {
        let pattern = format!("%{}%", query);
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, handle, display_name, is_online FROM users \
                 WHERE handle LIKE ?1 OR display_name LIKE ?1 \
                 ORDER BY handle LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit as i64], friend_from_row)?;
            rows.collect()
        })
    }

    // ── Friendships ───────────────────────────────────────────────────────

    /// Create a bidirectional friendship. Idempotent: re-adding an existing
    /// friendship (or racing another add) is a success no-op. Returns true
    /// if any direction was newly written.
    pub fn add_friend(&self, user_id: &str, friend_id: &str) -> Result<bool> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            for (a, b) in [(user_id, friend_id), (friend_id, user_id)] {
                written += tx.execute(
                    "INSERT OR IGNORE INTO friends (user_id, friend_id, status) \
                     VALUES (?1, ?2, 'accepted')",
                    params![a, b],
                )?;
            }
            tx.commit()?;
            Ok(written > 0)
        })
    }

    /// Remove both directions of a friendship.
    pub fn remove_friend(&self, user_id: &str, friend_id: &str) -> Result<bool> {
        let removed = self.run(|conn| {
            conn.execute(
                "DELETE FROM friends WHERE (user_id = ?1 AND friend_id = ?2) \
                 OR (user_id = ?2 AND friend_id = ?1)",
                params![user_id, friend_id],
            )
        })?;
        Ok(removed > 0)
    }

    pub fn friends_of(&self, user_id: &str) -> Result<Vec<FriendRow>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.handle, u.display_name, u.is_online \
                 FROM friends f JOIN users u ON f.friend_id = u.id \
                 WHERE f.user_id = ?1 AND f.status = 'accepted' \
                 ORDER BY u.display_name",
            )?;
            let rows = stmt.query_map(params![user_id], friend_from_row)?;
            rows.collect()
        })
    }

    // ── Groups ────────────────────────────────────────────────────────────

    /// Create a group. The admin is always added as a member even when
    /// omitted from `member_ids`; duplicate member ids are tolerated.
    pub fn create_group(
        &self,
        name: &str,
        admin_id: &str,
        member_ids: &[String],
    ) -> Result<GroupRow> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();
        self.run(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO groups (id, name, admin_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, admin_id, created_at],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) \
                 VALUES (?1, ?2, ?3)",
                params![id, admin_id, created_at],
            )?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) \
                     VALUES (?1, ?2, ?3)",
                    params![id, member, created_at],
                )?;
            }
            tx.commit()?;
            Ok(GroupRow {
                id: id.clone(),
                name: name.to_string(),
                admin_id: admin_id.to_string(),
                created_at,
            })
        })
    }

    pub fn group_row(&self, group_id: &str) -> Result<Option<GroupRow>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT id, name, admin_id, created_at FROM groups WHERE id = ?1",
                params![group_id],
                |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        admin_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn group_members(&self, group_id: &str) -> Result<Vec<FriendRow>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.handle, u.display_name, u.is_online \
                 FROM group_members gm JOIN users u ON gm.user_id = u.id \
                 WHERE gm.group_id = ?1 ORDER BY gm.joined_at",
            )?;
            let rows = stmt.query_map(params![group_id], friend_from_row)?;
            rows.collect()
        })
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.run(|conn| {
            conn.query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }

    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.admin_id, g.created_at \
                 FROM groups g JOIN group_members gm ON g.id = gm.group_id \
                 WHERE gm.user_id = ?1 ORDER BY g.created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(GroupRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    admin_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Rename a group; guarded by the admin id.
    pub fn rename_group(&self, group_id: &str, admin_id: &str, name: &str) -> Result<bool> {
        let changed = self.run(|conn| {
            conn.execute(
                "UPDATE groups SET name = ?1 WHERE id = ?2 AND admin_id = ?3",
                params![name, group_id, admin_id],
            )
        })?;
        Ok(changed > 0)
    }

    /// Hand adminship to another member; guarded by the current admin id.
    pub fn transfer_admin(
        &self,
        group_id: &str,
        current_admin_id: &str,
        new_admin_id: &str,
    ) -> Result<bool> {
        let changed = self.run(|conn| {
            conn.execute(
                "UPDATE groups SET admin_id = ?1 WHERE id = ?2 AND admin_id = ?3",
                params![new_admin_id, group_id, current_admin_id],
            )
        })?;
        Ok(changed > 0)
    }

    pub fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let removed = self.run(|conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
            )
        })?;
        Ok(removed > 0)
    }

    /// Delete a group and cascade its membership rows. Messages are never
    /// cascaded: they are immutable history independent of group lifecycle.
    pub fn delete_group(&self, group_id: &str, admin_id: &str) -> Result<bool> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let is_admin: Option<()> = tx
                .query_row(
                    "SELECT 1 FROM groups WHERE id = ?1 AND admin_id = ?2",
                    params![group_id, admin_id],
                    |_| Ok(()),
                )
                .optional()?;
            if is_admin.is_none() {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1",
                params![group_id],
            )?;
            tx.execute("DELETE FROM groups WHERE id = ?1", params![group_id])?;
            tx.commit()?;
            Ok(true)
        })
    }

    // ── Messages ──────────────────────────────────────────────────────────

    /// Persist a peer message. The store assigns the id and timestamp;
    /// both are authoritative for ordering.
    pub fn insert_peer_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> Result<MessageRow> {
        self.run(|conn| {
            let timestamp = Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO messages (sender_id, recipient_id, body, kind, timestamp) \
                 VALUES (?1, ?2, ?3, 'text', ?4)",
                params![sender_id, recipient_id, body, timestamp],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                params![id],
                message_from_row,
            )
        })
    }

    /// Persist a group message.
    pub fn insert_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        body: &str,
    ) -> Result<MessageRow> {
        self.run(|conn| {
            let timestamp = Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO messages (sender_id, group_id, body, kind, timestamp) \
                 VALUES (?1, ?2, ?3, 'text', ?4)",
                params![sender_id, group_id, body, timestamp],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                params![id],
                message_from_row,
            )
        })
    }

    /// Peer history between two users, chronological (oldest first).
    /// Queried most-recent-first so limit/offset page backwards from the
    /// present, then reversed.
    pub fn peer_history(
        &self,
        user_a: &str,
        user_b: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>> {
        let mut rows: Vec<MessageRow> = self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT} WHERE m.group_id IS NULL \
                 AND ((m.sender_id = ?1 AND m.recipient_id = ?2) \
                   OR (m.sender_id = ?2 AND m.recipient_id = ?1)) \
                 ORDER BY m.timestamp DESC, m.id DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt.query_map(
                params![user_a, user_b, limit as i64, offset as i64],
                message_from_row,
            )?;
            rows.collect()
        })?;
        rows.reverse();
        Ok(rows)
    }

    /// Group history, chronological (oldest first).
    pub fn group_history(
        &self,
        group_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>> {
        let mut rows: Vec<MessageRow> = self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT} WHERE m.group_id = ?1 \
                 ORDER BY m.timestamp DESC, m.id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![group_id, limit as i64, offset as i64],
                message_from_row,
            )?;
            rows.collect()
        })?;
        rows.reverse();
        Ok(rows)
    }

    /// Flag peer messages addressed to `reader_id` as read.
    /// Ids belonging to other recipients are silently skipped.
    pub fn mark_read(&self, reader_id: &str, message_ids: &[i64]) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = message_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE messages SET is_read = 1 \
             WHERE recipient_id = ?1 AND id IN ({placeholders})"
        );
        let changed = self.run(|conn| {
            let mut values: Vec<rusqlite::types::Value> =
                vec![rusqlite::types::Value::Text(reader_id.to_string())];
            values.extend(
                message_ids
                    .iter()
                    .map(|id| rusqlite::types::Value::Integer(*id)),
            );
            conn.execute(&sql, rusqlite::params_from_iter(values))
        })?;
        Ok(changed)
    }

    /// Unread peer messages addressed to a user.
    pub fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.run(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )
        })
    }

    /// The most recent peer message per conversation partner,
    /// most recent conversation first.
    pub fn recent_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.handle, u.display_name, u.is_online, \
                        m.body, m.timestamp, m.sender_id \
                 FROM ( \
                   SELECT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END AS other_id, \
                          MAX(id) AS last_id \
                   FROM messages \
                   WHERE group_id IS NULL AND (sender_id = ?1 OR recipient_id = ?1) \
                   GROUP BY other_id \
                 ) latest \
                 JOIN messages m ON m.id = latest.last_id \
                 JOIN users u ON u.id = latest.other_id \
                 ORDER BY m.timestamp DESC, m.id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                Ok(ConversationSummary {
                    user_id: row.get(0)?,
                    handle: row.get(1)?,
                    display_name: row.get(2)?,
                    is_online: row.get(3)?,
                    last_body: row.get(4)?,
                    last_timestamp: row.get(5)?,
                    last_sender_id: row.get(6)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Sender-initiated deletion; only the sender may delete their message.
    pub fn delete_message(&self, message_id: i64, sender_id: &str) -> Result<bool> {
        let removed = self.run(|conn| {
            conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND sender_id = ?2",
                params![message_id, sender_id],
            )
        })?;
        Ok(removed > 0)
    }

    // ── Counters (for /stats) ─────────────────────────────────────────────

    pub fn user_count(&self) -> Result<i64> {
        self.run(|conn| conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0)))
    }

    pub fn group_count(&self) -> Result<i64> {
        self.run(|conn| conn.query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0)))
    }

    pub fn message_count(&self) -> Result<i64> {
        self.run(|conn| conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open(None).unwrap()
    }

    fn user(store: &Store, handle: &str) -> UserRecord {
        store.create_user(handle, &handle[1..], "salt$hash").unwrap()
    }

    #[test]
    fn test_create_and_lookup_user() {
        let store = store();
        let alice = user(&store, "@alice");
        assert!(!alice.is_online);

        let by_handle = store.user_by_handle("@alice").unwrap().unwrap();
        assert_eq!(by_handle.id, alice.id);

        let by_id = store.user_by_id(&alice.id).unwrap().unwrap();
        assert_eq!(by_id.handle, "@alice");

        assert!(store.user_by_handle("@nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_handle_is_validation_error() {
        let store = store();
        user(&store, "@alice");
        let err = store.create_user("@alice", "Alice 2", "x").unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_online_flag_round_trip() {
        let store = store();
        let alice = user(&store, "@alice");
        store.set_online(&alice.id, true).unwrap();
        assert!(store.user_by_id(&alice.id).unwrap().unwrap().is_online);
        store.set_online(&alice.id, false).unwrap();
        assert!(!store.user_by_id(&alice.id).unwrap().unwrap().is_online);
    }

    #[test]
    fn test_friend_add_is_symmetric() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        assert!(store.add_friend(&alice.id, &bob.id).unwrap());

        let alices = store.friends_of(&alice.id).unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].user_id, bob.id);

        let bobs = store.friends_of(&bob.id).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].user_id, alice.id);
    }

    #[test]
    fn test_friend_add_is_idempotent() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        assert!(store.add_friend(&alice.id, &bob.id).unwrap());
        // Re-adding in either direction is a success no-op.
        assert!(!store.add_friend(&alice.id, &bob.id).unwrap());
        assert!(!store.add_friend(&bob.id, &alice.id).unwrap());

        assert_eq!(store.friends_of(&alice.id).unwrap().len(), 1);
        assert_eq!(store.friends_of(&bob.id).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_friend_add_single_row_pair() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let a = alice.id.clone();
            let b = bob.id.clone();
            handles.push(std::thread::spawn(move || store.add_friend(&a, &b)));
        }
        for h in handles {
            // Every racer sees success, never a constraint crash.
            h.join().unwrap().unwrap();
        }

        assert_eq!(store.friends_of(&alice.id).unwrap().len(), 1);
        assert_eq!(store.friends_of(&bob.id).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_friend_removes_both_directions() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");
        store.add_friend(&alice.id, &bob.id).unwrap();

        assert!(store.remove_friend(&bob.id, &alice.id).unwrap());
        assert!(store.friends_of(&alice.id).unwrap().is_empty());
        assert!(store.friends_of(&bob.id).unwrap().is_empty());
        assert!(!store.remove_friend(&bob.id, &alice.id).unwrap());
    }

    #[test]
    fn test_group_admin_always_member() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        // Admin omitted from the member list on purpose.
        let group = store
            .create_group("team", &alice.id, &[bob.id.clone()])
            .unwrap();

        let members = store.group_members(&group.id).unwrap();
        let ids: Vec<_> = members.iter().map(|m| m.user_id.as_str()).collect();
        assert!(ids.contains(&alice.id.as_str()));
        assert!(ids.contains(&bob.id.as_str()));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_group_duplicate_members_tolerated() {
        let store = store();
        let alice = user(&store, "@alice");
        let group = store
            .create_group("solo", &alice.id, &[alice.id.clone(), alice.id.clone()])
            .unwrap();
        assert_eq!(store.group_members(&group.id).unwrap().len(), 1);
    }

    #[test]
    fn test_group_admin_guards() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");
        let group = store
            .create_group("team", &alice.id, &[bob.id.clone()])
            .unwrap();

        // Non-admin cannot rename, transfer, or delete.
        assert!(!store.rename_group(&group.id, &bob.id, "hijacked").unwrap());
        assert!(!store.transfer_admin(&group.id, &bob.id, &bob.id).unwrap());
        assert!(!store.delete_group(&group.id, &bob.id).unwrap());

        assert!(store.rename_group(&group.id, &alice.id, "crew").unwrap());
        assert_eq!(store.group_row(&group.id).unwrap().unwrap().name, "crew");

        assert!(store.transfer_admin(&group.id, &alice.id, &bob.id).unwrap());
        assert_eq!(
            store.group_row(&group.id).unwrap().unwrap().admin_id,
            bob.id
        );
    }

    #[test]
    fn test_delete_group_cascades_members_not_messages() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");
        let group = store
            .create_group("team", &alice.id, &[bob.id.clone()])
            .unwrap();
        store
            .insert_group_message(&alice.id, &group.id, "for the record")
            .unwrap();

        assert!(store.delete_group(&group.id, &alice.id).unwrap());
        assert!(store.group_row(&group.id).unwrap().is_none());
        assert!(store.group_members(&group.id).unwrap().is_empty());

        // History survives the group.
        let history = store.group_history(&group.id, 10, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "for the record");
    }

    #[test]
    fn test_peer_message_assigns_id_and_timestamp() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        let row = store
            .insert_peer_message(&alice.id, &bob.id, "hello")
            .unwrap();
        assert!(row.id > 0);
        assert!(row.timestamp > 0);
        assert_eq!(row.sender_handle, "@alice");
        assert_eq!(row.recipient_id.as_deref(), Some(bob.id.as_str()));
        assert!(row.group_id.is_none());
        assert!(!row.is_read);
    }

    #[test]
    fn test_peer_history_chronological_with_paging() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        for i in 0..5 {
            // Alternate directions; history covers both.
            let (from, to) = if i % 2 == 0 {
                (&alice.id, &bob.id)
            } else {
                (&bob.id, &alice.id)
            };
            store
                .insert_peer_message(from, to, &format!("msg-{i}"))
                .unwrap();
        }

        let all = store.peer_history(&alice.id, &bob.id, 10, 0).unwrap();
        assert_eq!(all.len(), 5);
        // Oldest first, ids strictly increasing, timestamps never decreasing.
        for pair in all.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert_eq!(all[0].body, "msg-0");
        assert_eq!(all[4].body, "msg-4");

        // offset pages backwards from the present, content stays chronological.
        let older = store.peer_history(&alice.id, &bob.id, 2, 2).unwrap();
        assert_eq!(older.len(), 2);
        assert_eq!(older[0].body, "msg-1");
        assert_eq!(older[1].body, "msg-2");
    }

    #[test]
    fn test_peer_history_excludes_third_parties() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");
        let carol = user(&store, "@carol");

        store.insert_peer_message(&alice.id, &bob.id, "ab").unwrap();
        store
            .insert_peer_message(&alice.id, &carol.id, "ac")
            .unwrap();

        let ab = store.peer_history(&alice.id, &bob.id, 10, 0).unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].body, "ab");
    }

    #[test]
    fn test_mark_read_only_for_recipient() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        let row = store.insert_peer_message(&alice.id, &bob.id, "hi").unwrap();
        assert_eq!(store.unread_count(&bob.id).unwrap(), 1);

        // The sender cannot mark their own outbound message read.
        assert_eq!(store.mark_read(&alice.id, &[row.id]).unwrap(), 0);
        assert_eq!(store.mark_read(&bob.id, &[row.id]).unwrap(), 1);
        assert_eq!(store.unread_count(&bob.id).unwrap(), 0);
    }

    #[test]
    fn test_delete_message_sender_only() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");

        let row = store.insert_peer_message(&alice.id, &bob.id, "oops").unwrap();
        assert!(!store.delete_message(row.id, &bob.id).unwrap());
        assert!(store.delete_message(row.id, &alice.id).unwrap());
        assert!(store.peer_history(&alice.id, &bob.id, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_recent_conversations_latest_per_partner() {
        let store = store();
        let alice = user(&store, "@alice");
        let bob = user(&store, "@bob");
        let carol = user(&store, "@carol");

        store.insert_peer_message(&alice.id, &bob.id, "b1").unwrap();
        store.insert_peer_message(&carol.id, &alice.id, "c1").unwrap();
        store.insert_peer_message(&bob.id, &alice.id, "b2").unwrap();

        let convos = store.recent_conversations(&alice.id, 10).unwrap();
        assert_eq!(convos.len(), 2);
        // Bob's conversation is most recent and shows its latest body.
        assert_eq!(convos[0].user_id, bob.id);
        assert_eq!(convos[0].last_body, "b2");
        assert_eq!(convos[1].user_id, carol.id);
    }

    #[test]
    fn test_search_users_bounded() {
        let store = store();
        for i in 0..15 {
            user(&store, &format!("@tester{i:02}"));
        }
        user(&store, "@other");

        let hits = store.search_users("tester", 10).unwrap();
        assert_eq!(hits.len(), 10);

        let by_name = store.search_users("other", 10).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].handle, "@other");
    }

    #[test]
    fn test_update_display_name() {
        let store = store();
        let alice = user(&store, "@alice");
        assert!(store.update_display_name(&alice.id, "Alice Prime").unwrap());
        assert_eq!(
            store.user_by_id(&alice.id).unwrap().unwrap().display_name,
            "Alice Prime"
        );
        assert!(!store.update_display_name("missing", "x").unwrap());
    }
}
