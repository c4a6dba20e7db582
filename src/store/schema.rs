//! SQL schema for the relay store.
//!
//! Five tables: users, friends (symmetric, both directions materialized),
//! groups, group_members, and messages. Messages carry exactly one of
//! recipient_id/group_id, enforced by a CHECK constraint in addition to the
//! validation in the delivery engine. `messages.group_id` deliberately has
//! no foreign key: message history outlives group deletion.

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables.
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Registered users
CREATE TABLE IF NOT EXISTS users (
    -- Opaque user id (uuid)
    id TEXT PRIMARY KEY,
    -- Immutable sigil-prefixed handle, e.g. '@alice'
    handle TEXT NOT NULL UNIQUE,
    -- Mutable display name
    display_name TEXT NOT NULL,
    -- salt$digest, hex encoded
    credential_hash TEXT NOT NULL,
    is_online INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_handle ON users(handle);

-- Friendships, stored in both directions at write time.
-- The primary key doubles as the uniqueness constraint that resolves
-- duplicate-add races.
CREATE TABLE IF NOT EXISTS friends (
    user_id TEXT NOT NULL REFERENCES users(id),
    friend_id TEXT NOT NULL REFERENCES users(id),
    status TEXT NOT NULL DEFAULT 'accepted',
    PRIMARY KEY (user_id, friend_id)
);

-- Groups; a single transferable admin
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    admin_id TEXT NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    joined_at INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- Messages. Exactly one of recipient_id / group_id is set.
-- No FK on group_id: rows survive group deletion.
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id TEXT NOT NULL REFERENCES users(id),
    recipient_id TEXT REFERENCES users(id),
    group_id TEXT,
    body TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'text',
    -- Epoch milliseconds, assigned at persistence time
    timestamp INTEGER NOT NULL,
    -- Peer messages only; unused for group messages
    is_read INTEGER NOT NULL DEFAULT 0,
    CHECK ((recipient_id IS NULL) != (group_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, is_read);
CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(group_id);
"#;
