//! Persistence layer: SQLite schema and the store handle.

mod database;
mod schema;

pub use database::{
    ConversationSummary, FriendRow, GroupRow, MessageRow, Store, UserRecord,
};
