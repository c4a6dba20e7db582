//! The delivery engine: validate, persist, then fan out.
//!
//! A message is never delivered before it is durable. The pipeline is
//! strictly received → validated → persisted → fanned-out; a store failure
//! aborts the request with no delivery, while a fan-out failure (dead
//! socket) is absorbed; the row is already written and the peer reads it
//! from history on reconnect.

use crate::error::{RelayError, Result};
use crate::presence::{Binding, ConnId};
use crate::protocol::{MessageEvent, ServerMessage};
use crate::rooms::RoomId;
use crate::state::RelayState;

fn sender_binding(state: &RelayState, conn: ConnId) -> Result<Binding> {
    state
        .presence
        .lookup(conn)
        .ok_or_else(|| RelayError::AccessDenied("connection is not authenticated".to_string()))
}

fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(RelayError::Validation("message body is empty".to_string()));
    }
    Ok(())
}

/// Send a persisted text message to another user, addressed by handle.
///
/// The recipient does not need to be a friend or online: the row is written
/// regardless, and live sockets on both sides get the event immediately.
pub fn send_peer_message(
    state: &RelayState,
    conn: ConnId,
    recipient_handle: &str,
    body: &str,
) -> Result<MessageEvent> {
    let sender = sender_binding(state, conn)?;
    validate_body(body)?;

    let recipient = state
        .store
        .user_by_handle(recipient_handle)?
        .ok_or_else(|| {
            RelayError::NotFound(format!("no user with handle '{recipient_handle}'"))
        })?;
    if recipient.id == sender.user_id {
        return Err(RelayError::Validation(
            "cannot send a message to yourself".to_string(),
        ));
    }

    let row = state
        .store
        .insert_peer_message(&sender.user_id, &recipient.id, body)?;

    // Lazy join: the room may not exist yet if the pair never became
    // friends. Subscribe the sender and every recipient socket now.
    let room = RoomId::peer(&sender.user_id, &recipient.id);
    state.rooms.subscribe(room.clone(), conn);
    for recipient_conn in state.presence.connections_for_user(&recipient.id) {
        state.rooms.subscribe(room.clone(), recipient_conn);
    }

    let event = MessageEvent::from_row(&row);
    let delivered = state.deliver_to_room(
        &room,
        &ServerMessage::Message {
            message: event.clone(),
        },
    );
    tracing::debug!(
        message_id = event.id,
        room = %room,
        delivered,
        "Peer message fanned out"
    );
    Ok(event)
}

/// Send a persisted text message to a group the sender belongs to.
pub fn send_group_message(
    state: &RelayState,
    conn: ConnId,
    group_id: &str,
    body: &str,
) -> Result<MessageEvent> {
    let sender = sender_binding(state, conn)?;
    validate_body(body)?;

    let group = state
        .store
        .group_row(group_id)?
        .ok_or_else(|| RelayError::NotFound(format!("no group '{group_id}'")))?;
    if !state.store.is_group_member(&group.id, &sender.user_id)? {
        tracing::warn!(
            handle = %sender.handle,
            group_id = %group.id,
            "Rejected group message from non-member"
        );
        return Err(RelayError::AccessDenied(format!(
            "not a member of group '{}'",
            group.name
        )));
    }

    let row = state
        .store
        .insert_group_message(&sender.user_id, &group.id, body)?;

    // Members joined at authenticate time; the sender may have created or
    // joined the group on this connection, so join lazily here.
    let room = RoomId::group(&group.id);
    state.rooms.subscribe(room.clone(), conn);

    let event = MessageEvent::from_row(&row);
    let delivered = state.deliver_to_room(
        &room,
        &ServerMessage::Message {
            message: event.clone(),
        },
    );
    tracing::debug!(
        message_id = event.id,
        room = %room,
        delivered,
        "Group message fanned out"
    );
    Ok(event)
}
