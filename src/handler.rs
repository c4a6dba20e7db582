//! WebSocket connection handling.
//!
//! Each socket gets a fresh connection id and an unbounded outbound queue
//! drained by a writer task, so fan-out from other connections never blocks
//! on this socket's backpressure. A connection must authenticate before any
//! other request is honored.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::delivery;
use crate::error::{RelayError, Result};
use crate::presence::{Binding, ConnId};
use crate::protocol::{ClientMessage, GroupChange, ServerMessage};
use crate::rooms::RoomId;
use crate::state::RelayState;

/// Drive one WebSocket connection from accept to close.
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let conn_id: ConnId = Uuid::new_v4();
    tracing::debug!(%conn_id, "WebSocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Authentication phase: nothing but authenticate (and ping) is honored,
    // and replies go straight out on the socket.
    let greeting = loop {
        let Some(Ok(msg)) = ws_receiver.next().await else {
            tracing::debug!(%conn_id, "Closed before authenticating");
            return;
        };
        let Message::Text(text) = msg else {
            continue;
        };
        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Authenticate { handle }) => {
                match state.authenticate_connection(conn_id, tx.clone(), &handle) {
                    Ok(profile) => break ServerMessage::Authenticated { profile },
                    Err(e) => ServerMessage::from_error(&e),
                }
            }
            Ok(ClientMessage::Ping) => ServerMessage::Pong,
            Ok(_) => ServerMessage::from_error(&RelayError::AccessDenied(
                "must authenticate first".to_string(),
            )),
            Err(e) => ServerMessage::from_error(&RelayError::Validation(format!(
                "malformed message: {e}"
            ))),
        };
        if send_json(&mut ws_sender, &reply).await.is_err() {
            return;
        }
    };

    if send_json(&mut ws_sender, &greeting).await.is_err() {
        state.disconnect_connection(conn_id);
        return;
    }

    // Writer task: drains the outbound queue onto the socket.
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if send_json(&mut ws_sender, &msg).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: dispatch requests until the socket closes.
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        let request = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(request) => request,
                            Err(e) => {
                                let err = RelayError::Validation(format!("malformed message: {e}"));
                                state.presence.send_to_conn(conn_id, ServerMessage::from_error(&err));
                                continue;
                            }
                        };
                        if let Err(e) = dispatch(&state, conn_id, request) {
                            tracing::debug!(%conn_id, error = %e, "Request failed");
                            state.presence.send_to_conn(conn_id, ServerMessage::from_error(&e));
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    state.disconnect_connection(conn_id);
    writer.abort();
    tracing::debug!(%conn_id, "WebSocket closed");
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> std::result::Result<(), ()> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server message");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

/// Handle one authenticated request. Errors bubble to the caller, which
/// reports them on the originating connection.
fn dispatch(state: &RelayState, conn: ConnId, request: ClientMessage) -> Result<()> {
    match request {
        ClientMessage::Authenticate { .. } => Err(RelayError::Validation(
            "connection is already authenticated".to_string(),
        )),
        ClientMessage::Ping => {
            state.presence.send_to_conn(conn, ServerMessage::Pong);
            Ok(())
        }
        ClientMessage::SendPeerMessage {
            recipient_handle,
            body,
        } => {
            delivery::send_peer_message(state, conn, &recipient_handle, &body)?;
            Ok(())
        }
        ClientMessage::SendGroupMessage { group_id, body } => {
            delivery::send_group_message(state, conn, &group_id, &body)?;
            Ok(())
        }
        ClientMessage::AddFriend { handle } => add_friend(state, conn, &handle),
        ClientMessage::RemoveFriend { handle } => remove_friend(state, conn, &handle),
        ClientMessage::CreateGroup {
            name,
            member_handles,
        } => create_group(state, conn, &name, &member_handles),
        ClientMessage::RenameGroup { group_id, name } => {
            rename_group(state, conn, &group_id, &name)
        }
        ClientMessage::RemoveMember {
            group_id,
            member_handle,
        } => remove_member(state, conn, &group_id, &member_handle),
        ClientMessage::TransferAdmin {
            group_id,
            new_admin_handle,
        } => transfer_admin(state, conn, &group_id, &new_admin_handle),
        ClientMessage::DeleteGroup { group_id } => delete_group(state, conn, &group_id),
        ClientMessage::MarkRead { message_ids } => mark_read(state, conn, &message_ids),
        ClientMessage::DeleteMessage { message_id } => delete_message(state, conn, message_id),
    }
}

fn require_binding(state: &RelayState, conn: ConnId) -> Result<Binding> {
    state
        .presence
        .lookup(conn)
        .ok_or_else(|| RelayError::AccessDenied("connection is not authenticated".to_string()))
}

fn add_friend(state: &RelayState, conn: ConnId, handle: &str) -> Result<()> {
    let caller = require_binding(state, conn)?;
    if handle == caller.handle {
        return Err(RelayError::Validation(
            "cannot add yourself as a friend".to_string(),
        ));
    }
    let friend = state
        .store
        .user_by_handle(handle)?
        .ok_or_else(|| RelayError::NotFound(format!("no user with handle '{handle}'")))?;

    state.store.add_friend(&caller.user_id, &friend.id)?;

    // Both sides are now in each other's standing rooms.
    let room = RoomId::peer(&caller.user_id, &friend.id);
    state.rooms.subscribe(room.clone(), conn);
    for friend_conn in state.presence.connections_for_user(&friend.id) {
        state.rooms.subscribe(room.clone(), friend_conn);
    }

    // Each side gets the other's card.
    let caller_user = state
        .store
        .user_by_id(&caller.user_id)?
        .ok_or_else(|| RelayError::NotFound("caller vanished".to_string()))?;
    state.deliver_to_user(
        &caller.user_id,
        &ServerMessage::FriendAdded {
            friend: crate::protocol::FriendInfo {
                user_id: friend.id.clone(),
                handle: friend.handle.clone(),
                display_name: friend.display_name.clone(),
                is_online: state.presence.is_online(&friend.id),
            },
        },
    );
    state.deliver_to_user(
        &friend.id,
        &ServerMessage::FriendAdded {
            friend: crate::protocol::FriendInfo {
                user_id: caller_user.id,
                handle: caller_user.handle,
                display_name: caller_user.display_name,
                is_online: true,
            },
        },
    );
    Ok(())
}

fn remove_friend(state: &RelayState, conn: ConnId, handle: &str) -> Result<()> {
    let caller = require_binding(state, conn)?;
    let friend = state
        .store
        .user_by_handle(handle)?
        .ok_or_else(|| RelayError::NotFound(format!("no user with handle '{handle}'")))?;

    if !state.store.remove_friend(&caller.user_id, &friend.id)? {
        return Err(RelayError::NotFound(format!(
            "'{handle}' is not in your friend list"
        )));
    }

    state.deliver_to_user(
        &caller.user_id,
        &ServerMessage::FriendRemoved {
            handle: friend.handle.clone(),
        },
    );
    state.deliver_to_user(
        &friend.id,
        &ServerMessage::FriendRemoved {
            handle: caller.handle,
        },
    );
    Ok(())
}

fn create_group(
    state: &RelayState,
    conn: ConnId,
    name: &str,
    member_handles: &[String],
) -> Result<()> {
    let caller = require_binding(state, conn)?;
    if name.trim().is_empty() {
        return Err(RelayError::Validation("group name is empty".to_string()));
    }

    // Resolve handles up front; unknown handles are skipped, not fatal.
    let mut member_ids = Vec::new();
    for handle in member_handles {
        match state.store.user_by_handle(handle)? {
            Some(user) => member_ids.push(user.id),
            None => {
                tracing::debug!(%handle, "Skipping unknown handle in group creation");
            }
        }
    }

    let group = state.store.create_group(name, &caller.user_id, &member_ids)?;
    let info = state.group_info(&group)?;

    // Join every live socket of every member, then announce in-room.
    let room = RoomId::group(&group.id);
    state.rooms.subscribe(room.clone(), conn);
    for member in state.store.group_members(&group.id)? {
        for member_conn in state.presence.connections_for_user(&member.user_id) {
            state.rooms.subscribe(room.clone(), member_conn);
        }
    }
    state.deliver_to_room(&room, &ServerMessage::GroupCreated { group: info });
    tracing::info!(group_id = %group.id, admin = %caller.handle, "Group created");
    Ok(())
}

fn require_admin(state: &RelayState, conn: ConnId, group_id: &str) -> Result<(Binding, crate::store::GroupRow)> {
    let caller = require_binding(state, conn)?;
    let group = state
        .store
        .group_row(group_id)?
        .ok_or_else(|| RelayError::NotFound(format!("no group '{group_id}'")))?;
    if group.admin_id != caller.user_id {
        return Err(RelayError::AccessDenied(
            "only the group admin may do that".to_string(),
        ));
    }
    Ok((caller, group))
}

fn rename_group(state: &RelayState, conn: ConnId, group_id: &str, name: &str) -> Result<()> {
    let (caller, group) = require_admin(state, conn, group_id)?;
    if name.trim().is_empty() {
        return Err(RelayError::Validation("group name is empty".to_string()));
    }
    state.store.rename_group(&group.id, &caller.user_id, name)?;

    let group = state
        .store
        .group_row(&group.id)?
        .ok_or_else(|| RelayError::NotFound(format!("no group '{group_id}'")))?;
    let info = state.group_info(&group)?;
    state.deliver_to_room(
        &RoomId::group(&group.id),
        &ServerMessage::GroupUpdated {
            group: info,
            change: GroupChange::Renamed,
        },
    );
    Ok(())
}

fn remove_member(
    state: &RelayState,
    conn: ConnId,
    group_id: &str,
    member_handle: &str,
) -> Result<()> {
    let (caller, group) = require_admin(state, conn, group_id)?;
    let member = state
        .store
        .user_by_handle(member_handle)?
        .ok_or_else(|| RelayError::NotFound(format!("no user with handle '{member_handle}'")))?;
    if member.id == caller.user_id {
        return Err(RelayError::Validation(
            "the admin cannot remove themselves; transfer adminship first".to_string(),
        ));
    }
    if !state.store.remove_group_member(&group.id, &member.id)? {
        return Err(RelayError::NotFound(format!(
            "'{member_handle}' is not a member of '{}'",
            group.name
        )));
    }

    let room = RoomId::group(&group.id);
    let info = state.group_info(&group)?;
    // Announce while the removed member's sockets are still in the room,
    // then evict them.
    state.deliver_to_room(
        &room,
        &ServerMessage::GroupUpdated {
            group: info,
            change: GroupChange::MemberRemoved,
        },
    );
    for member_conn in state.presence.connections_for_user(&member.id) {
        state.rooms.prune(&room, member_conn);
    }
    Ok(())
}

fn transfer_admin(
    state: &RelayState,
    conn: ConnId,
    group_id: &str,
    new_admin_handle: &str,
) -> Result<()> {
    let (caller, group) = require_admin(state, conn, group_id)?;
    let target = state
        .store
        .user_by_handle(new_admin_handle)?
        .ok_or_else(|| {
            RelayError::NotFound(format!("no user with handle '{new_admin_handle}'"))
        })?;
    if !state.store.is_group_member(&group.id, &target.id)? {
        return Err(RelayError::Validation(format!(
            "'{new_admin_handle}' is not a member of '{}'",
            group.name
        )));
    }
    state
        .store
        .transfer_admin(&group.id, &caller.user_id, &target.id)?;

    let group = state
        .store
        .group_row(&group.id)?
        .ok_or_else(|| RelayError::NotFound(format!("no group '{group_id}'")))?;
    let info = state.group_info(&group)?;
    state.deliver_to_room(
        &RoomId::group(&group.id),
        &ServerMessage::GroupUpdated {
            group: info,
            change: GroupChange::AdminTransferred,
        },
    );
    Ok(())
}

fn delete_group(state: &RelayState, conn: ConnId, group_id: &str) -> Result<()> {
    let (caller, group) = require_admin(state, conn, group_id)?;
    let info = state.group_info(&group)?;
    state.store.delete_group(&group.id, &caller.user_id)?;

    let room = RoomId::group(&group.id);
    state.deliver_to_room(
        &room,
        &ServerMessage::GroupUpdated {
            group: info,
            change: GroupChange::Deleted,
        },
    );
    // The room is gone; evict everyone.
    for member_conn in state.rooms.members_of(&room) {
        state.rooms.prune(&room, member_conn);
    }
    tracing::info!(group_id = %group.id, admin = %caller.handle, "Group deleted");
    Ok(())
}

fn mark_read(state: &RelayState, conn: ConnId, message_ids: &[i64]) -> Result<()> {
    let caller = require_binding(state, conn)?;
    state.store.mark_read(&caller.user_id, message_ids)?;
    state.presence.send_to_conn(
        conn,
        ServerMessage::Ack {
            id: "mark_read".to_string(),
        },
    );
    Ok(())
}

fn delete_message(state: &RelayState, conn: ConnId, message_id: i64) -> Result<()> {
    let caller = require_binding(state, conn)?;
    if !state.store.delete_message(message_id, &caller.user_id)? {
        return Err(RelayError::NotFound(format!(
            "message {message_id} not found or not yours"
        )));
    }
    state.presence.send_to_conn(
        conn,
        ServerMessage::Ack {
            id: "delete_message".to_string(),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ClientSender;
    use tokio::sync::mpsc;

    fn client() -> (ClientSender, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    fn connect(state: &RelayState, handle: &str) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
        state.store.create_user(handle, &handle[1..], "salt$hash").ok();
        let conn = Uuid::new_v4();
        let (tx, rx) = client();
        state.authenticate_connection(conn, tx, handle).unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_reauthenticate_rejected() {
        let state = RelayState::in_memory();
        let (conn, _rx) = connect(&state, "@alice");
        let err = dispatch(
            &state,
            conn,
            ClientMessage::Authenticate {
                handle: "@alice".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_add_friend_notifies_both_sides() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        let (_bob_conn, mut bob_rx) = connect(&state, "@bob");

        dispatch(
            &state,
            alice_conn,
            ClientMessage::AddFriend {
                handle: "@bob".to_string(),
            },
        )
        .unwrap();

        let to_alice = drain(&mut alice_rx);
        assert!(to_alice.iter().any(|e| matches!(
            e,
            ServerMessage::FriendAdded { friend } if friend.handle == "@bob"
        )));
        let to_bob = drain(&mut bob_rx);
        assert!(to_bob.iter().any(|e| matches!(
            e,
            ServerMessage::FriendAdded { friend } if friend.handle == "@alice"
        )));
    }

    #[test]
    fn test_add_self_as_friend_rejected() {
        let state = RelayState::in_memory();
        let (conn, _rx) = connect(&state, "@alice");
        let err = dispatch(
            &state,
            conn,
            ClientMessage::AddFriend {
                handle: "@alice".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_remove_friend_notifies_both_sides() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        let (_bob_conn, mut bob_rx) = connect(&state, "@bob");
        dispatch(
            &state,
            alice_conn,
            ClientMessage::AddFriend {
                handle: "@bob".to_string(),
            },
        )
        .unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        dispatch(
            &state,
            alice_conn,
            ClientMessage::RemoveFriend {
                handle: "@bob".to_string(),
            },
        )
        .unwrap();

        assert!(drain(&mut alice_rx).iter().any(|e| matches!(
            e,
            ServerMessage::FriendRemoved { handle } if handle == "@bob"
        )));
        assert!(drain(&mut bob_rx).iter().any(|e| matches!(
            e,
            ServerMessage::FriendRemoved { handle } if handle == "@alice"
        )));
    }

    #[test]
    fn test_remove_nonexistent_friendship() {
        let state = RelayState::in_memory();
        let (conn, _rx) = connect(&state, "@alice");
        state.store.create_user("@bob", "bob", "x").unwrap();
        let err = dispatch(
            &state,
            conn,
            ClientMessage::RemoveFriend {
                handle: "@bob".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[test]
    fn test_create_group_announces_to_live_members() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        let (_bob_conn, mut bob_rx) = connect(&state, "@bob");

        dispatch(
            &state,
            alice_conn,
            ClientMessage::CreateGroup {
                name: "team".to_string(),
                member_handles: vec!["@bob".to_string(), "@ghost".to_string()],
            },
        )
        .unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let created = events.iter().find_map(|e| match e {
                ServerMessage::GroupCreated { group } => Some(group),
                _ => None,
            });
            let group = created.expect("group_created event");
            assert_eq!(group.name, "team");
            // Unknown handles are skipped; admin always present.
            assert_eq!(group.member_handles.len(), 2);
            assert!(group.member_handles.contains(&"@alice".to_string()));
            assert!(group.member_handles.contains(&"@bob".to_string()));
        }
    }

    #[test]
    fn test_group_admin_operations_flow() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        let (bob_conn, mut bob_rx) = connect(&state, "@bob");

        dispatch(
            &state,
            alice_conn,
            ClientMessage::CreateGroup {
                name: "team".to_string(),
                member_handles: vec!["@bob".to_string()],
            },
        )
        .unwrap();
        let group_id = match drain(&mut alice_rx).into_iter().next() {
            Some(ServerMessage::GroupCreated { group }) => group.group_id,
            other => panic!("Expected group_created, got {other:?}"),
        };
        drain(&mut bob_rx);

        // Non-admin cannot rename.
        let err = dispatch(
            &state,
            bob_conn,
            ClientMessage::RenameGroup {
                group_id: group_id.clone(),
                name: "hijacked".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::AccessDenied(_)));

        // Admin renames; both members hear about it.
        dispatch(
            &state,
            alice_conn,
            ClientMessage::RenameGroup {
                group_id: group_id.clone(),
                name: "crew".to_string(),
            },
        )
        .unwrap();
        for rx in [&mut alice_rx, &mut bob_rx] {
            assert!(drain(rx).iter().any(|e| matches!(
                e,
                ServerMessage::GroupUpdated { group, change: GroupChange::Renamed }
                    if group.name == "crew"
            )));
        }

        // Transfer requires the target to be a member.
        let err = dispatch(
            &state,
            alice_conn,
            ClientMessage::TransferAdmin {
                group_id: group_id.clone(),
                new_admin_handle: "@ghost".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        dispatch(
            &state,
            alice_conn,
            ClientMessage::TransferAdmin {
                group_id: group_id.clone(),
                new_admin_handle: "@bob".to_string(),
            },
        )
        .unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Bob is admin now and can delete.
        dispatch(
            &state,
            bob_conn,
            ClientMessage::DeleteGroup {
                group_id: group_id.clone(),
            },
        )
        .unwrap();
        assert!(state.store.group_row(&group_id).unwrap().is_none());
        assert!(drain(&mut alice_rx).iter().any(|e| matches!(
            e,
            ServerMessage::GroupUpdated { change: GroupChange::Deleted, .. }
        )));
    }

    #[test]
    fn test_remove_member_evicts_their_sockets() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        let (bob_conn, mut bob_rx) = connect(&state, "@bob");

        dispatch(
            &state,
            alice_conn,
            ClientMessage::CreateGroup {
                name: "team".to_string(),
                member_handles: vec!["@bob".to_string()],
            },
        )
        .unwrap();
        let group_id = match drain(&mut alice_rx).into_iter().next() {
            Some(ServerMessage::GroupCreated { group }) => group.group_id,
            other => panic!("Expected group_created, got {other:?}"),
        };
        drain(&mut bob_rx);

        dispatch(
            &state,
            alice_conn,
            ClientMessage::RemoveMember {
                group_id: group_id.clone(),
                member_handle: "@bob".to_string(),
            },
        )
        .unwrap();

        // Bob hears the announcement, then loses the subscription.
        assert!(drain(&mut bob_rx).iter().any(|e| matches!(
            e,
            ServerMessage::GroupUpdated { change: GroupChange::MemberRemoved, .. }
        )));
        assert!(!state
            .rooms
            .members_of(&RoomId::group(&group_id))
            .contains(&bob_conn));
        assert!(!state.store.is_group_member(&group_id, &state.store.user_by_handle("@bob").unwrap().unwrap().id).unwrap());
    }

    #[test]
    fn test_admin_cannot_remove_self() {
        let state = RelayState::in_memory();
        let (alice_conn, mut alice_rx) = connect(&state, "@alice");
        dispatch(
            &state,
            alice_conn,
            ClientMessage::CreateGroup {
                name: "solo".to_string(),
                member_handles: vec![],
            },
        )
        .unwrap();
        let group_id = match drain(&mut alice_rx).into_iter().next() {
            Some(ServerMessage::GroupCreated { group }) => group.group_id,
            other => panic!("Expected group_created, got {other:?}"),
        };

        let err = dispatch(
            &state,
            alice_conn,
            ClientMessage::RemoveMember {
                group_id,
                member_handle: "@alice".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_mark_read_acks() {
        let state = RelayState::in_memory();
        let (alice_conn, _alice_rx) = connect(&state, "@alice");
        let (bob_conn, mut bob_rx) = connect(&state, "@bob");

        let event =
            delivery::send_peer_message(&state, alice_conn, "@bob", "read me").unwrap();
        drain(&mut bob_rx);

        dispatch(
            &state,
            bob_conn,
            ClientMessage::MarkRead {
                message_ids: vec![event.id],
            },
        )
        .unwrap();
        assert!(drain(&mut bob_rx).iter().any(|e| matches!(
            e,
            ServerMessage::Ack { id } if id == "mark_read"
        )));
        let bob = state.store.user_by_handle("@bob").unwrap().unwrap();
        assert_eq!(state.store.unread_count(&bob.id).unwrap(), 0);
    }

    #[test]
    fn test_delete_message_guarded() {
        let state = RelayState::in_memory();
        let (alice_conn, _alice_rx) = connect(&state, "@alice");
        let (bob_conn, mut bob_rx) = connect(&state, "@bob");

        let event = delivery::send_peer_message(&state, alice_conn, "@bob", "oops").unwrap();
        drain(&mut bob_rx);

        let err = dispatch(
            &state,
            bob_conn,
            ClientMessage::DeleteMessage {
                message_id: event.id,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        dispatch(
            &state,
            alice_conn,
            ClientMessage::DeleteMessage {
                message_id: event.id,
            },
        )
        .unwrap();
        assert_eq!(state.store.message_count().unwrap(), 0);
    }
}
