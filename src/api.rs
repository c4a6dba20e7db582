//! REST query surface.
//!
//! Registration, login, and read-only queries live here; everything
//! real-time goes over the WebSocket. Handlers return
//! `Result<Json<_>, RelayError>` and lean on the error type's
//! `IntoResponse` for status mapping.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::error::{RelayError, Result};
use crate::protocol::{FriendInfo, GroupInfo, MessageEvent, ProfileSnapshot};
use crate::state::RelayState;
use crate::store::{ConversationSummary, UserRecord};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub handle: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}

/// Public view of a user; never carries the credential hash.
#[derive(Debug, Serialize)]
pub struct PublicProfile {
    pub user_id: String,
    pub handle: String,
    pub display_name: String,
    pub is_online: bool,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread: i64,
}

fn public_profile(state: &RelayState, user: &UserRecord) -> PublicProfile {
    PublicProfile {
        user_id: user.id.clone(),
        handle: user.handle.clone(),
        display_name: user.display_name.clone(),
        is_online: state.presence.is_online(&user.id),
        created_at: user.created_at,
    }
}

fn snapshot(state: &RelayState, user: &UserRecord) -> Result<ProfileSnapshot> {
    let friends = state.store.friends_of(&user.id)?;
    let groups = state.store.groups_for_user(&user.id)?;
    Ok(ProfileSnapshot {
        user_id: user.id.clone(),
        handle: user.handle.clone(),
        display_name: user.display_name.clone(),
        friends: friends.iter().map(|f| state.friend_info(f)).collect(),
        groups: groups
            .iter()
            .map(|g| state.group_info(g))
            .collect::<Result<Vec<_>>>()?,
    })
}

/// `POST /api/register`
pub async fn register(
    State(state): State<RelayState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<PublicProfile>> {
    auth::validate_handle(&req.handle)?;
    auth::validate_password(&req.password)?;
    let display_name = if req.display_name.trim().is_empty() {
        // Default to the handle without its sigil.
        req.handle[1..].to_string()
    } else {
        req.display_name.trim().to_string()
    };
    let hash = auth::hash_password(&req.password);
    let user = state.store.create_user(&req.handle, &display_name, &hash)?;
    tracing::info!(handle = %user.handle, "User registered");
    Ok(Json(public_profile(&state, &user)))
}

/// `POST /api/login`: credential check plus a full profile snapshot.
pub async fn login(
    State(state): State<RelayState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ProfileSnapshot>> {
    let user = state
        .store
        .user_by_handle(&req.handle)?
        .ok_or_else(|| RelayError::AccessDenied("invalid credentials".to_string()))?;
    if !auth::verify_password(&req.password, &user.credential_hash) {
        tracing::warn!(handle = %req.handle, "Failed login attempt");
        return Err(RelayError::AccessDenied("invalid credentials".to_string()));
    }
    Ok(Json(snapshot(&state, &user)?))
}

/// `GET /api/users/:id`: accepts a user id or a sigil-prefixed handle.
pub async fn user_profile(
    State(state): State<RelayState>,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>> {
    let user = if id.starts_with(auth::HANDLE_SIGIL) {
        state.store.user_by_handle(&id)?
    } else {
        state.store.user_by_id(&id)?
    };
    let user = user.ok_or_else(|| RelayError::NotFound(format!("no user '{id}'")))?;
    Ok(Json(public_profile(&state, &user)))
}

/// `POST /api/users/:id`: update the mutable part of a profile.
/// The handle is immutable; only the display name can change.
pub async fn update_profile(
    State(state): State<RelayState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<PublicProfile>> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(RelayError::Validation("display name is empty".to_string()));
    }
    if !state.store.update_display_name(&id, display_name)? {
        return Err(RelayError::NotFound(format!("no user '{id}'")));
    }
    let user = state
        .store
        .user_by_id(&id)?
        .ok_or_else(|| RelayError::NotFound(format!("no user '{id}'")))?;
    Ok(Json(public_profile(&state, &user)))
}

/// `GET /api/search/:query`
pub async fn search(
    State(state): State<RelayState>,
    Path(query): Path<String>,
) -> Result<Json<Vec<FriendInfo>>> {
    if query.trim().is_empty() {
        return Err(RelayError::Validation("search query is empty".to_string()));
    }
    let rows = state
        .store
        .search_users(query.trim(), state.config.search_limit)?;
    Ok(Json(rows.iter().map(|r| state.friend_info(r)).collect()))
}

/// `GET /api/history/peer/:user_a/:user_b?limit&offset`
pub async fn peer_history(
    State(state): State<RelayState>,
    Path((user_a, user_b)): Path<(String, String)>,
    Query(page): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageEvent>>> {
    let limit = page.limit.unwrap_or(state.config.history_page);
    let rows = state
        .store
        .peer_history(&user_a, &user_b, limit, page.offset.unwrap_or(0))?;
    Ok(Json(rows.iter().map(MessageEvent::from_row).collect()))
}

/// `GET /api/history/group/:group_id?limit&offset`
pub async fn group_history(
    State(state): State<RelayState>,
    Path(group_id): Path<String>,
    Query(page): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageEvent>>> {
    let limit = page.limit.unwrap_or(state.config.history_page);
    let rows = state
        .store
        .group_history(&group_id, limit, page.offset.unwrap_or(0))?;
    Ok(Json(rows.iter().map(MessageEvent::from_row).collect()))
}

/// `GET /api/users/:id/friends`
pub async fn friends(
    State(state): State<RelayState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<FriendInfo>>> {
    let rows = state.store.friends_of(&user_id)?;
    Ok(Json(rows.iter().map(|r| state.friend_info(r)).collect()))
}

/// `GET /api/users/:id/groups`
pub async fn groups(
    State(state): State<RelayState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<GroupInfo>>> {
    let rows = state.store.groups_for_user(&user_id)?;
    rows.iter()
        .map(|g| state.group_info(g))
        .collect::<Result<Vec<_>>>()
        .map(Json)
}

/// `GET /api/users/:id/conversations`
pub async fn conversations(
    State(state): State<RelayState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>> {
    let rows = state
        .store
        .recent_conversations(&user_id, state.config.history_page)?;
    Ok(Json(rows))
}

/// `GET /api/users/:id/unread`
pub async fn unread(
    State(state): State<RelayState>,
    Path(user_id): Path<String>,
) -> Result<Json<UnreadResponse>> {
    let unread = state.store.unread_count(&user_id)?;
    Ok(Json(UnreadResponse { unread }))
}
