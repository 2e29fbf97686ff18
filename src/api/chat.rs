use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::broadcast::{Channel, Event};
use crate::errors::Result;
use crate::manager::{
    chat_manager::{ChatManager, RoomSummary},
    property_manager::PropertyManager,
    ChatMessage, ChatRoom, PropertyId, RoomId,
};
use crate::utils::empty_as_none;
use crate::AppState;

#[derive(Deserialize)]
pub struct OpenRoomRequest {
    property_id: PropertyId,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    body: String,
    client_id: Option<String>,
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    before: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    limit: Option<i64>,
}

#[derive(Serialize)]
pub struct UnreadResponse {
    total_unread: i64,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    updated: u64,
    total_unread: i64,
}

#[tracing::instrument(skip_all)]
pub async fn open_room(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<OpenRoomRequest>,
) -> Result<(StatusCode, Json<ChatRoom>)> {
    let property = PropertyManager::new(&state.pool)
        .get_visible(req.property_id, Some(&user))
        .await?;
    let (room, created) = ChatManager::new(&state.pool)
        .open_room(&property, &user)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(room)))
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<RoomSummary>>> {
    Ok(Json(ChatManager::new(&state.pool).rooms_for(&user).await?))
}

pub async fn unread(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UnreadResponse>> {
    let total_unread = ChatManager::new(&state.pool).total_unread(user.id).await?;
    Ok(Json(UnreadResponse { total_unread }))
}

#[tracing::instrument(skip(state, user, query))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<RoomId>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>> {
    let manager = ChatManager::new(&state.pool);
    let room = manager.participant_room(id, &user).await?;
    Ok(Json(
        manager.list_chats(&room, query.before, query.limit).await?,
    ))
}

#[tracing::instrument(skip(state, user, req))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<RoomId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>)> {
    let manager = ChatManager::new(&state.pool);
    let room = manager.participant_room(id, &user).await?;
    let (message, created) = manager
        .new_chat(&user, &room, &req.body, req.client_id.as_deref())
        .await?;
    if !created {
        return Ok((StatusCode::OK, Json(message)));
    }

    state.hub.publish(
        Channel::Room(room.id),
        Event::MessageSent {
            room_id: room.id,
            message: message.clone(),
        },
    );
    let recipient = room.counterpart(user.id);
    let unread = manager.unread_count(&room, recipient).await?;
    let total_unread = manager.total_unread(recipient).await?;
    state.hub.publish(
        Channel::User(recipient),
        Event::UnreadCount {
            room_id: room.id,
            unread,
            total_unread,
        },
    );

    Ok((StatusCode::CREATED, Json(message)))
}

#[tracing::instrument(skip(state, user))]
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<RoomId>,
) -> Result<Json<MarkReadResponse>> {
    let manager = ChatManager::new(&state.pool);
    let room = manager.participant_room(id, &user).await?;
    let updated = manager.mark_read(&room, &user).await?;
    let total_unread = manager.total_unread(user.id).await?;

    if updated > 0 {
        state.hub.publish(
            Channel::Room(room.id),
            Event::MessagesRead {
                room_id: room.id,
                reader_id: user.id,
            },
        );
    }
    state.hub.publish(
        Channel::User(user.id),
        Event::UnreadCount {
            room_id: room.id,
            unread: 0,
            total_unread,
        },
    );

    Ok(Json(MarkReadResponse {
        updated,
        total_unread,
    }))
}
