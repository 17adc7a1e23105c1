//! Unary Service Surface RPCs (spec §4.6): `create_room`, `get_room`,
//! `list_rooms`, `load_history`. Rendered as plain Axum JSON handlers, the
//! teacher's `http::chat`/`http::health` style, one function per RPC.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chatroom_core::types::{RoomId, UserId};
use chatroom_store::types::{ChatStyle, LlmConfiguration, Visibility};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::convert;

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub llms: Vec<CreateLlmInput>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLlmInput {
    pub id: String,
    pub model: String,
    pub persona_prompt: String,
    pub display_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chat_style: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

fn parse_chat_style(s: Option<&str>) -> ChatStyle {
    match s {
        Some("conversational") => ChatStyle::Conversational,
        Some("detailed") => ChatStyle::Detailed,
        Some("bullet") => ChatStyle::Bullet,
        _ => ChatStyle::Default,
    }
}

fn parse_visibility(s: Option<&str>) -> Visibility {
    match s {
        Some("private") => Visibility::Private,
        _ => Visibility::Public,
    }
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
}

/// `POST /rooms`
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, (StatusCode, Json<ErrorBody>)> {
    let llms = req
        .llms
        .into_iter()
        .map(|l| LlmConfiguration {
            id: l.id.into(),
            model: l.model,
            persona_prompt: l.persona_prompt,
            display_name: l.display_name,
            title: l.title,
            chat_style: parse_chat_style(l.chat_style.as_deref()),
            avatar: l.avatar,
        })
        .collect();

    let room_id = state
        .store
        .create_room(
            req.name,
            UserId::from(req.created_by),
            llms,
            req.description,
            parse_visibility(req.visibility.as_deref()),
        )
        .map_err(invalid_argument)?;

    Ok(Json(CreateRoomResponse {
        room_id: room_id.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct GetRoomResponse {
    #[serde(flatten)]
    pub room: chatroom_protocol::frames::RoomInfo,
    pub participants: Vec<chatroom_protocol::frames::ParticipantInfo>,
}

/// `GET /rooms/:room_id` — room plus currently *online* participants only
/// (spec §4.6).
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<GetRoomResponse>, (StatusCode, Json<ErrorBody>)> {
    let room_id = RoomId::from(room_id);
    let room = state
        .store
        .get_room(&room_id)
        .await
        .ok_or_else(|| not_found(&room_id))?;

    let online_ids = state.registry.get_online_user_ids(&room_id);
    let participants = state
        .store
        .get_participants(&room_id)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|p| online_ids.contains(&p.user_id))
        .map(|p| convert::participant_info(&p, &online_ids))
        .collect();

    Ok(Json(GetRoomResponse {
        room: convert::room_info(&room),
        participants,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListRoomsQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListRoomsResponse {
    pub rooms: Vec<chatroom_protocol::frames::RoomInfo>,
    pub next_cursor: Option<String>,
}

const DEFAULT_LIST_LIMIT: usize = 20;

/// `GET /rooms?user_id=&limit=&cursor=`
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRoomsQuery>,
) -> Json<ListRoomsResponse> {
    let user_id = query.user_id.map(UserId::from);
    let cursor = query.cursor.map(RoomId::from);
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    let page = state
        .store
        .list_rooms(user_id.as_ref(), limit, cursor.as_ref())
        .await;

    Json(ListRoomsResponse {
        rooms: page.rooms.iter().map(convert::room_info).collect(),
        next_cursor: page.next_cursor.map(|id| id.to_string()),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoadHistoryQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoadHistoryResponse {
    pub messages: Vec<chatroom_protocol::frames::MessageInfo>,
    pub next_cursor: Option<String>,
}

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// `GET /rooms/:room_id/history?limit=&cursor=`
pub async fn load_history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<LoadHistoryQuery>,
) -> Result<Json<LoadHistoryResponse>, (StatusCode, Json<ErrorBody>)> {
    let room_id = RoomId::from(room_id);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let page = state
        .store
        .load_history(&room_id, limit, query.cursor.as_deref())
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, Json(ErrorBody::from(&e))))?;

    Ok(Json(LoadHistoryResponse {
        messages: page.messages.iter().map(convert::message_info).collect(),
        next_cursor: page.next_cursor,
    }))
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&chatroom_core::error::RoomError> for ErrorBody {
    fn from(e: &chatroom_core::error::RoomError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn not_found(room_id: &RoomId) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            code: "ROOM_NOT_FOUND".to_string(),
            message: format!("room not found: {room_id}"),
        }),
    )
}

fn invalid_argument(e: chatroom_core::error::RoomError) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::BAD_REQUEST, Json(ErrorBody::from(&e)))
}
