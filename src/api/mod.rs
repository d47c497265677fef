//! HTTP surface: JSON REST over the relay, the ingestion pipeline and the
//! room store. Errors convert to `(status, {"error": …})` responses.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::db::models::Message;
use crate::db::Database;
use crate::ingest::{IngestError, Ingestor};
use crate::relay::{Relay, RelayError};

const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_ID_LEN: usize = 6;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Ingestor,
    pub relay: Relay,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/upload-pdf", post(upload_pdf))
        .route("/api/chat/create-room", post(create_room))
        .route("/api/chat/send", post(send_message))
        .route("/api/chat/rooms/{room_id}/messages", get(room_messages))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // A malformed upload is the caller's fault, not ours.
            ApiError::Ingest(IngestError::Extract(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    chunks: usize,
}

async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
            file = Some(bytes.to_vec());
        }
    }
    let file = file.ok_or_else(|| ApiError::BadRequest("no file uploaded".into()))?;

    let report = state.ingestor.ingest_pdf(&file).await?;
    Ok(Json(UploadResponse {
        message: "PDF ingested".into(),
        chunks: report.chunks,
    }))
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: String,
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let room = state.db.create_room(&generate_room_id(), &req.username)?;
    Ok(Json(CreateRoomResponse { room_id: room.id }))
}

fn generate_room_id() -> String {
    let mut rng = rand::rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    room_id: String,
    text: String,
    sender: String,
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    state
        .relay
        .handle_message(&req.room_id, &req.text, &req.sender)
        .await?;
    Ok(Json(SendResponse { success: true }))
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

async fn room_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = state.db.room_messages(&room_id)?;
    Ok(Json(MessagesResponse { messages }))
}
