use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use quintet_shared::types::RoomId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
