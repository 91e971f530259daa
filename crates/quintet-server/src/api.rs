use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use quintet_shared::types::{PeerId, RoomId};

use crate::config::ServerConfig;
use crate::directory::Directory;
use crate::error::ServerError;
use crate::relay::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<Directory>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            directory: Arc::new(Directory::new(config.room_capacity)),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/rooms/:room", get(room_info))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rooms: usize,
    participants: usize,
    room_capacity: usize,
}

#[derive(Serialize)]
struct RoomResponse {
    room: RoomId,
    members: Vec<PeerId>,
    capacity: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.directory.stats();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: stats.rooms,
        participants: stats.participants,
        room_capacity: state.config.room_capacity,
    })
}

async fn room_info(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<RoomResponse>, ServerError> {
    let room = RoomId::new(room);
    let members = state
        .directory
        .members(&room)
        .ok_or_else(|| ServerError::RoomNotFound(room.clone()))?;

    Ok(Json(RoomResponse {
        room,
        members,
        capacity: state.config.room_capacity,
    }))
}

/// Serve on an already bound listener until the server fails.
pub async fn serve(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting relay HTTP server");

    axum::serve(listener, app).await?;

    Ok(())
}
