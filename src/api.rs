//! HTTP routes

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::store::RecordedEvent;
use crate::{websocket, AppState};

const DEFAULT_PAGE: i64 = 100;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events))
        .route("/ws", get(websocket::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: i64,
    pub limit: Option<i64>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<RecordedEvent>>> {
    let events = state
        .store
        .list_events(query.after, query.limit.unwrap_or(DEFAULT_PAGE))
        .await?;
    Ok(Json(events))
}
