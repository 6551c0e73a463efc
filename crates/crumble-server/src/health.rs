use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub store: &'static str,
    pub replica_id: String,
}

/// Health endpoint: server status, live socket count, and which store
/// backend this replica is coordinating through.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.ws_connection_count.load(Ordering::Relaxed),
        store: state.store.backend_name(),
        replica_id: state.replica_id.clone(),
    })
}
