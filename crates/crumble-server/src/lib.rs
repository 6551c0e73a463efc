pub mod config;
pub mod gameplay;
pub mod gateway;
pub mod health;
pub mod identity;
pub mod matchmaker;
pub mod persist;
pub mod registry;
pub mod room_runtime;
pub mod router;
pub mod state;
pub mod store;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use config::ServerConfig;
use persist::MatchPersistence;
use state::AppState;
use store::SharedStore;

/// Build the Axum router and application state. The store and
/// persistence backends are injected so tests can share one memory store
/// across several in-process "replicas".
pub fn build_app(
    config: ServerConfig,
    store: SharedStore,
    persistence: MatchPersistence,
) -> (Router, AppState) {
    let state = AppState::new(config, store, persistence);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", axum::routing::get(gateway::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

/// Start this replica's long-lived tasks: the matchmaking loop and the
/// bus consumer that fans events out to local sockets.
pub fn spawn_background_tasks(state: &AppState) {
    matchmaker::spawn_match_loop(state.clone());
    router::spawn_event_router(state.clone());
}
