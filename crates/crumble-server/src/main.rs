use tracing_subscriber::EnvFilter;

use crumble_server::config::ServerConfig;
use crumble_server::persist::MatchPersistence;
use crumble_server::store::SharedStore;
use crumble_server::{build_app, spawn_background_tasks};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let store = match config.redis_url.as_deref() {
        Some(url) => match SharedStore::connect(url).await {
            Ok(store) => {
                tracing::info!(url, "connected to shared store");
                store
            },
            Err(e) => {
                tracing::warn!(
                    url,
                    error = %e,
                    "shared store unreachable, falling back to in-memory single-replica mode"
                );
                SharedStore::in_memory()
            },
        },
        None => {
            tracing::info!("no shared store configured, running in-memory single-replica mode");
            SharedStore::in_memory()
        },
    };

    let (app, state) = build_app(config, store, MatchPersistence::in_memory());
    spawn_background_tasks(&state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {listen_addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!(replica_id = %state.replica_id, "crumble server listening on {listen_addr}");

    axum::serve(listener, app).await.expect("Server error");
}
