use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chatroom_agent::Dispatcher;
use chatroom_core::config::RoomConfig;
use chatroom_provider::{ChatProviderClient, HttpChatProviderClient};
use chatroom_registry::Registry;
use chatroom_store::Store;

/// Central shared state — passed as `Arc<AppState>` to every Axum handler
/// and to each connection's Session Handler task. A single aggregate handle
/// wrapping the Store/Registry/Dispatcher triple this system needs.
pub struct AppState {
    pub config: RoomConfig,
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: RoomConfig) -> Self {
        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());
        let provider: Arc<dyn ChatProviderClient> = Arc::new(HttpChatProviderClient::new(
            config.chat_provider.base_url.clone(),
            config.chat_provider.timeout_ms,
        ));
        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);

        Self {
            config,
            store,
            registry,
            dispatcher,
        }
    }
}

/// Assemble the full Axum router: unary room/history HTTP endpoints plus
/// the bidirectional `RoomSession` WebSocket upgrade.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/rooms",
            post(crate::http::rooms::create_room).get(crate::http::rooms::list_rooms),
        )
        .route("/rooms/{room_id}", get(crate::http::rooms::get_room))
        .route(
            "/rooms/{room_id}/history",
            get(crate::http::rooms::load_history),
        )
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
