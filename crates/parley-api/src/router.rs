use axum::{
    Json, Router, middleware,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_gateway::connection;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{calls, chats, keys, messages, reactions, receipts, scheduled, sync};

/// The full HTTP surface: REST routes behind bearer auth, the WebSocket
/// gateway (which authenticates its own upgrade), and an open health check.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/{chat_id}/members", post(chats::add_member))
        .route("/chats/{chat_id}/members/{user_id}", delete(chats::remove_member))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/chats/{chat_id}/last-seen",
            get(chats::get_last_seen).post(chats::touch_last_seen),
        )
        .route("/chats/{chat_id}/scheduled", post(scheduled::schedule_message))
        .route("/chats/{chat_id}/calls", get(calls::chat_calls).post(calls::start_call))
        .route("/chats/{chat_id}/batch", post(sync::batch_ingest))
        .route("/chats/{chat_id}/since", get(sync::sync_since))
        .route(
            "/messages/{message_id}",
            put(messages::edit_message).delete(messages::delete_message),
        )
        .route("/messages/{message_id}/thread", get(messages::get_thread))
        .route("/messages/{message_id}/status", put(messages::update_status))
        .route(
            "/messages/{message_id}/reactions",
            get(reactions::list_reactions)
                .post(reactions::add_reaction)
                .delete(reactions::remove_reaction),
        )
        .route("/messages/{message_id}/read", post(receipts::mark_read))
        .route("/messages/{message_id}/reads", get(receipts::list_reads))
        .route("/mentions", get(messages::list_mentions))
        .route("/calls", get(calls::my_calls))
        .route("/calls/{call_id}/end", put(calls::end_call))
        .route("/scheduled", get(scheduled::list_scheduled))
        .route("/scheduled/{id}", delete(scheduled::cancel_scheduled))
        .route("/keys", put(keys::set_public_key))
        .route("/keys/{user_id}", get(keys::get_public_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(connection::ws_upgrade))
        .with_state(state.gateway());

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
