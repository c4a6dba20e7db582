//! Courier Relay Server
//!
//! A WebSocket message relay with durable history:
//!
//! 1. **Real-time delivery**: Authenticated clients exchange text messages
//!    one-to-one or in groups; live recipients get events immediately.
//!
//! 2. **Durable history**: Every message is persisted before fan-out, so
//!    offline recipients catch up from history on reconnect. Delivery is
//!    never attempted before the row is written.
//!
//! 3. **Presence**: Friends see each other come online and go offline; a
//!    user with several sockets stays online until the last one closes.

mod api;
mod auth;
mod delivery;
mod error;
mod handler;
mod presence;
mod protocol;
mod rooms;
mod state;
mod store;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "courier-relay", version, about = "Courier message relay server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "COURIER_PORT")]
    port: u16,

    /// Path to the SQLite database file
    #[arg(long, default_value = "courier.db", env = "COURIER_DB")]
    db_path: String,

    /// Default page size for history queries
    #[arg(long, default_value_t = 50, env = "COURIER_HISTORY_PAGE")]
    history_page: usize,

    /// Maximum results returned by user search
    #[arg(long, default_value_t = 10, env = "COURIER_SEARCH_LIMIT")]
    search_limit: usize,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        db_path: Some(args.db_path),
        history_page: args.history_page,
        search_limit: args.search_limit,
    };

    let state = match RelayState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open store");
            std::process::exit(1);
        }
    };

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/api/register", post(api::register))
        .route("/api/login", post(api::login))
        .route("/api/users/:id", get(api::user_profile).post(api::update_profile))
        .route("/api/search/:query", get(api::search))
        .route("/api/history/peer/:user_a/:user_b", get(api::peer_history))
        .route("/api/history/group/:group_id", get(api::group_history))
        .route("/api/users/:id/friends", get(api::friends))
        .route("/api/users/:id/groups", get(api::groups))
        .route("/api/users/:id/conversations", get(api::conversations))
        .route("/api/users/:id/unread", get(api::unread))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Courier relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "courier-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "online_users": state.presence.online_count(),
        "connections": state.presence.connection_count(),
        "active_rooms": state.rooms.room_count(),
        "users": state.store.user_count().unwrap_or(-1),
        "groups": state.store.group_count().unwrap_or(-1),
        "messages": state.store.message_count().unwrap_or(-1),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
