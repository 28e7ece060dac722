use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, Method},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use mymate_shared::constants::MAX_FRAME_SIZE;
use mymate_shared::protocol::AuthFailureKind;
use mymate_shared::{ChatMessage, ChatSummary, Identity, UserId};
use mymate_store::UserRecord;

use crate::auth::{authenticate, bearer_token, IdentityResolver};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::history::{HistoryQuery, HistoryService};
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::store::{write_blocking, UserDirectory};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
    pub history: HistoryService,
    pub resolver: Arc<dyn IdentityResolver>,
    pub directory: Arc<dyn UserDirectory>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/chats", get(chat_list))
        .route("/api/v1/chats/websocket", get(chat_socket))
        .route("/api/v1/chats/{user_id}", get(chat_history))
        .route("/admin/users/{user_id}", put(admin_upsert_user))
        .route("/admin/users/{user_id}/revoke", post(admin_revoke_tokens))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
    online_users: usize,
}

#[derive(Serialize)]
struct ChatListResponse {
    chats: Vec<ChatSummary>,
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

/// Profile pushed by the account service when a user signs up or edits it.
#[derive(Deserialize)]
struct UserProfile {
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    jwt_version: u32,
}

#[derive(Serialize)]
struct RevokeResponse {
    jwt_version: u32,
    closed_connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connection_count().await,
        online_users: state.registry.online_users().await,
    })
}

/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels in the query string. Rejections are reported in-band after the
/// upgrade.
async fn chat_socket(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.unwrap_or_default();
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| ws::handle_socket(socket, state, token))
}

async fn chat_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChatListResponse>, ServerError> {
    let identity = caller(&state, &headers).await?;
    let chats = state.history.chat_list(identity.id).await?;
    Ok(Json(ChatListResponse { chats }))
}

async fn chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let identity = caller(&state, &headers).await?;
    let counterpart = parse_user_id(&user_id)?;
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    let messages = state.history.history(identity.id, counterpart, query).await?;
    Ok(Json(HistoryResponse { messages }))
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<Identity, ServerError> {
    let token = bearer_token(headers).ok_or(ServerError::Unauthorized(AuthFailureKind::Invalid))?;
    Ok(authenticate(&state.resolver, token, state.config.request_timeout).await?)
}

fn parse_user_id(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Create or update the chat-side copy of a user profile.
async fn admin_upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserRecord>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let id = parse_user_id(&user_id)?;

    let mut record = UserRecord::new(id, profile.first_name, profile.last_name);
    record.avatar_url = profile.avatar_url;
    record.jwt_version = profile.jwt_version;

    let stored = write_blocking(&state.directory, state.config.request_timeout, move |dir, _| {
        dir.upsert_user(&record)
    })
    .await?;

    info!(user = %id, jwt_version = stored.jwt_version, "User profile synced");
    Ok(Json(stored))
}

/// Revoke every token of a user and close the sockets opened with them.
async fn admin_revoke_tokens(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RevokeResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let id = parse_user_id(&user_id)?;

    let jwt_version = write_blocking(&state.directory, state.config.request_timeout, move |dir, _| {
        dir.revoke_tokens(id)
    })
    .await?;

    let mut closed_connections = 0;
    for channel in state.registry.channels_of(id).await {
        if state.registry.unregister(&channel).await {
            closed_connections += 1;
        }
    }

    info!(user = %id, jwt_version, closed_connections, "User tokens revoked");
    Ok(Json(RevokeResponse {
        jwt_version,
        closed_connections,
    }))
}

/// Start the HTTP server on the given address.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
