//! REST facade for BindSync
//!
//! ## Endpoint Map
//!
//! | Route                              | Gate          | Description                      |
//! |------------------------------------|---------------|----------------------------------|
//! | `GET /health`                      | none          | Liveness, configured platforms   |
//! | `GET /messages`                    | `X-API-Token` | Stored messages, newest first    |
//! | `GET /messages/:id`                | `X-API-Token` | One stored message               |
//! | `POST /messages`                   | `X-API-Token` | Relay a message to the platforms |
//! | `POST /messages/:id/reply`         | `X-API-Token` | Relay a threaded reply           |
//! | `GET /admin/status`                | none          | Whether setup is pending         |
//! | `POST /admin/register`             | none          | Create the admin account         |
//! | `POST /admin/login`                | none          | Open an admin session            |
//! | `POST /admin/logout`               | `X-Admin-Token` | Close the session              |
//! | `POST, GET /admin/tokens`          | `X-Admin-Token` | Issue / list API tokens        |
//! | `PATCH /admin/tokens/:name/revoke` | `X-Admin-Token` | Deactivate a token             |
//! | `DELETE /admin/tokens/:name`       | `X-Admin-Token` | Remove a token                 |

use crate::auth::{AdminStore, TokenStore};
use crate::error::{Error, Result};
use crate::relay::{DeliveryReceipt, Platform, RelayDispatcher};
use crate::store::{MessageRecord, MAX_LIST_LIMIT};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderName, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post},
    Json, Router,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const API_TOKEN_HEADER: &str = "x-api-token";
const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: RelayDispatcher,
    pub tokens: TokenStore,
    pub admin: AdminStore,
}

/// Build the complete HTTP application
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let messages = Router::new()
        .route("/messages", get(list_messages).post(create_message))
        .route("/messages/:id", get(get_message))
        .route("/messages/:id/reply", post(reply_to_message))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    let admin = Router::new()
        .route("/admin/logout", post(admin_logout))
        .route("/admin/tokens", post(create_token).get(list_tokens))
        .route("/admin/tokens/:name/revoke", patch(revoke_token))
        .route("/admin/tokens/:name", delete(delete_token))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_session,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/admin/status", get(admin_status))
        .route("/admin/register", post(admin_register))
        .route("/admin/login", post(admin_login))
        .merge(messages)
        .merge(admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Extractors
// =============================================================================

/// JSON body whose rejections render as the crate error envelope
struct ApiJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(request: Request, state: &S) -> std::result::Result<Self, Error> {
        Json::<T>::from_request(request, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection: JsonRejection| Error::BadRequest(rejection.body_text()))
    }
}

/// Query string with the same error rendering as [`ApiJson`]
struct ApiQuery<T>(T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Error> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection: QueryRejection| Error::BadRequest(rejection.body_text()))
    }
}

// =============================================================================
// Gates
// =============================================================================

async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let Some(token) = header_str(request.headers(), API_TOKEN_HEADER) else {
        return Err(Error::Unauthorized(
            "API token required in X-API-Token header".to_string(),
        ));
    };
    if !state.tokens.verify(token).await? {
        return Err(Error::Unauthorized("Invalid or expired API token".to_string()));
    }
    Ok(next.run(request).await)
}

async fn require_admin_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let valid = match header_str(request.headers(), ADMIN_TOKEN_HEADER) {
        Some(session) => state.admin.is_session_valid(session).await,
        None => false,
    };
    if !valid {
        return Err(Error::Unauthorized(
            "Admin login required".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    platforms: PlatformHealth,
    storage: StorageHealth,
}

#[derive(Serialize)]
struct PlatformHealth {
    telegram: bool,
    discord: bool,
    slack: bool,
}

#[derive(Serialize)]
struct StorageHealth {
    status: &'static str,
    messages: Option<usize>,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    let storage = match dispatcher.store().count().await {
        Ok(count) => StorageHealth {
            status: "connected",
            messages: Some(count),
        },
        Err(e) => {
            tracing::warn!("Health check could not reach storage: {}", e);
            StorageHealth {
                status: "unavailable",
                messages: None,
            }
        }
    };
    Json(HealthResponse {
        status: if storage.messages.is_some() { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        platforms: PlatformHealth {
            telegram: dispatcher.is_configured(Platform::Telegram),
            discord: dispatcher.is_configured(Platform::Discord),
            slack: dispatcher.is_configured(Platform::Slack),
        },
        storage,
    })
}

// =============================================================================
// Messages
// =============================================================================

fn default_username() -> String {
    "API".to_string()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    text: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    reply_to_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    text: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    target: Option<String>,
}

fn parse_target(target: Option<&str>) -> Result<Option<Platform>> {
    match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => raw.parse().map(Some).map_err(Error::BadRequest),
        None => Ok(None),
    }
}

/// GET /messages
async fn list_messages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<Value>> {
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_LIST_LIMIT as i64) as usize;
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let messages = state.dispatcher.store().list(limit, offset).await?;
    Ok(Json(json!({ "messages": messages })))
}

/// GET /messages/:id
async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageRecord>> {
    state
        .dispatcher
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))
}

/// POST /messages
async fn create_message(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateMessageRequest>,
) -> Result<Json<DeliveryReceipt>> {
    let target = parse_target(request.target.as_deref())?;
    let receipt = state
        .dispatcher
        .post_from_api(
            &request.text,
            &request.username,
            request.reply_to_id.as_deref(),
            target,
        )
        .await?;
    Ok(Json(receipt))
}

/// POST /messages/:id/reply
async fn reply_to_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ReplyRequest>,
) -> Result<Json<DeliveryReceipt>> {
    let target = parse_target(request.target.as_deref())?;
    let receipt = state
        .dispatcher
        .reply_from_api(&id, &request.text, &request.username, target)
        .await?;
    Ok(Json(receipt))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateTokenRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    expires_in_days: Option<i64>,
}

/// GET /admin/status
async fn admin_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.admin.status().await))
}

/// POST /admin/register
async fn admin_register(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<Json<Value>> {
    let admin = state
        .admin
        .register(&credentials.username, &credentials.password)
        .await?;
    Ok(Json(json!({
        "message": "Admin registered successfully",
        "admin": admin,
    })))
}

/// POST /admin/login
async fn admin_login(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<Json<Value>> {
    let session = state
        .admin
        .login(&credentials.username, &credentials.password)
        .await?;
    Ok(Json(json!({
        "message": "Login successful",
        "session_token": session,
    })))
}

/// POST /admin/logout
async fn admin_logout(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    if let Some(session) = header_str(&headers, ADMIN_TOKEN_HEADER) {
        state.admin.logout(session).await;
    }
    Json(json!({ "message": "Logged out successfully" }))
}

/// POST /admin/tokens
async fn create_token(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateTokenRequest>,
) -> Result<Json<Value>> {
    let token = state
        .tokens
        .create(&request.name, request.description, request.expires_in_days)
        .await?;
    Ok(Json(json!({
        "message": "Token created successfully",
        "token": token,
    })))
}

/// GET /admin/tokens
async fn list_tokens(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tokens": state.tokens.list().await }))
}

/// PATCH /admin/tokens/:name/revoke
async fn revoke_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    state.tokens.revoke(&name).await?;
    Ok(Json(json!({
        "message": format!("Token '{}' revoked successfully", name),
    })))
}

/// DELETE /admin/tokens/:name
async fn delete_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    state.tokens.delete(&name).await?;
    Ok(Json(json!({
        "message": format!("Token '{}' deleted successfully", name),
    })))
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(API_TOKEN_HEADER),
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(parsed)
    }
}
