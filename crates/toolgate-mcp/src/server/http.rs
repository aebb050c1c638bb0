//! HTTP transport: streamable MCP endpoints plus the OAuth surface.
//!
//! Implements "never-failing" connection handling with:
//! - Session-based message buffering
//! - Last-Event-ID replay on reconnection
//! - Broadcast channels for live event delivery
//!
//! The OAuth endpoints (discovery, registration, authorize, token,
//! logout) wrap the auth services; all policy lives there, this module
//! only translates HTTP.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Form, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        Html, IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::rpc::{JsonRpcRequest, RpcHandler, RpcReply, codes};
use super::session::{BufferedEvent, Session, SessionManager};
use crate::auth::pages;
use crate::auth::types::{AuthorizationRequest, AuthorizeRequest, TokenGrant};
use crate::auth::{OAuthService, UserManager};
use crate::config::{self, Config};
use crate::error::AuthError;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct HttpState {
    pub handler: RpcHandler,
    pub sessions: Arc<SessionManager>,
    pub oauth: Arc<OAuthService>,
    pub users: UserManager,
    pub config: Config,
}

/// Query parameters for the MCP endpoints.
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Credential form posted from the login and signup pages, carrying the
/// authorization parameters through as hidden fields.
#[derive(Debug, Deserialize)]
pub struct CredentialForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    scope: Option<String>,
    state: Option<String>,
}

impl CredentialForm {
    fn authorize_request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            response_type: self.response_type.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
        }
    }
}

/// Dynamic client registration body (RFC 7591).
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    redirect_uris: Vec<String>,
    client_name: Option<String>,
}

/// Token endpoint form (RFC 6749 section 4.1.3 / 6).
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
}

/// Create the HTTP router for MCP and OAuth.
pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Streamable HTTP transport - single endpoint
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_get))
        // Legacy SSE transport for backward compatibility
        .route("/sse", get(handle_sse_legacy))
        .route("/message", post(handle_message_post))
        // OAuth discovery and flow
        .route("/.well-known/oauth-protected-resource", get(protected_resource_metadata))
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata))
        .route("/register", post(handle_register))
        .route("/authorize", get(show_login).post(handle_login))
        .route("/signup", get(show_signup).post(handle_signup))
        .route("/token", post(handle_token))
        .route("/logout", post(handle_logout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "toolgate-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let session_count = state.sessions.count().await;
    Json(json!({
        "status": "ready",
        "service": "toolgate-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": if state.config.auth_mode.is_local() { "local" } else { "multiuser" },
        "sessions": session_count,
        "tools": state.handler.dispatcher().registrations().len()
    }))
}

// ─── MCP transport ───────────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn session_ref<'a>(headers: &'a HeaderMap, query: &'a MessageQuery) -> Option<&'a str> {
    headers
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
        .or(query.session_id.as_deref())
}

fn www_authenticate(config: &Config) -> HeaderValue {
    let value = format!(
        "Bearer resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
        config.issuer()
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
}

/// Handle POST requests to /mcp (Streamable HTTP transport).
async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> Response {
    tracing::debug!(method = %req.method, "Handling MCP POST request");

    let session = state.sessions.get_or_create(session_ref(&headers, &query)).await;
    let bearer = bearer_token(&headers);
    let method = req.method.clone();

    let response = match state.handler.handle(req, bearer).await {
        RpcReply::Accepted => return StatusCode::ACCEPTED.into_response(),
        RpcReply::Message(response) => response,
    };

    // Buffer tool results so an SSE reconnect can replay them.
    if method == "tools/call" && response.result.is_some() {
        if let Ok(payload) = serde_json::to_string(&response) {
            session.push_event("message", payload).await;
        }
    }

    let status = if response.error_code() == Some(codes::AUTH_ERROR) {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };

    let mut res = (status, Json(response)).into_response();
    if status == StatusCode::UNAUTHORIZED {
        res.headers_mut().insert(header::WWW_AUTHENTICATE, www_authenticate(&state.config));
    }
    res.headers_mut().insert("Mcp-Session-Id", session.id.to_header_value());
    res
}

/// Handle POST requests to /message (legacy transport).
async fn handle_message_post(
    state: State<Arc<HttpState>>,
    query: Query<MessageQuery>,
    headers: HeaderMap,
    req: Json<JsonRpcRequest>,
) -> Response {
    handle_mcp_post(state, query, headers, req).await
}

/// Handle GET requests to /mcp (SSE stream for server-initiated messages).
async fn handle_mcp_get(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let last_event_id: u64 = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let session = state.sessions.get_or_create(session_ref(&headers, &query)).await;

    tracing::info!(
        session_id = %session.id,
        last_event_id,
        "New SSE stream connection"
    );

    let session_header = session.id.as_str().to_string();
    let stream = build_sse_stream(session, last_event_id).await;

    (
        [
            ("X-Accel-Buffering", "no".to_string()),
            ("Cache-Control", "no-cache, no-store, must-revalidate".to_string()),
            ("Mcp-Session-Id", session_header),
        ],
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
    )
}

/// Legacy SSE endpoint for the old HTTP+SSE transport.
async fn handle_sse_legacy(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let last_event_id: u64 = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    // Legacy connections always get a fresh session and are told where
    // to POST via the initial endpoint event.
    let session = state.sessions.create().await;

    tracing::info!(
        session_id = %session.id,
        last_event_id,
        "New legacy SSE connection"
    );

    let endpoint_url = format!("{}/message?sessionId={}", state.config.issuer(), session.id);
    session.push_event("endpoint", json!({ "endpoint": endpoint_url }).to_string()).await;

    let stream = build_sse_stream(session, 0).await;

    (
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")),
    )
}

/// Build an SSE stream: replay missed events, then live events.
async fn build_sse_stream(
    session: Arc<Session>,
    last_event_id: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let missed = session.events_after(last_event_id).await;
    let replay_stream = stream::iter(missed.into_iter().map(|e| {
        tracing::debug!(event_id = e.id, "Replaying missed event");
        Ok::<_, Infallible>(e.to_sse_event())
    }));

    let receiver = session.subscribe();
    let live_stream =
        BroadcastStream::new(receiver).filter_map(|result: Result<BufferedEvent, _>| async move {
            match result {
                Ok(event) => Some(Ok(event.to_sse_event())),
                Err(e) => {
                    tracing::debug!(error = %e, "Broadcast lag, client will catch up");
                    None
                }
            }
        });

    replay_stream.chain(live_stream)
}

// ─── OAuth surface ───────────────────────────────────────────────────────

async fn protected_resource_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let issuer = state.config.issuer();
    Json(json!({
        "resource": issuer,
        "authorization_servers": [issuer],
        "scopes_supported": [config::oauth::DEFAULT_SCOPE],
        "bearer_methods_supported": ["header"]
    }))
}

async fn authorization_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let issuer = state.config.issuer();
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "registration_endpoint": format!("{issuer}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none"],
        "scopes_supported": [config::oauth::DEFAULT_SCOPE]
    }))
}

async fn handle_register(
    State(state): State<Arc<HttpState>>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    match state.oauth.register_client(body.client_name, body.redirect_uris).await {
        Ok(client) => (
            StatusCode::CREATED,
            Json(json!({
                "client_id": client.client_id,
                "client_name": client.client_name,
                "redirect_uris": client.redirect_uris,
                "token_endpoint_auth_method": "none",
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"]
            })),
        )
            .into_response(),
        Err(err) => oauth_json_reject(&err),
    }
}

async fn show_login(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<AuthorizeRequest>,
) -> Response {
    let request = match state.oauth.begin_authorization(&query).await {
        Ok(request) => request,
        Err(err) => return authorize_reject(&err),
    };

    // Local mode has exactly one user and no credentials to collect:
    // approve immediately as that user.
    if state.config.auth_mode.is_local() {
        return match state.users.ensure_user(&state.config.local_user).await {
            Ok(user) => issue_code_redirect(&state, &request, &user.user_id).await,
            Err(err) => authorize_reject(&err),
        };
    }

    Html(pages::render_login_page(&request, None)).into_response()
}

async fn handle_login(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<CredentialForm>,
) -> Response {
    // Re-validate the carried parameters; hidden fields are as
    // tamperable as the original query.
    let request = match state.oauth.begin_authorization(&form.authorize_request()).await {
        Ok(request) => request,
        Err(err) => return authorize_reject(&err),
    };

    match state.users.authenticate(&form.username, &form.password).await {
        Ok(user) => issue_code_redirect(&state, &request, &user.user_id).await,
        Err(AuthError::AuthenticationFailed) => {
            Html(pages::render_login_page(&request, Some("Invalid username or password")))
                .into_response()
        }
        Err(err) => authorize_reject(&err),
    }
}

async fn show_signup(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<AuthorizeRequest>,
) -> Response {
    match state.oauth.begin_authorization(&query).await {
        Ok(request) => Html(pages::render_signup_page(&request, None)).into_response(),
        Err(err) => authorize_reject(&err),
    }
}

async fn handle_signup(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<CredentialForm>,
) -> Response {
    let request = match state.oauth.begin_authorization(&form.authorize_request()).await {
        Ok(request) => request,
        Err(err) => return authorize_reject(&err),
    };

    match state.users.register(&form.username, &form.password).await {
        Ok(user) => issue_code_redirect(&state, &request, &user.user_id).await,
        Err(err @ (AuthError::UsernameTaken | AuthError::InvalidRegistration(_))) => {
            Html(pages::render_signup_page(&request, Some(&err.to_string()))).into_response()
        }
        Err(err) => authorize_reject(&err),
    }
}

async fn issue_code_redirect(
    state: &HttpState,
    request: &AuthorizationRequest,
    user_id: &str,
) -> Response {
    match state.oauth.grant_code(request, user_id).await {
        Ok(code) => {
            let separator = if request.redirect_uri.contains('?') { '&' } else { '?' };
            let mut target = format!(
                "{}{}code={}",
                request.redirect_uri,
                separator,
                pages::url_encode(&code)
            );
            if let Some(ref s) = request.state {
                target.push_str("&state=");
                target.push_str(&pages::url_encode(s));
            }
            Redirect::to(&target).into_response()
        }
        Err(err) => authorize_reject(&err),
    }
}

fn authorize_reject(err: &AuthError) -> Response {
    let status = if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    };
    tracing::debug!(error = %err, "Rejected authorization request");
    (status, Html(pages::render_error_page(&err.to_string()))).into_response()
}

async fn handle_token(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<TokenForm>,
) -> Response {
    match form.grant_type.as_str() {
        "authorization_code" => {
            let Some(code) = form.code.as_deref() else {
                return invalid_token_request("Missing 'code' parameter");
            };
            let verifier = form.code_verifier.as_deref().unwrap_or("");
            match state
                .oauth
                .redeem_code(code, form.client_id.as_deref(), form.redirect_uri.as_deref(), verifier)
                .await
            {
                Ok(grant) => token_success(&grant),
                Err(err) => oauth_json_reject(&err),
            }
        }
        "refresh_token" => {
            let Some(token) = form.refresh_token.as_deref() else {
                return invalid_token_request("Missing 'refresh_token' parameter");
            };
            match state.oauth.refresh_grant(token, form.client_id.as_deref()).await {
                Ok(grant) => token_success(&grant),
                Err(err) => oauth_json_reject(&err),
            }
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unsupported_grant_type",
                "error_description": format!("Unsupported grant type: {other}")
            })),
        )
            .into_response(),
    }
}

fn invalid_token_request(description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_request", "error_description": description })),
    )
        .into_response()
}

fn oauth_json_reject(err: &AuthError) -> Response {
    let status = if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    };
    tracing::debug!(error = %err, "OAuth request rejected");
    (status, Json(json!({ "error": err.oauth_code(), "error_description": err.to_string() })))
        .into_response()
}

fn token_success(grant: &TokenGrant) -> Response {
    let body = Json(json!({
        "access_token": grant.access_token,
        "token_type": "Bearer",
        "expires_in": grant.expires_in,
        "refresh_token": grant.refresh_token,
        "scope": grant.scope
    }));
    // Token responses must never be cached (RFC 6749 section 5.1).
    ([(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")], body).into_response()
}

async fn handle_logout(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized_response(&state.config);
    };

    let claims = match state.oauth.validate_access(token).await {
        Ok(claims) => claims,
        Err(err) if err.is_transient() => return oauth_json_reject(&err),
        Err(_) => return unauthorized_response(&state.config),
    };

    match state.oauth.revoke_user(&claims.user_id).await {
        Ok(revoked) => {
            state.handler.dispatcher().contexts().remove(&claims.user_id).await;
            tracing::info!(user_id = %claims.user_id, revoked, "User logged out");
            Json(json!({ "status": "logged_out", "revoked_grants": revoked })).into_response()
        }
        Err(err) => oauth_json_reject(&err),
    }
}

fn unauthorized_response(config: &Config) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid_token", "error_description": "Missing or invalid access token" })),
    )
        .into_response();
    response.headers_mut().insert(header::WWW_AUTHENTICATE, www_authenticate(config));
    response
}
