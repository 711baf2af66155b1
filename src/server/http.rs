use super::http_auth::{authenticate, extract_bearer_token};
use super::http_errors::{
    map_account_error, map_billing_error, map_chat_error, map_json_rejection, map_payment_event_error,
    map_signature_error,
};
use super::http_types::{
    HealthResponse, InfluencerResponse, InitConversationRequest, LoginRequest, MessagesQuery,
    PlanResponse, SaveMessagesRequest, SendMessageRequest, SignUpRequest, UpdateProfileRequest,
};
use super::state::AppState;
use crate::domain::ProfileUpdate;
use crate::infrastructure::{
    parse_event, verify_signature, InfluencerRepository, PlanRepository, RepositoryError,
    SIGNATURE_HEADER,
};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use validator::Validate;

const MAX_PAGE_LIMIT: i64 = 100;

pub fn router(state: AppState) -> Router {
    let cors = match state
        .cors_allowed_origin
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new(),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(sign_up))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/me", get(get_me).patch(update_me))
        .route("/influencer", get(get_influencer))
        .route("/plans", get(list_plans))
        .route("/messages", get(list_messages).post(send_message))
        .route("/messages/fast", post(send_message_fast))
        .route("/messages/save", post(save_messages))
        .route("/conversations/init", post(init_conversation))
        .route("/webhooks/payments", post(payment_webhook))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        sign_up,
        login,
        logout,
        get_me,
        update_me,
        get_influencer,
        list_plans,
        list_messages,
        send_message,
        send_message_fast,
        save_messages,
        init_conversation,
        payment_webhook,
    ),
    components(
        schemas(
            HealthResponse,
            SignUpRequest,
            LoginRequest,
            UpdateProfileRequest,
            SendMessageRequest,
            InitConversationRequest,
            SaveMessagesRequest,
            InfluencerResponse,
            PlanResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Accounts", description = "Signup, login and profile"),
        (name = "Catalog", description = "Persona and plans"),
        (name = "Chat", description = "Message history and sending"),
        (name = "Billing", description = "Payment processor webhooks"),
    ),
    info(
        title = "Persona Chat API",
        version = "0.1.0",
        description = "Token-metered chat with an AI persona",
        license(name = "MIT")
    )
)]
struct ApiDoc;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, (StatusCode, Json<serde_json::Value>)> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let (status, body) = map_json_rejection(&rejection);
        (status, Json(body))
    })
}

fn validation_failed(errors: validator::ValidationErrors) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": "Invalid request", "details": errors})),
    )
}

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "Accounts",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created", body = Object),
        (status = 400, description = "Invalid input or rejected by the auth provider", body = Object),
        (status = 502, description = "Auth provider unavailable", body = Object)
    )
)]
async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    match state
        .accounts
        .sign_up(&req.email, &req.password, req.username, req.display_name)
        .await
    {
        Ok(result) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "user": result.user,
                "session": result.session,
                "confirmationRequired": result.session.is_none(),
            })),
        ),
        Err(e) => {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Accounts",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = Object),
        (status = 401, description = "Invalid credentials", body = Object)
    )
)]
async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    match state.accounts.sign_in(&req.email, &req.password).await {
        Ok(session) => (StatusCode::OK, Json(serde_json::json!(session))),
        Err(e) => {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Accounts",
    responses(
        (status = 200, description = "Signed out", body = Object),
        (status = 401, description = "Missing token", body = Object)
    ),
    security(("bearer" = []))
)]
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Missing or invalid authorization token"})),
        );
    };

    match state.accounts.sign_out(token).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "signed_out"}))),
        Err(e) => {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    get,
    path = "/me",
    tag = "Accounts",
    responses(
        (status = 200, description = "Profile and token balance", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object)
    ),
    security(("bearer" = []))
)]
async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };

    match state.accounts.profile(&user, state.influencer_id).await {
        Ok(view) => (
            StatusCode::OK,
            Json(serde_json::json!({"user": view.user, "tokens": view.tokens})),
        ),
        Err(e) => {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    patch,
    path = "/me",
    tag = "Accounts",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = Object),
        (status = 400, description = "Invalid input", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object)
    ),
    security(("bearer" = []))
)]
async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    let update = ProfileUpdate {
        username: req.username,
        display_name: req.display_name,
    };
    match state.accounts.update_profile(&user, update).await {
        Ok(profile) => (StatusCode::OK, Json(serde_json::json!(profile))),
        Err(e) => {
            let (status, body) = map_account_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    get,
    path = "/influencer",
    tag = "Catalog",
    responses(
        (status = 200, description = "The persona this deployment chats as", body = InfluencerResponse),
        (status = 404, description = "Persona not configured", body = Object)
    )
)]
async fn get_influencer(State(state): State<AppState>) -> impl IntoResponse {
    match state.influencer_repo.get_by_id(state.influencer_id).await {
        Ok(influencer) if influencer.is_active => (
            StatusCode::OK,
            Json(serde_json::json!(InfluencerResponse::from(influencer))),
        ),
        Ok(_) | Err(RepositoryError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Influencer not found"})),
        ),
        Err(e) => {
            error!(error = %e, "Failed to load influencer");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to load influencer"})),
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/plans",
    tag = "Catalog",
    responses(
        (status = 200, description = "Active subscription plans", body = [PlanResponse]),
        (status = 500, description = "Failed to list plans", body = Object)
    )
)]
async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    match state.plan_repo.list_active().await {
        Ok(plans) => {
            let plans: Vec<PlanResponse> = plans.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(serde_json::json!(plans)))
        }
        Err(e) => {
            error!(error = %e, "Failed to list plans");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to list plans"})),
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/messages",
    tag = "Chat",
    params(MessagesQuery),
    responses(
        (status = 200, description = "Oldest-first page counted back from the newest message", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object)
    ),
    security(("bearer" = []))
)]
async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MessagesQuery>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };

    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);

    match state
        .chat
        .list_messages(&user, params.influencer_id, limit, offset)
        .await
    {
        Ok(messages) => (StatusCode::OK, Json(serde_json::json!({"messages": messages}))),
        Err(e) => {
            let (status, body) = map_chat_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    post,
    path = "/conversations/init",
    tag = "Chat",
    request_body = InitConversationRequest,
    responses(
        (status = 200, description = "Conversation with its welcome message", body = Object),
        (status = 400, description = "Unknown influencer", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object)
    ),
    security(("bearer" = []))
)]
async fn init_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InitConversationRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };

    match state.chat.initialize_conversation(&user, req.influencer_id).await {
        Ok(thread) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "conversationId": thread.conversation.id,
                "tokens": thread.conversation.tokens,
                "messages": thread.messages,
            })),
        ),
        Err(e) => {
            let (status, body) = map_chat_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    post,
    path = "/messages",
    tag = "Chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Stored user message and reply", body = Object),
        (status = 400, description = "Missing or invalid fields", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object),
        (status = 402, description = "Token balance exhausted", body = Object),
        (status = 502, description = "Reply service unavailable", body = Object),
        (status = 500, description = "Internal error", body = Object)
    ),
    security(("bearer" = []))
)]
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    let influencer_id = req.influencer_id;
    match state.chat.send_message(&user, influencer_id, req.into()).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "userMessage": outcome.user_message,
                "aiMessage": outcome.ai_message,
                "tokensRemaining": outcome.tokens_remaining,
            })),
        ),
        Err(e) => {
            let (status, body) = map_chat_error(&e);
            (status, Json(body))
        }
    }
}

#[utoipa::path(
    post,
    path = "/messages/fast",
    tag = "Chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Provisional user message and reply, not yet stored", body = Object),
        (status = 400, description = "Missing or invalid fields", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object),
        (status = 402, description = "Token balance exhausted", body = Object)
    ),
    security(("bearer" = []))
)]
async fn send_message_fast(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let req = match json_body(payload) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    let influencer_id = req.influencer_id;
    match state.chat.send_message_fast(&user, influencer_id, req.into()).await {
        Ok((user_message, ai_message)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "userMessage": user_message,
                "aiMessage": ai_message,
                "isFastMode": true,
            })),
        ),
        Err(e) => {
            let (status, body) = map_chat_error(&e);
            (status, Json(body))
        }
    }
}

/// Background save for a fast-path pair. Always answers 200; the outcome is in `success`.
#[utoipa::path(
    post,
    path = "/messages/save",
    tag = "Chat",
    request_body = SaveMessagesRequest,
    responses(
        (status = 200, description = "`{success, error?}` with the stored messages on success", body = Object)
    ),
    security(("bearer" = []))
)]
async fn save_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SaveMessagesRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match state.accounts.authenticate(extract_bearer_token(&headers)).await {
        Ok(user) => user,
        Err(e) => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            );
        }
    };

    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({"success": false, "error": rejection.body_text()})),
            );
        }
    };

    match state
        .chat
        .save_fast_messages(&user, req.influencer_id, req.user_message, req.ai_message)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "userMessage": outcome.user_message,
                "aiMessage": outcome.ai_message,
                "tokensRemaining": outcome.tokens_remaining,
            })),
        ),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Background save failed");
            (
                StatusCode::OK,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "Billing",
    request_body(content = String, description = "Raw signed event payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled or ignored", body = Object),
        (status = 400, description = "Signature verification failed or malformed event", body = Object),
        (status = 500, description = "Processing failed, the processor should redeliver", body = Object)
    )
)]
async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(
        &state.webhook_secret,
        signature,
        &body,
        state.webhook_tolerance_secs,
        Utc::now(),
    ) {
        warn!(error = %e, "Rejected webhook");
        let (status, body) = map_signature_error(&e);
        return (status, Json(body));
    }

    let envelope = match parse_event(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            let (status, body) = map_payment_event_error(&e);
            return (status, Json(body));
        }
    };

    match state.billing.handle_event(&envelope).await {
        Ok(outcome) => {
            info!(event_id = %envelope.id, outcome = ?outcome, "Webhook processed");
            (StatusCode::OK, Json(serde_json::json!({"received": true})))
        }
        Err(e) => {
            let (status, body) = map_billing_error(&e);
            (status, Json(body))
        }
    }
}
