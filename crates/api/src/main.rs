use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tastebud_core::catalog::StaticCatalog;
use tastebud_core::credentials::{
    CredentialAction, CredentialBus, CredentialType, EnvCredentialStore, MemoryCredentialStore,
};
use tastebud_core::domain::{MediaType, Outcome, SessionKey, Suggestion};
use tastebud_core::engine::{EngineConfig, Feedback, SessionEngine};
use tastebud_core::storage::{
    HistoryStore, MemoryHistoryStore, MemoryRoundLock, PgHistoryStore, PgRoundLock, RoundLock,
};
use tastebud_core::EngineError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tastebud_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let (store, rounds): (Arc<dyn HistoryStore>, Arc<dyn RoundLock>) =
        match settings.require_database_url() {
            Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
            {
                Ok(pool) => match tastebud_core::storage::migrate(&pool).await {
                    Ok(()) => (
                        Arc::new(PgHistoryStore::new(pool.clone())),
                        Arc::new(PgRoundLock::new(pool)),
                    ),
                    Err(e) => {
                        sentry_anyhow::capture_anyhow(&e);
                        tracing::error!(error = %e, "db migrations failed; history kept in memory");
                        in_memory()
                    }
                },
                Err(e) => {
                    let err = anyhow::Error::new(e);
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(error = %err, "db connect failed; history kept in memory");
                    in_memory()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "DATABASE_URL missing; history kept in memory");
                in_memory()
            }
        };

    let catalog = match settings.favorites_path.as_deref() {
        Some(path) => StaticCatalog::from_json_file(std::path::Path::new(path))?,
        None => StaticCatalog::new(),
    };

    let credentials = Arc::new(MemoryCredentialStore::with_fallback(Arc::new(
        EnvCredentialStore::from_settings(&settings),
    )));
    let bus = Arc::new(CredentialBus::new());
    let provider = settings.provider()?;
    let llm = tastebud_core::llm::client_from_env(provider, credentials.clone(), &bus)?;

    let engine = SessionEngine::new(
        llm,
        store,
        Arc::new(catalog),
        EngineConfig::from_settings(&settings),
    )
    .with_round_lock(rounds);

    let state = AppState {
        engine: Arc::new(engine),
        credentials,
        bus,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions/:user/:media/suggestions", post(request_suggestion))
        .route("/sessions/:user/:media/history", get(get_history))
        .route("/sessions/:user/:media/feedback", post(provide_feedback))
        .route("/sessions/:user/:media/skip", post(skip))
        .route("/sessions/:user/:media/add", post(add_to_library))
        .route(
            "/sessions/:user/:media/constraints",
            put(set_constraints).delete(clear_constraints),
        )
        .route(
            "/credentials/:credential",
            put(set_credential).delete(remove_credential),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, %provider, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn in_memory() -> (Arc<dyn HistoryStore>, Arc<dyn RoundLock>) {
    (
        Arc::new(MemoryHistoryStore::new()),
        Arc::new(MemoryRoundLock::new()),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    engine: Arc<SessionEngine>,
    credentials: Arc<MemoryCredentialStore>,
    bus: Arc<CredentialBus>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    retryable: bool,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self {
            error: err.user_message(),
            kind: err.kind(),
            retryable: err.is_retryable(),
        }
    }
}

enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NoActiveSuggestion { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::RoundInFlight { .. } => StatusCode::CONFLICT,
        EngineError::InvalidContent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidCredential { .. } => StatusCode::UNAUTHORIZED,
        EngineError::Transport { .. }
        | EngineError::NoCandidates { .. }
        | EngineError::MalformedResponse { .. }
        | EngineError::DuplicateSuggestion { .. } => StatusCode::BAD_GATEWAY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Engine(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    sentry::capture_error(&err);
                    tracing::error!(error = %err, kind = err.kind(), "request failed");
                }
                (status, Json(ErrorBody::from(&err))).into_response()
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: message,
                    kind: "bad_request",
                    retryable: false,
                }),
            )
                .into_response(),
        }
    }
}

fn session_key(user: String, media: &str) -> Result<SessionKey, ApiError> {
    let media_type: MediaType = media.parse().map_err(ApiError::BadRequest)?;
    Ok(SessionKey::new(user, media_type))
}

async fn request_suggestion(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
) -> Result<Json<Suggestion>, ApiError> {
    let key = session_key(user, &media)?;
    Ok(Json(state.engine.request_suggestion(&key).await?))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    media_type: MediaType,
    entries: Vec<Suggestion>,
}

async fn get_history(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let key = session_key(user, &media)?;
    let history = state.engine.history(&key).await?;
    Ok(Json(HistoryResponse {
        media_type: history.media_type(),
        entries: history.into_entries(),
    }))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
struct FeedbackResponse {
    suggestion: Suggestion,
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_error: Option<ErrorBody>,
}

/// Starts the next round when the feedback consumed the active suggestion.
async fn follow_up(engine: &SessionEngine, key: &SessionKey, feedback: Feedback) -> FeedbackResponse {
    let mut response = FeedbackResponse {
        suggestion: feedback.suggestion,
        next: None,
        next_error: None,
    };
    if !feedback.request_next {
        return response;
    }
    match engine.request_suggestion(key).await {
        Ok(next) => response.next = Some(next),
        Err(err) => {
            tracing::warn!(session = %key, error = %err, "next round after feedback failed");
            response.next_error = Some(ErrorBody::from(&err));
        }
    }
    response
}

async fn provide_feedback(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    if !matches!(body.outcome, Outcome::Liked | Outcome::Disliked) {
        return Err(ApiError::BadRequest(format!(
            "feedback outcome must be liked or disliked (got {})",
            body.outcome
        )));
    }
    let key = session_key(user, &media)?;
    let feedback = state.engine.provide_feedback(&key, body.outcome).await?;
    Ok(Json(follow_up(&state.engine, &key, feedback).await))
}

async fn skip(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let key = session_key(user, &media)?;
    let feedback = state.engine.skip(&key).await?;
    Ok(Json(follow_up(&state.engine, &key, feedback).await))
}

async fn add_to_library(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let key = session_key(user, &media)?;
    let feedback = state.engine.add_to_library(&key).await?;
    Ok(Json(follow_up(&state.engine, &key, feedback).await))
}

#[derive(Debug, Deserialize, Serialize)]
struct ConstraintsBody {
    constraints: Vec<String>,
}

async fn set_constraints(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
    Json(body): Json<ConstraintsBody>,
) -> Result<Json<ConstraintsBody>, ApiError> {
    let key = session_key(user, &media)?;
    state.engine.set_constraints(&key, body.constraints).await;
    Ok(Json(ConstraintsBody {
        constraints: state.engine.constraints(&key).await,
    }))
}

async fn clear_constraints(
    State(state): State<AppState>,
    Path((user, media)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let key = session_key(user, &media)?;
    state.engine.clear_constraints(&key).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CredentialBody {
    key: String,
}

async fn set_credential(
    State(state): State<AppState>,
    Path(credential): Path<String>,
    Json(body): Json<CredentialBody>,
) -> Result<StatusCode, ApiError> {
    let credential: CredentialType = credential.parse().map_err(ApiError::BadRequest)?;
    state.credentials.set(credential, body.key)?;
    let notified = state.bus.publish(credential, CredentialAction::Updated);
    tracing::info!(%credential, notified, "credential updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_credential(
    State(state): State<AppState>,
    Path(credential): Path<String>,
) -> Result<StatusCode, ApiError> {
    let credential: CredentialType = credential.parse().map_err(ApiError::BadRequest)?;
    if !state.credentials.remove(credential) {
        return Ok(StatusCode::NOT_FOUND);
    }
    let notified = state.bus.publish(credential, CredentialAction::Removed);
    tracing::info!(%credential, notified, "credential removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &tastebud_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
