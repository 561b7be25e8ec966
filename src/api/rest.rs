use crate::config::ApiConfig;
use crate::conversation::{Answer, ConversationManager};
use crate::db::models::{ConversationTurn, Event};
use crate::db::EventStore;
use crate::error::Error;
use crate::pipeline::{EventPipeline, PipelineStats};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

const DEFAULT_EVENT_LIMIT: usize = 20;
const MAX_EVENT_LIMIT: usize = 200;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub conversations: Arc<ConversationManager>,
    pub pipeline: Arc<EventPipeline>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) | Error::ContextExpired(_) => StatusCode::NOT_FOUND,
            Error::Config(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipeline_state: String,
    pub pipeline: PipelineStats,
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    pub fn router(state: AppState) -> Router {
        // Create a CORS layer that allows all origins and preflight requests
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        Router::new()
            .route("/api/health", get(health))
            .route("/api/events", get(list_events))
            .route("/api/events/:id", get(get_event))
            .route("/api/events/:id/conversation", get(get_conversation))
            .route("/api/events/:id/ask", post(ask_question))
            .with_state(state)
            .layer(cors)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let app = Self::router(self.state.clone());

        // Build the server address
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pipeline_state: state.pipeline.state().to_string(),
        pipeline: state.pipeline.stats(),
    })
}

async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state.store.recent(limit).await?;
    Ok(Json(events))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Event>> {
    let event = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Event with ID {} not found", id)))?;
    Ok(Json(event))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ConversationTurn>>> {
    let turns = state.conversations.history(id).await?;
    Ok(Json(turns))
}

async fn ask_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<Answer>> {
    info!("Question for event {}", id);
    let answer = state.conversations.ask(id, &request.question).await?;
    Ok(Json(answer))
}
