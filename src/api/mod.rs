pub mod handlers;
pub mod sse;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::config::AppConfig;
use crate::core::events::EventBus;
use crate::core::jobs::JobManager;
use crate::core::refresh::{RefreshError, RefreshOrchestrator};
use crate::core::storage::repository::{Repository, StorageError};

/// Process-scoped context handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub repository: Repository,
    pub bus: EventBus,
    pub jobs: JobManager,
    pub orchestrator: RefreshOrchestrator,
    pub client: reqwest::Client,
    pub config: Arc<AppConfig>,
}

pub fn create_router(context: AppContext) -> Router {
    Router::new()
        .route("/api/feeds", post(handlers::subscribe_feed).get(handlers::list_feeds))
        .route("/api/feeds/{id}", delete(handlers::remove_feed))
        .route("/api/refresh", post(handlers::trigger_refresh))
        .route("/api/articles", get(handlers::list_articles))
        .route("/api/articles/{id}/read", post(handlers::mark_read))
        .route("/api/articles/{id}/star", post(handlers::mark_starred))
        .route("/api/jobs", post(handlers::enqueue_job))
        .route("/api/jobs/stats", get(handlers::job_stats))
        .route("/api/jobs/{id}/retry", post(handlers::retry_job))
        .route("/api/rules", post(handlers::create_rule).get(handlers::list_rules))
        .route("/api/rules/preview", post(handlers::preview_rule))
        .route("/api/events", get(sse::event_stream))
        .with_state(context)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<RefreshError> for ApiError {
    fn from(error: RefreshError) -> Self {
        match error {
            RefreshError::NotFound(id) => ApiError::NotFound(format!("feed {id} not found")),
            RefreshError::Storage(inner) => ApiError::Storage(inner),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
