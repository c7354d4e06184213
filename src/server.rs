//! HTTP API over the book store and the import pipeline.

use crate::error::BookrecsError;
use crate::goodreads::validate_source_url;
use crate::pipeline::{ImportPipeline, ImportReport};
use crate::store::{BookSummary, ImportRequest, RecommenderSummary, RequestStatus, Storage};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Origins allowed when none are configured
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://patrickbriaticokirwin.github.io",
    "http://localhost:8000",
];

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub pipeline: Arc<ImportPipeline>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, pipeline: Arc<ImportPipeline>) -> Self {
        Self { storage, pipeline }
    }
}

/// Build the API router with CORS and request tracing
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/books", get(books_handler))
        .route("/books/unique", get(unique_books_handler))
        .route("/recommenders", get(recommenders_handler))
        .route("/import-request", post(import_request_handler))
        .route("/import-requests", get(pending_requests_handler))
        .route("/approve-import/{id}", post(approve_import_handler))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_LENGTH])
        .allow_credentials(true)
        .max_age(Duration::from_secs(12 * 60 * 60))
}

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error mapped onto an HTTP status
pub struct ApiError(BookrecsError);

impl From<BookrecsError> for ApiError {
    fn from(err: BookrecsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BookrecsError::Validation(_) => StatusCode::BAD_REQUEST,
            BookrecsError::NotFound(_) => StatusCode::NOT_FOUND,
            BookrecsError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }

        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct RecommenderQuery {
    recommender: Option<String>,
}

/// All recommended books, optionally only those one recommender picked
async fn books_handler(
    State(state): State<AppState>,
    Query(query): Query<RecommenderQuery>,
) -> ApiResult<Json<Vec<BookSummary>>> {
    let recommender = query.recommender.as_deref().filter(|r| !r.is_empty());
    Ok(Json(state.storage.list_books(recommender).await?))
}

/// Books only the given recommender recommends
async fn unique_books_handler(
    State(state): State<AppState>,
    Query(query): Query<RecommenderQuery>,
) -> ApiResult<Json<Vec<BookSummary>>> {
    let recommender = query
        .recommender
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            BookrecsError::Validation("Recommender parameter is required".to_string())
        })?;

    Ok(Json(state.storage.unique_books(&recommender).await?))
}

async fn recommenders_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RecommenderSummary>>> {
    Ok(Json(state.storage.list_recommenders().await?))
}

/// Import request body
#[derive(Debug, Deserialize)]
struct ImportRequestBody {
    url: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct ImportRequestAccepted {
    id: i64,
    message: String,
}

/// Queue an import for approval
async fn import_request_handler(
    State(state): State<AppState>,
    Json(req): Json<ImportRequestBody>,
) -> ApiResult<Json<ImportRequestAccepted>> {
    validate_source_url(&req.url)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(BookrecsError::Validation("Recommender name is required".to_string()).into());
    }

    let id = state.storage.create_import_request(name, req.url.trim()).await?;
    Ok(Json(ImportRequestAccepted {
        id,
        message: "Request submitted for approval".to_string(),
    }))
}

async fn pending_requests_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ImportRequest>>> {
    Ok(Json(state.storage.list_pending_import_requests().await?))
}

/// Run a pending import and record its outcome
async fn approve_import_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ImportReport>)> {
    let request = state
        .storage
        .pending_import_request(id)
        .await?
        .ok_or_else(|| BookrecsError::NotFound(format!("pending import request {}", id)))?;

    info!(id = id, recommender = %request.recommender_name, "Approving import request");

    let report = state
        .pipeline
        .run(&request.source_url, &request.recommender_name)
        .await;

    let (status, code) = if report.is_success() {
        (RequestStatus::Approved, StatusCode::OK)
    } else {
        (RequestStatus::Failed, StatusCode::BAD_GATEWAY)
    };
    state.storage.set_import_request_status(id, status).await?;

    Ok((code, Json(report)))
}
