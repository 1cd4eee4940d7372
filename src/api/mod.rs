//! REST API.
//!
//! Routes are served under `/api/v1`; the container routes are also mounted
//! unprefixed for older clients. Every response carries an `X-Request-ID`
//! header, echoed from the request or freshly generated.

mod handlers;
#[cfg(test)]
mod tests;

pub use handlers::{CreateContainerRequest, CreateProjectRequest, CreatedResponse};

use crate::config::ContainerDefaults;
use crate::container::{ClientError, ContainerError, ContainerOperations, ErrorKind};
use crate::project::{ProjectError, ProjectSettings};
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ops: Arc<dyn ContainerOperations>,
    pub defaults: ContainerDefaults,
    pub project: ProjectSettings,
}

impl AppState {
    pub fn new(ops: Arc<dyn ContainerOperations>, defaults: ContainerDefaults) -> Self {
        Self {
            ops,
            defaults,
            project: ProjectSettings::default(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            container_routes().route("/projects", post(handlers::create_project)),
        )
        .merge(container_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(propagate_request_id))
        .with_state(state)
}

fn container_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/containers",
            post(handlers::create_container).get(handlers::list_containers),
        )
        .route(
            "/containers/:id",
            get(handlers::get_container).delete(handlers::remove_container),
        )
        .route("/containers/:id/logs", get(handlers::get_logs))
        .route("/containers/:id/start", post(handlers::start_container))
}

/// Render a handler panic as a generic 500 error body.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let details = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::internal("internal server error", details).into_response()
}

/// Request ID attached to every request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;

    // Error bodies are finished here, where the request ID is known.
    if let Some(body) = response.extensions_mut().remove::<ErrorBody>() {
        let status = response.status();
        response = (
            status,
            Json(ErrorBody {
                request_id: Some(id.clone()),
                ..body
            }),
        )
            .into_response();
    }

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// JSON error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
    pub kind: String,
    pub request_id: Option<String>,
}

/// Handler error, rendered as an [`ErrorBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: String,
    kind: &'static str,
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            details: details.into(),
            kind: "validation",
        }
    }

    pub fn internal(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.into(),
            details: details.into(),
            kind: ErrorKind::Generic.as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &str {
        self.kind
    }
}

/// HTTP status and error kind for a client error.
pub fn status_for(err: &ClientError) -> (StatusCode, &'static str) {
    if err.is_validation_error() {
        return (StatusCode::BAD_REQUEST, "validation");
    }
    match err.cause() {
        ContainerError::Timeout(_) => return (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        ContainerError::Closed => return (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        _ => {}
    }

    let kind = err.kind();
    let status = match kind {
        ErrorKind::NotFound | ErrorKind::ImageNotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::ResourceConstraint => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Generic => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, kind.as_str())
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        let (status, kind) = status_for(&err);
        Self {
            status,
            error: format!("failed to {}", err.op().as_str().replace('_', " ")),
            details: err.to_string(),
            kind,
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        if err.is_invalid_project() {
            ApiError::bad_request("invalid Node.js project", err.to_string())
        } else {
            ApiError::internal("failed to prepare project", err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}: {}", self.error, self.details);
        } else {
            warn!("{}: {}", self.error, self.details);
        }

        let body = ErrorBody {
            error: self.error,
            details: self.details,
            kind: self.kind.to_string(),
            request_id: None,
        };
        let mut response = (self.status, Json(body.clone())).into_response();
        response.extensions_mut().insert(body);
        response
    }
}
