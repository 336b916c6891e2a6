//! API routes module - dispatch, fallbacks, and router assembly.

pub mod app_state;
pub mod auth;
pub mod diagram;
pub mod error;

use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub use app_state::AppState;
pub use error::{ApiError, ErrorSink, TracingErrorSink};

use crate::middleware::cors;

/// Assemble the full application router.
pub fn create_api_router(state: AppState) -> Router {
    let cors_config = state.cors.clone();
    Router::new()
        .route("/status", get(status).options(status))
        .merge(diagram::diagram_router())
        .nest("/auth", auth::auth_router())
        .fallback(unknown_path)
        .method_not_allowed_fallback(method_mismatch)
        .layer(middleware::from_fn_with_state(
            cors_config,
            cors::set_response_headers,
        ))
        .with_state(state)
}

/// Liveness probe. 200, no body.
async fn status() -> StatusCode {
    StatusCode::OK
}

/// CORS preflight succeeds on any path; anything else is a 404.
async fn unknown_path(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    state.reject(ApiError::NotExists).into_response()
}

/// Known path, wrong method. Preflight still succeeds.
async fn method_mismatch(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    state.reject(ApiError::InvalidMethod).into_response()
}
