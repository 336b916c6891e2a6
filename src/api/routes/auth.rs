//! Authentication routes: anonym and email sign-in, secret confirmation,
//! and token refresh.

use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::app_state::AppState;
use super::error::{ciam_error, ApiError};

#[derive(Deserialize)]
struct AnonymSigninRequest {
    fingerprint: String,
}

#[derive(Deserialize)]
struct UserSigninRequest {
    email: String,
    #[serde(default)]
    fingerprint: String,
}

#[derive(Deserialize)]
struct ConfirmRequest {
    identity_token: String,
    secret: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct IdTokenResponse {
    id: String,
}

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/anonym", post(signin_anonym))
        .route("/signin", post(signin_user))
        .route("/confirm", post(confirm_secret))
        .route("/refresh", post(refresh_tokens))
}

fn parse_body<T: DeserializeOwned>(state: &AppState, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|_| state.reject(ApiError::InvalidContent))
}

fn json_response<T: Serialize>(state: &AppState, value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_string(value)
        .map_err(|e| state.reject(ApiError::Serialization(e.to_string())))?;
    Response::builder()
        .status(axum::http::StatusCode::OK)
        .body(axum::body::Body::from(body))
        .map_err(|e| state.reject(ApiError::Serialization(e.to_string())))
}

async fn signin_anonym(
    State(state): State<AppState>,
    body: String,
) -> Result<Response, ApiError> {
    let request: AnonymSigninRequest = parse_body(&state, &body)?;
    let tokens = state
        .ciam
        .signin_anonym(&request.fingerprint)
        .await
        .map_err(|e| state.reject(ciam_error(e)))?;
    json_response(&state, &tokens)
}

async fn signin_user(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let request: UserSigninRequest = parse_body(&state, &body)?;
    let id = state
        .ciam
        .signin_user(&request.email, &request.fingerprint)
        .await
        .map_err(|e| state.reject(ciam_error(e)))?;
    json_response(&state, &IdTokenResponse { id })
}

async fn confirm_secret(
    State(state): State<AppState>,
    body: String,
) -> Result<Response, ApiError> {
    let request: ConfirmRequest = parse_body(&state, &body)?;
    let tokens = state
        .ciam
        .issue_tokens_after_secret_confirmation(&request.identity_token, &request.secret)
        .await
        .map_err(|e| state.reject(ciam_error(e)))?;
    json_response(&state, &tokens)
}

async fn refresh_tokens(
    State(state): State<AppState>,
    body: String,
) -> Result<Response, ApiError> {
    let request: RefreshRequest = parse_body(&state, &body)?;
    let tokens = state
        .ciam
        .refresh_tokens(&request.refresh_token)
        .await
        .map_err(|e| state.reject(ciam_error(e)))?;
    json_response(&state, &tokens)
}
