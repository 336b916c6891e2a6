//! Diagram rendering route: POST /c4.

use std::time::Duration;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::models::{ModelOutput, UserInput};
use crate::plantuml::{self, DiagramError};
use crate::services::Prediction;

use super::app_state::AppState;
use super::error::ApiError;

/// Prompts shorter than this are rejected regardless of role.
pub const PROMPT_MIN_LENGTH: usize = 3;

const RECORD_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct DiagramRequest {
    prompt: String,
}

#[derive(Serialize)]
struct DiagramResponse {
    svg: String,
}

pub fn diagram_router() -> Router<AppState> {
    Router::new().route("/c4", post(render_diagram))
}

/// The rendering pipeline: authenticate, check the prompt against the
/// caller's quota, infer the graph, render it, and record the exchange in
/// the background.
async fn render_diagram(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let request: DiagramRequest =
        serde_json::from_str(&body).map_err(|_| state.reject(ApiError::InvalidContent))?;

    let token = bearer_token(&headers).ok_or_else(|| state.reject(ApiError::Unauthorized))?;
    let claims = state
        .ciam
        .parse_access_token(token)
        .await
        .map_err(|_| state.reject(ApiError::Unauthorized))?;

    let max_length = claims.quotas.prompt_length_max as usize;
    if request.prompt.len() < PROMPT_MIN_LENGTH || request.prompt.len() > max_length {
        return Err(state.reject(ApiError::Validation(format!(
            "prompt length must be between {PROMPT_MIN_LENGTH} and {max_length} characters"
        ))));
    }

    let prediction = state
        .inference
        .infer(&request.prompt)
        .await
        .map_err(|e| state.reject(ApiError::Prediction(e.0)))?;

    let svg = plantuml::render_graph(state.renderer.as_ref(), &prediction.graph)
        .await
        .map_err(|e| state.reject(diagram_error(e)))?;

    let response_body = serde_json::to_string(&DiagramResponse {
        svg: String::from_utf8_lossy(&svg).into_owned(),
    })
    .map_err(|e| state.reject(ApiError::Serialization(e.to_string())))?;

    record_exchange(&state, claims.std.sub.clone(), request.prompt, prediction);

    Response::builder()
        .status(axum::http::StatusCode::OK)
        .body(axum::body::Body::from(response_body))
        .map_err(|e| state.reject(ApiError::Serialization(e.to_string())))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn diagram_error(err: DiagramError) -> ApiError {
    match err {
        DiagramError::RendererStatus { .. } | DiagramError::RendererTransport(_) => {
            ApiError::Renderer(err.to_string())
        }
        DiagramError::InvalidGraph(_) | DiagramError::Codec(_) => {
            ApiError::CoreLogic(err.to_string())
        }
    }
}

/// Persist prompt and prediction without holding up the response. Each
/// write is bounded; failures are logged and otherwise dropped.
fn record_exchange(state: &AppState, user_id: String, prompt: String, prediction: Prediction) {
    let repository = state.repository.clone();
    let request_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now();

    tokio::spawn(async move {
        let input = UserInput {
            request_id: request_id.clone(),
            user_id: user_id.clone(),
            prompt,
            timestamp,
        };
        match tokio::time::timeout(RECORD_WRITE_TIMEOUT, repository.write_prompt(&input)).await {
            Ok(Err(e)) => warn!("failed to record prompt: {e}"),
            Err(_) => warn!("recording prompt timed out"),
            Ok(Ok(())) => {}
        }

        let output = ModelOutput {
            request_id,
            user_id,
            response: prediction.raw,
            timestamp,
            model: prediction.model,
            prompt_tokens: prediction.prompt_tokens,
            completion_tokens: prediction.completion_tokens,
        };
        match tokio::time::timeout(
            RECORD_WRITE_TIMEOUT,
            repository.write_model_prediction(&output),
        )
        .await
        {
            Ok(Err(e)) => warn!("failed to record prediction: {e}"),
            Err(_) => warn!("recording prediction timed out"),
            Ok(Ok(())) => {}
        }
    });
}
