//! API error taxonomy and its mapping to HTTP responses.
//!
//! Every failure crossing the dispatcher boundary is one of these kinds and
//! is reported to the injected [`ErrorSink`] exactly once, as
//! `[type:<Kind>][code:<status>] <message>`.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::CiamError;

/// API error kinds (§ error taxonomy).
#[derive(Debug)]
pub enum ApiError {
    /// Request body could not be deserialized.
    InvalidContent,
    /// Input violates a validation rule; the reason is surfaced.
    Validation(String),
    /// Missing, invalid, expired, or stale access token.
    Unauthorized,
    /// LLM provider failure; the payload is the verbatim provider body.
    Prediction(String),
    /// Renderer non-200 or transport failure.
    Renderer(String),
    /// Graph serialization or codec failure.
    CoreLogic(String),
    /// Unknown path.
    NotExists,
    /// Known path, wrong method.
    InvalidMethod,
    /// Response could not be encoded.
    Serialization(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidContent => "InvalidContent",
            ApiError::Validation(_) => "ValidationError",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Prediction(_) => "PredictionError",
            ApiError::Renderer(_) => "RendererError",
            ApiError::CoreLogic(_) => "CoreLogic",
            ApiError::NotExists => "HandlerNotExists",
            ApiError::InvalidMethod => "InvalidMethod",
            ApiError::Serialization(_) => "Serialization",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidContent | ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Prediction(_) => StatusCode::BAD_REQUEST,
            ApiError::NotExists => StatusCode::NOT_FOUND,
            ApiError::InvalidMethod => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Renderer(_) | ApiError::CoreLogic(_) | ApiError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message reported to the error sink.
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidContent => "wrong request content".to_string(),
            ApiError::Validation(reason) => reason.clone(),
            ApiError::Unauthorized => "unauthorized".to_string(),
            ApiError::Prediction(body) => body.clone(),
            ApiError::Renderer(reason) => reason.clone(),
            ApiError::CoreLogic(reason) => reason.clone(),
            ApiError::NotExists => "not exists".to_string(),
            ApiError::InvalidMethod => "method not allowed".to_string(),
            ApiError::Serialization(reason) => reason.clone(),
        }
    }

    fn body(&self) -> Option<String> {
        match self {
            ApiError::InvalidContent => {
                Some(json!({"error": "wrong request content"}).to_string())
            }
            ApiError::Validation(reason) => Some(json!({ "error": reason }).to_string()),
            ApiError::Unauthorized => Some(json!({"error": "unauthorized"}).to_string()),
            // the provider body goes out untouched
            ApiError::Prediction(body) => Some(body.clone()),
            ApiError::Renderer(_) | ApiError::CoreLogic(_) | ApiError::Serialization(_) => {
                Some(json!({"error": "internal error"}).to_string())
            }
            ApiError::NotExists => Some(json!({"error": "not exists"}).to_string()),
            ApiError::InvalidMethod => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = match self.body() {
            Some(body) => Response::builder()
                .status(self.status())
                .body(Body::from(body)),
            None => Response::builder().status(self.status()).body(Body::empty()),
        }
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// Sink receiving one structured report per failed request.
pub trait ErrorSink: Send + Sync {
    fn report(&self, kind: &str, status: u16, message: &str);
}

/// Default sink: structured `tracing` events.
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, kind: &str, status: u16, message: &str) {
        tracing::error!("[type:{kind}][code:{status}] {message}");
    }
}

/// Map CIAM failures of the auth endpoints onto the taxonomy: business
/// rejections surface as validation errors, token failures as 401, and
/// infrastructure failures as internal errors.
pub fn ciam_error(err: CiamError) -> ApiError {
    match err {
        CiamError::Validation(reason) => ApiError::Validation(reason),
        CiamError::Deactivated
        | CiamError::UserNotFound
        | CiamError::EmailUnverified
        | CiamError::NoPendingConfirmation
        | CiamError::WrongSecret => ApiError::Validation(err.to_string()),
        CiamError::InvalidToken(_) | CiamError::StaleAccessToken => ApiError::Unauthorized,
        CiamError::Signing(_)
        | CiamError::Serialization(_)
        | CiamError::Storage(_)
        | CiamError::Email(_) => ApiError::CoreLogic(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidContent.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Prediction("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotExists.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::InvalidMethod.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::Renderer("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_prediction_body_is_verbatim() {
        let provider_body = r#"{"error":{"message":"rate limited"}}"#;
        assert_eq!(
            ApiError::Prediction(provider_body.to_string()).body().unwrap(),
            provider_body
        );
    }

    #[test]
    fn test_method_mismatch_has_no_body() {
        assert!(ApiError::InvalidMethod.body().is_none());
    }

    #[test]
    fn test_internal_errors_hide_details() {
        assert_eq!(
            ApiError::CoreLogic("secret detail".into()).body().unwrap(),
            r#"{"error":"internal error"}"#
        );
    }
}
