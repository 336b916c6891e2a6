//! Response decoration: configured CORS headers plus the JSON content type.
//!
//! The header set comes from the `CORS_HEADERS` environment variable as a
//! JSON object. Values wrapped in single quotes (a quirk of the deployment
//! templating) are unquoted before they are written.

use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::BTreeMap;
use tracing::warn;

/// Parsed response-header configuration.
#[derive(Clone, Default)]
pub struct CorsConfig {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl CorsConfig {
    /// Read `CORS_HEADERS`; absence means no extra headers.
    pub fn from_env() -> Self {
        match std::env::var("CORS_HEADERS") {
            Ok(raw) => Self::from_json(&raw),
            Err(_) => Self::default(),
        }
    }

    /// Parse a JSON object of header name → value. Entries that do not form
    /// a valid header are skipped with a warning.
    pub fn from_json(raw: &str) -> Self {
        let parsed: BTreeMap<String, String> = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("CORS_HEADERS is not a JSON object of strings: {e}");
                return Self::default();
            }
        };

        let mut headers = Vec::with_capacity(parsed.len());
        for (name, value) in parsed {
            let value = unquote(&value);
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => headers.push((name, value)),
                _ => warn!("skipping invalid CORS header {name:?}"),
            }
        }
        Self { headers }
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

/// Strip one pair of wrapping single quotes: `'*'` → `*`.
fn unquote(v: &str) -> &str {
    v.strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(v)
}

/// Middleware decorating every response with the configured headers.
pub async fn set_response_headers(
    State(config): State<CorsConfig>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in config.headers() {
        headers.insert(name.clone(), value.clone());
    }
    response
}
