//! PlantUML rendering: graph to C4-PlantUML DSL, DSL to the encoded request
//! path, and the HTTP client fetching the rendered SVG.

pub mod codec;
pub mod dsl;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Graph;

/// Base URL of the public PlantUML server.
pub const PLANTUML_BASE_URL: &str = "https://www.plantuml.com/plantuml";

/// Default timeout for rendering calls.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Diagram pipeline errors.
#[derive(Error, Debug)]
pub enum DiagramError {
    /// The graph violates a structural invariant.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    /// Compression or encoding of the DSL failed.
    #[error("codec failure: {0}")]
    Codec(String),
    /// The renderer answered with a non-200 status.
    #[error("renderer response is not ok, status code: {status}")]
    RendererStatus { status: u16 },
    /// The renderer could not be reached.
    #[error("renderer request failed: {0}")]
    RendererTransport(String),
}

/// Capability rendering an encoded diagram request into SVG bytes.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render_svg(&self, encoded: &str) -> Result<Vec<u8>, DiagramError>;
}

/// HTTP client for a PlantUML server.
pub struct PlantUmlClient {
    http: reqwest::Client,
    base_url: String,
}

impl PlantUmlClient {
    /// Client against the public PlantUML server.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, PLANTUML_BASE_URL.to_string())
    }

    /// Client against a custom server, e.g. a self-hosted instance.
    pub fn with_base_url(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl DiagramRenderer for PlantUmlClient {
    async fn render_svg(&self, encoded: &str) -> Result<Vec<u8>, DiagramError> {
        let url = format!("{}/svg/{}", self.base_url, encoded);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DiagramError::RendererTransport(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(DiagramError::RendererStatus {
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| DiagramError::RendererTransport(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Render a graph to SVG: serialize to the DSL, encode the request path,
/// fetch from the renderer. Pure up to the final network call.
pub async fn render_graph(
    renderer: &dyn DiagramRenderer,
    graph: &Graph,
) -> Result<Vec<u8>, DiagramError> {
    let dsl = dsl::serialize(graph)?;
    let encoded = codec::encode_request(dsl.as_bytes())?;
    renderer.render_svg(&encoded).await
}
