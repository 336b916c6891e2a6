//! Application state: the capability set shared by all handlers.
//!
//! Handlers themselves are stateless; everything mutable lives behind the
//! repository, everything else here is read-only configuration or a client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::middleware::CorsConfig;
use crate::plantuml::{DiagramRenderer, PlantUmlClient, DEFAULT_RENDER_TIMEOUT};
use crate::services::{
    Ciam, GraphInference, LocalSigner, OpenAiClient, RemoteSigner, SmtpMailer, TokenSigner,
};
use crate::storage::{Config, PostgresRepository, Repository};

use super::error::{ErrorSink, TracingErrorSink};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ciam: Arc<Ciam>,
    pub inference: Arc<dyn GraphInference>,
    pub renderer: Arc<dyn DiagramRenderer>,
    pub repository: Arc<dyn Repository>,
    pub error_sink: Arc<dyn ErrorSink>,
    pub cors: CorsConfig,
}

impl AppState {
    /// Assemble state from explicit capabilities. Tests inject mocks here.
    pub fn new(
        repository: Arc<dyn Repository>,
        signer: Arc<dyn TokenSigner>,
        mailer: Arc<dyn crate::services::SigninMailer>,
        inference: Arc<dyn GraphInference>,
        renderer: Arc<dyn DiagramRenderer>,
        cors: CorsConfig,
    ) -> Self {
        Self {
            ciam: Arc::new(Ciam::new(repository.clone(), signer, mailer)),
            inference,
            renderer,
            repository,
            error_sink: Arc::new(TracingErrorSink),
            cors,
        }
    }

    /// Production wiring from the environment.
    pub async fn from_env() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building http client")?;

        let repository: Arc<dyn Repository> = Arc::new(
            PostgresRepository::connect(Config::from_env())
                .await
                .context("connecting repository")?,
        );

        let signer: Arc<dyn TokenSigner> = match std::env::var("CIAM_KMS_URL") {
            Ok(kms_url) => {
                let public_key = std::env::var("CIAM_PUBLIC_KEY")
                    .context("CIAM_PUBLIC_KEY must accompany CIAM_KMS_URL")?;
                Arc::new(
                    RemoteSigner::from_base64_public_key(http.clone(), kms_url, &public_key)
                        .context("configuring remote signer")?,
                )
            }
            Err(_) => {
                let seed = std::env::var("CIAM_SIGNING_KEY")
                    .context("CIAM_SIGNING_KEY must be provided")?;
                Arc::new(LocalSigner::from_base64_seed(&seed).context("configuring signer")?)
            }
        };

        let mailer = Arc::new(SmtpMailer::from_env().context("configuring smtp")?);

        let inference: Arc<dyn GraphInference> = Arc::new(
            OpenAiClient::from_env(http.clone()).context("configuring llm client")?,
        );

        let render_http = reqwest::Client::builder()
            .timeout(DEFAULT_RENDER_TIMEOUT)
            .build()
            .context("building renderer http client")?;
        let renderer: Arc<dyn DiagramRenderer> = Arc::new(PlantUmlClient::new(render_http));

        Ok(Self::new(
            repository,
            signer,
            mailer,
            inference,
            renderer,
            CorsConfig::from_env(),
        ))
    }

    /// Report a failure to the error sink and hand the error back, so a
    /// handler can `map_err` through it exactly once.
    pub fn reject(&self, err: super::error::ApiError) -> super::error::ApiError {
        self.error_sink
            .report(err.kind(), err.status().as_u16(), &err.message());
        err
    }
}
