//! Shared test fixtures: mock capabilities and server assembly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use diagramastext_server::middleware::CorsConfig;
use diagramastext_server::models::{Container, Graph, ModelOutput, UserInput};
use diagramastext_server::plantuml::{DiagramError, DiagramRenderer};
use diagramastext_server::routes::{self, AppState};
use diagramastext_server::services::{
    GraphInference, LocalSigner, MailerError, Prediction, PredictionError, SigninMailer,
};
use diagramastext_server::storage::{
    OneTimeSecret, Repository, StorageError, UserLookup, UserRecord,
};

#[derive(Default)]
pub struct MockRepository {
    pub users: Mutex<HashMap<String, UserRecord>>,
    pub secrets: Mutex<HashMap<String, OneTimeSecret>>,
    pub prompts: Mutex<Vec<UserInput>>,
    pub predictions: Mutex<Vec<ModelOutput>>,
}

#[async_trait]
impl Repository for MockRepository {
    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, StorageError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.fingerprint == fingerprint)
            .map(|u| UserLookup {
                user_id: u.user_id.clone(),
                is_active: u.is_active,
            }))
    }

    async fn lookup_user_by_email(&self, email: &str) -> Result<Option<UserLookup>, StorageError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .map(|u| UserLookup {
                user_id: u.user_id.clone(),
                is_active: u.is_active,
            }))
    }

    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: &str,
        is_active: bool,
    ) -> Result<(), StorageError> {
        self.users.lock().unwrap().insert(
            user_id.to_string(),
            UserRecord {
                user_id: user_id.to_string(),
                is_active,
                email_verified: false,
                email: email.to_string(),
                fingerprint: fingerprint.to_string(),
            },
        );
        Ok(())
    }

    async fn update_user_set_email_verified(&self, user_id: &str) -> Result<(), StorageError> {
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.email_verified = true;
        }
        Ok(())
    }

    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, StorageError> {
        Ok(self.secrets.lock().unwrap().get(user_id).cloned())
    }

    async fn write_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
        iat: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.secrets.lock().unwrap().insert(
            user_id.to_string(),
            OneTimeSecret {
                secret: secret.to_string(),
                iat,
            },
        );
        Ok(())
    }

    async fn delete_one_time_secret(&self, user_id: &str) -> Result<(), StorageError> {
        self.secrets.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn write_prompt(&self, input: &UserInput) -> Result<(), StorageError> {
        self.prompts.lock().unwrap().push(input.clone());
        Ok(())
    }

    async fn write_model_prediction(&self, output: &ModelOutput) -> Result<(), StorageError> {
        self.predictions.lock().unwrap().push(output.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SigninMailer for MockMailer {
    async fn send_signin_secret(&self, email: &str, secret: &str) -> Result<(), MailerError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), secret.to_string()));
        Ok(())
    }
}

pub struct MockInference {
    pub response: Mutex<Result<Prediction, String>>,
}

impl MockInference {
    pub fn returning(prediction: Prediction) -> Self {
        Self {
            response: Mutex::new(Ok(prediction)),
        }
    }

    pub fn failing(provider_body: &str) -> Self {
        Self {
            response: Mutex::new(Err(provider_body.to_string())),
        }
    }
}

#[async_trait]
impl GraphInference for MockInference {
    async fn infer(&self, _prompt: &str) -> Result<Prediction, PredictionError> {
        self.response.lock().unwrap().clone().map_err(PredictionError)
    }
}

pub struct MockRenderer {
    pub svg: Vec<u8>,
    pub fail_status: Option<u16>,
    pub seen: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn returning(svg: &[u8]) -> Self {
        Self {
            svg: svg.to_vec(),
            fail_status: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            svg: Vec::new(),
            fail_status: Some(status),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DiagramRenderer for MockRenderer {
    async fn render_svg(&self, encoded: &str) -> Result<Vec<u8>, DiagramError> {
        self.seen.lock().unwrap().push(encoded.to_string());
        match self.fail_status {
            Some(status) => Err(DiagramError::RendererStatus { status }),
            None => Ok(self.svg.clone()),
        }
    }
}

/// A one-container graph and its prediction envelope.
pub fn single_node_prediction() -> Prediction {
    Prediction {
        graph: Graph {
            containers: vec![Container {
                id: "0".to_string(),
                ..Container::default()
            }],
            ..Graph::default()
        },
        raw: r#"{"containers":[{"id":"0"}]}"#.to_string(),
        model: "gpt-4o-mini".to_string(),
        prompt_tokens: 11,
        completion_tokens: 42,
    }
}

pub struct TestHarness {
    pub server: TestServer,
    pub state: AppState,
    pub repository: Arc<MockRepository>,
    pub mailer: Arc<MockMailer>,
    pub renderer: Arc<MockRenderer>,
    pub signer: Arc<LocalSigner>,
}

pub fn harness_with(inference: MockInference, renderer: MockRenderer) -> TestHarness {
    let repository = Arc::new(MockRepository::default());
    let mailer = Arc::new(MockMailer::default());
    let renderer = Arc::new(renderer);
    let signer = Arc::new(LocalSigner::new(SigningKey::generate(&mut OsRng)));

    let state = AppState::new(
        repository.clone(),
        signer.clone(),
        mailer.clone(),
        Arc::new(inference),
        renderer.clone(),
        CorsConfig::from_json(r#"{"Access-Control-Allow-Origin": "'*'"}"#),
    );

    let server = TestServer::new(routes::create_api_router(state.clone())).unwrap();
    TestHarness {
        server,
        state,
        repository,
        mailer,
        renderer,
        signer,
    }
}

pub fn harness() -> TestHarness {
    harness_with(
        MockInference::returning(single_node_prediction()),
        MockRenderer::returning(b"<svg/>"),
    )
}
