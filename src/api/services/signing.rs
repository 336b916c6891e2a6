//! Token signing adapter: EdDSA over the JWT signing string.
//!
//! The private key can live in-process (development) or behind a remote
//! signing oracle (production); verification always happens locally against
//! the distributed public key.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;

/// Signature algorithm label carried in token headers.
pub const ALG: &str = "EdDSA";

/// Signing errors.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("wrong signature format")]
    Format,
    #[error("wrong signature")]
    Invalid,
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Capability signing and verifying JWT signing strings.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    /// Sign; returns the base64url signature and the algorithm label.
    async fn sign(&self, signing_string: &str) -> Result<(String, String), SigningError>;

    /// Verify a base64url signature against the public key.
    async fn verify(&self, signing_string: &str, signature: &str) -> Result<(), SigningError>;
}

fn verify_with_key(
    key: &VerifyingKey,
    signing_string: &str,
    signature: &str,
) -> Result<(), SigningError> {
    let raw = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| SigningError::Format)?;
    let raw: [u8; 64] = raw.try_into().map_err(|_| SigningError::Format)?;
    let sig = Signature::from_bytes(&raw);
    key.verify(signing_string.as_bytes(), &sig)
        .map_err(|_| SigningError::Invalid)
}

/// Signer holding the Ed25519 private key in process.
pub struct LocalSigner {
    key: SigningKey,
    public: VerifyingKey,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let public = key.verifying_key();
        Self { key, public }
    }

    /// Build from a base64-encoded 32-byte seed, as configured via env.
    pub fn from_base64_seed(seed: &str) -> Result<Self, SigningError> {
        let raw = STANDARD
            .decode(seed.trim())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| SigningError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::new(SigningKey::from_bytes(&raw)))
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.public
    }
}

#[async_trait]
impl TokenSigner for LocalSigner {
    async fn sign(&self, signing_string: &str) -> Result<(String, String), SigningError> {
        let sig = self.key.sign(signing_string.as_bytes());
        Ok((URL_SAFE_NO_PAD.encode(sig.to_bytes()), ALG.to_string()))
    }

    async fn verify(&self, signing_string: &str, signature: &str) -> Result<(), SigningError> {
        verify_with_key(&self.public, signing_string, signature)
    }
}

#[derive(Deserialize)]
struct RemoteSignResponse {
    signature: String,
}

/// Signer forwarding to a remote KMS endpoint; only the public key is held
/// locally.
pub struct RemoteSigner {
    http: reqwest::Client,
    endpoint: String,
    public: VerifyingKey,
}

impl RemoteSigner {
    pub fn new(http: reqwest::Client, endpoint: String, public: VerifyingKey) -> Self {
        Self {
            http,
            endpoint,
            public,
        }
    }

    /// Build from the KMS endpoint and a base64-encoded public key.
    pub fn from_base64_public_key(
        http: reqwest::Client,
        endpoint: String,
        public_key: &str,
    ) -> Result<Self, SigningError> {
        let raw = STANDARD
            .decode(public_key.trim())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| SigningError::InvalidKey("public key must be 32 bytes".to_string()))?;
        let public = VerifyingKey::from_bytes(&raw)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self::new(http, endpoint, public))
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.public
    }
}

#[async_trait]
impl TokenSigner for RemoteSigner {
    async fn sign(&self, signing_string: &str) -> Result<(String, String), SigningError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "signing_string": signing_string }))
            .send()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SigningError::Unavailable(format!(
                "kms returned status {}",
                resp.status().as_u16()
            )));
        }

        let body: RemoteSignResponse = resp
            .json()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        Ok((body.signature, ALG.to_string()))
    }

    async fn verify(&self, signing_string: &str, signature: &str) -> Result<(), SigningError> {
        verify_with_key(&self.public, signing_string, signature)
    }
}
